// SPDX-License-Identifier: CEPL-1.0
//! Instance, window surface, physical device and the one graphics queue.
//!
//! Creation order matters: the surface comes from this instance, and the
//! device/queue pair is chosen against this surface so presentation is
//! guaranteed for the queue we submit on.

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_void, CStr};
use tracing::{debug, error, info, warn};

use crate::error::{Result, VkError, VkResultExt};

const APP_NAME: &CStr = c"Ember";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else {
        debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

pub struct GpuDevice {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
}

impl GpuDevice {
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| VkError::Surface(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| VkError::Surface(e.to_string()))?
            .as_raw();

        let entry = Entry::linked();
        unsafe {
            let (instance, validation) = create_instance(&entry, dh)?;

            let debug = if validation {
                create_debug_messenger(&entry, &instance)
            } else {
                None
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(e) => {
                    destroy_instance(&instance, debug);
                    return Err(VkError::Surface(format!("create_surface: {e}")));
                }
            };

            let picked = pick_device_and_queue(&instance, &surface_loader, surface)
                .and_then(|(phys, family)| {
                    create_logical_device(&instance, phys, family).map(|d| (phys, family, d))
                });
            let (phys, queue_family, device) = match picked {
                Ok(p) => p,
                Err(e) => {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, debug);
                    return Err(e);
                }
            };

            let queue = device.get_device_queue(queue_family, 0);
            let swapchain_loader = swapchain::Device::new(&instance, &device);

            Ok(Self {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                phys,
                device,
                queue_family,
                queue,
                swapchain_loader,
            })
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// Full device-idle barrier.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.during("device_wait_idle")
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_instance(&self.instance, self.debug.take());
        }
    }
}

unsafe fn destroy_instance(instance: &Instance, debug: Option<DebugMessenger>) {
    unsafe {
        if let Some(dbg) = debug {
            dbg.loader.destroy_debug_utils_messenger(dbg.handle, None);
        }
        instance.destroy_instance(None);
    }
}

/// Returns the instance and whether validation is active. Validation and
/// debug utils are only requested in debug builds, and only when present.
unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<(Instance, bool)> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .during("enumerate_required_extensions")?
        .to_vec();

    let validation = cfg!(debug_assertions) && unsafe { validation_available(entry) };
    let layers = [VALIDATION_LAYER.as_ptr()];
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    } else if cfg!(debug_assertions) {
        warn!("validation layer or debug utils not installed; running without validation");
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: if validation {
            layers.as_ptr()
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }.during("create_instance")?;
    Ok((instance, validation))
}

unsafe fn validation_available(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let has_layer = layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
    let exts = unsafe { entry.enumerate_instance_extension_properties(None) }.unwrap_or_default();
    let has_debug_utils = exts
        .iter()
        .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == debug_utils::NAME);
    has_layer && has_debug_utils
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Option<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
        Ok(handle) => Some(DebugMessenger { loader, handle }),
        Err(e) => {
            warn!("debug messenger unavailable: {e}");
            None
        }
    }
}

/// First device with a graphics queue family that can present to `surface`.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.during("enumerate_physical_devices")?;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let present = unsafe {
                surf_i
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            };
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                let props = unsafe { instance.get_physical_device_properties(phys) };
                let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
                info!(
                    "adapter: {} (Vulkan {}.{}.{}), queue family {i}",
                    name.to_string_lossy(),
                    vk::api_version_major(props.api_version),
                    vk::api_version_minor(props.api_version),
                    vk::api_version_patch(props.api_version),
                );
                return Ok((phys, i as u32));
            }
        }
    }
    Err(VkError::NoSuitableDevice)
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    unsafe { instance.create_device(phys, &dinfo, None) }.during("create_device")
}

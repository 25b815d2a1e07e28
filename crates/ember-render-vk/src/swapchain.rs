// SPDX-License-Identifier: CEPL-1.0
//! Swapchain lifecycle: planning from surface capabilities, creation of the
//! image ring with its views, render pass and framebuffers, and teardown.
//!
//! A [`Swapchain`] is only ever built or destroyed as a whole. Creation rolls
//! itself back on failure, so a half-built generation never escapes.

use ash::khr::swapchain;
use ash::vk;
use ember_render::RenderSize;
use tracing::info;

use crate::error::{Result, VkResultExt};
use crate::surface::SurfaceDescriptor;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    /// Present at the display refresh rate.
    Fifo,
    /// Low-latency vsync; falls back to FIFO when unsupported.
    #[default]
    Mailbox,
}

/// What the caller wants from the next swapchain generation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainRequest {
    /// Live framebuffer size; only used when the surface lets us choose.
    pub framebuffer: RenderSize,
    /// `None` means one more than the surface minimum.
    pub desired_images: Option<u32>,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

/// Everything [`Swapchain::create`] needs, resolved from a surface snapshot
/// without touching the device.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn resolve(surface: &SurfaceDescriptor, request: &SwapchainRequest) -> Self {
        let caps = &surface.caps;
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        SwapchainPlan {
            image_count: resolve_image_count(caps, request.desired_images),
            extent: resolve_extent(caps, request.framebuffer),
            format: surface.format,
            present_mode: choose_present_mode(
                &surface.present_modes,
                request.vsync,
                request.vsync_mode,
            ),
            pre_transform,
        }
    }

    /// A minimized window yields a zero extent; no swapchain can be built.
    pub fn is_presentable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

/// Clamp the requested image count to `[min + 1, max]`, where a `max` of
/// zero means the surface sets no upper bound.
pub fn resolve_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: Option<u32>) -> u32 {
    let floor = caps.min_image_count + 1;
    let count = desired.unwrap_or(floor).max(floor);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX],
        (true, VsyncMode::Fifo) => &[],
    };
    // FIFO is the only mode every driver must support.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Single color attachment cleared on load and left ready for presentation.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Hold the layout transition of subpass 0 until the acquire semaphore has
/// been waited on at COLOR_ATTACHMENT_OUTPUT.
pub fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// One slot of the ring. Keeping the three handles together makes index
/// correspondence structural.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    render_pass: vk::RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// A swapchain with no handles, standing in while the surface has no
    /// area.
    pub fn empty() -> Self {
        Swapchain {
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            render_pass: vk::RenderPass::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }

    /// Build a full generation from `plan`: swapchain, views, render pass,
    /// framebuffers. On failure everything created so far is destroyed
    /// before the error is returned.
    ///
    /// # Safety
    /// `device` and `loader` must be valid, and `surface.handle` must not
    /// have another live swapchain.
    pub unsafe fn create(
        device: &ash::Device,
        loader: &swapchain::Device,
        surface: &SurfaceDescriptor,
        plan: &SwapchainPlan,
    ) -> Result<Self> {
        let mut sc = Swapchain {
            format: plan.format.format,
            extent: plan.extent,
            present_mode: plan.present_mode,
            ..Swapchain::empty()
        };

        match unsafe { sc.build(device, loader, surface, plan) } {
            Ok(()) => {
                info!(
                    "swapchain ready ({}x{}, {} images, {:?} / {:?}, {:?})",
                    sc.extent.width,
                    sc.extent.height,
                    sc.images.len(),
                    plan.format.format,
                    plan.format.color_space,
                    sc.present_mode,
                );
                Ok(sc)
            }
            Err(e) => {
                unsafe { sc.destroy(device, loader) };
                Err(e)
            }
        }
    }

    unsafe fn build(
        &mut self,
        device: &ash::Device,
        loader: &swapchain::Device,
        surface: &SurfaceDescriptor,
        plan: &SwapchainPlan,
    ) -> Result<()> {
        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            // one graphics queue does everything; no ownership transfers
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        self.handle = unsafe { loader.create_swapchain(&swap_info, None) }.during("create_swapchain")?;

        // The realized count is authoritative; drivers may hand out more.
        let images = unsafe { loader.get_swapchain_images(self.handle) }
            .during("get_swapchain_images")?;
        self.images = images
            .into_iter()
            .map(|image| SwapchainImage {
                image,
                view: vk::ImageView::null(),
                framebuffer: vk::Framebuffer::null(),
            })
            .collect();

        for slot in &mut self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image: slot.image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            slot.view = unsafe { device.create_image_view(&iv_info, None) }.during("create_image_view")?;
        }

        self.render_pass = unsafe { create_render_pass(device, self.format) }?;

        for slot in &mut self.images {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: 1,
                p_attachments: &slot.view,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            slot.framebuffer =
                unsafe { device.create_framebuffer(&fb_info, None) }.during("create_framebuffer")?;
        }

        Ok(())
    }

    /// Tear down in reverse dependency order: framebuffers, render pass,
    /// views, swapchain. Null handles (from a partial build) are skipped and
    /// the value is left empty, so calling this twice is harmless.
    ///
    /// # Safety
    /// No pending GPU work may reference any of these objects; callers wait
    /// for device idle first.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &swapchain::Device) {
        unsafe {
            for slot in &mut self.images {
                if slot.framebuffer != vk::Framebuffer::null() {
                    device.destroy_framebuffer(slot.framebuffer, None);
                    slot.framebuffer = vk::Framebuffer::null();
                }
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            for slot in &mut self.images {
                if slot.view != vk::ImageView::null() {
                    device.destroy_image_view(slot.view, None);
                    slot.view = vk::ImageView::null();
                }
            }
            if self.handle != vk::SwapchainKHR::null() {
                // also releases the images themselves
                loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn image(&self, index: u32) -> Option<&SwapchainImage> {
        self.images.get(index as usize)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn is_empty(&self) -> bool {
        self.handle == vk::SwapchainKHR::null()
    }
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_att = color_attachment(format);
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    let dependency = acquire_dependency();

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.during("create_render_pass")
}

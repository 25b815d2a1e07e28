// SPDX-License-Identifier: CEPL-1.0
//! Presentable surface negotiation.

use ash::khr::surface;
use ash::vk;

use crate::error::{Result, VkError, VkResultExt};

/// Used when the driver reports `UNDEFINED`, i.e. "pick whatever you like".
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Snapshot of what the surface supports right now. Taken at startup and
/// again at every swapchain rebuild; never reused across one.
#[derive(Clone, Debug)]
pub struct SurfaceDescriptor {
    pub handle: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let first = formats.first().ok_or(VkError::NoSurfaceFormats)?;
    // a lone UNDEFINED entry means the surface has no preference
    if formats.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Ok(DEFAULT_SURFACE_FORMAT);
    }

    Ok(formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(*first))
}

/// Query presentation support, formats, present modes and capabilities of
/// `handle` for `queue_family` on `phys`.
///
/// Missing presentation support and an empty format list are fatal.
///
/// # Safety
/// `loader`, `phys` and `handle` must be valid and belong to the same
/// instance.
pub unsafe fn negotiate(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
    handle: vk::SurfaceKHR,
) -> Result<SurfaceDescriptor> {
    let supported = unsafe { loader.get_physical_device_surface_support(phys, queue_family, handle) }
        .during("get_physical_device_surface_support")?;
    if !supported {
        return Err(VkError::NoPresentSupport(queue_family));
    }

    let formats = unsafe { loader.get_physical_device_surface_formats(phys, handle) }
        .during("get_physical_device_surface_formats")?;
    let format = choose_surface_format(&formats)?;

    let present_modes = unsafe { loader.get_physical_device_surface_present_modes(phys, handle) }
        .during("get_physical_device_surface_present_modes")?;
    let caps = unsafe { loader.get_physical_device_surface_capabilities(phys, handle) }
        .during("get_physical_device_surface_capabilities")?;

    Ok(SurfaceDescriptor {
        handle,
        format,
        caps,
        present_modes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn empty_format_list_is_fatal() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(VkError::NoSurfaceFormats)
        ));
    }

    #[test]
    fn undefined_falls_back_to_default_pair() {
        let formats = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, DEFAULT_SURFACE_FORMAT.format);
        assert_eq!(chosen.color_space, DEFAULT_SURFACE_FORMAT.color_space);
    }

    #[test]
    fn native_list_head_wins_without_preferred_pair() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn bgra_unorm_preferred_when_listed() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn undefined_among_listed_formats_is_not_a_wildcard() {
        let formats = [
            fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::UNDEFINED);
        assert_ne!(chosen.format, DEFAULT_SURFACE_FORMAT.format);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Failure taxonomy of the Vulkan backend.
//!
//! Surface staleness is deliberately absent: an out-of-date or suboptimal
//! swapchain travels as [`crate::sync::AcquireOutcome`] /
//! [`crate::sync::PresentOutcome`] and drives a rebuild instead.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("no physical device exposes a graphics queue that can present to the window")]
    NoSuitableDevice,

    #[error("queue family {0} cannot present to this surface")]
    NoPresentSupport(u32),

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("window surface: {0}")]
    Surface(String),

    /// A bounded wait expired; the GPU or driver stopped responding.
    #[error("{what} timed out after {timeout_ns} ns")]
    Timeout { what: &'static str, timeout_ns: u64 },

    #[error("device lost during {0}")]
    DeviceLost(&'static str),

    /// The frame fence was waited on twice without a submit in between.
    #[error("frame fence waited on without an intervening submit")]
    FenceNotArmed,

    #[error("image index {index} out of range for a swapchain of {count} images")]
    ImageIndex { index: u32, count: usize },

    #[error("{what}: {result}")]
    Vulkan { what: &'static str, result: vk::Result },
}

pub type Result<T> = std::result::Result<T, VkError>;

impl VkError {
    /// Map a raw Vulkan failure from `what` into the taxonomy.
    pub fn from_vk(what: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost(what),
            result => VkError::Vulkan { what, result },
        }
    }
}

/// `.during("queue_submit")?` on any `VkResult`, in the spirit of
/// `anyhow::Context`.
pub trait VkResultExt<T> {
    fn during(self, what: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn during(self, what: &'static str) -> Result<T> {
        self.map_err(|e| VkError::from_vk(what, e))
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: one graphics queue, one frame in flight, and a swapchain
//! that is rebuilt whenever the surface stops matching it.
#![deny(unsafe_op_in_unsafe_fn)]

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use tracing::info;

use ember_render::{FrameStatus, RenderSize, Renderer};

pub mod command;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use error::VkError;
pub use swapchain::VsyncMode;

use context::FrameContext;
use device::GpuDevice;
use frame::FrameLoop;

/// One second, for both the acquire and the fence wait.
pub const DEFAULT_TIMEOUT_NS: u64 = 1_000_000_000;

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub clear: [f32; 4],
    /// Pulse the blue channel of the clear color with the frame counter.
    pub pulse: bool,
    pub acquire_timeout_ns: u64,
    pub fence_timeout_ns: u64,
    /// `None` lets the surface decide (minimum + 1).
    pub desired_images: Option<u32>,
    /// Directory holding `triangle.vert.spv` / `triangle.frag.spv`;
    /// built-in shaders when unset.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            vsync_mode: VsyncMode::default(),
            clear: [0.0, 0.0, 0.0, 1.0],
            pulse: true,
            acquire_timeout_ns: DEFAULT_TIMEOUT_NS,
            fence_timeout_ns: DEFAULT_TIMEOUT_NS,
            desired_images: None,
            shader_dir: None,
        }
    }
}

pub struct VkRenderer {
    frames: FrameLoop,
    ctx: FrameContext,
}

impl VkRenderer {
    pub fn with_config(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
    ) -> Result<Self> {
        let gpu = GpuDevice::new(window, display).context("Vulkan device setup")?;
        let ctx = FrameContext::new(gpu, config, size).context("initial swapchain")?;

        let mut frames = FrameLoop::new(config.clear, config.pulse);
        if !ctx.is_presentable() {
            frames.invalidate();
        }
        if !ctx.has_pipeline() {
            info!("no triangle pipeline; frames will only clear");
        }
        Ok(Self { frames, ctx })
    }

    /// Takes effect at the next frame through a swapchain rebuild.
    pub fn set_vsync_mode(&mut self, mode: VsyncMode) {
        self.ctx.set_vsync_mode(mode);
        self.frames.invalidate();
    }

    pub fn set_pulse(&mut self, on: bool) {
        self.frames.set_pulse(on);
    }

    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_config(window, display, size, &RendererConfig::default())
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size != self.ctx.size_hint() {
            self.ctx.set_size_hint(size);
            self.frames.invalidate();
        }
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        // Minimized: no acquire, no fence traffic, until a resize arrives.
        if self.ctx.size_hint().is_empty() {
            return Ok(FrameStatus::Skipped);
        }
        let status = self
            .frames
            .draw_frame(&mut self.ctx)
            .with_context(|| format!("frame {}", self.frames.frame_number()))?;
        Ok(status)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        self.ctx.set_vsync(on);
        self.frames.invalidate();
    }
}

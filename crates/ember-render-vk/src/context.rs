// SPDX-License-Identifier: CEPL-1.0
//! Everything one frame touches, owned in one place and handed to the frame
//! loop by `&mut`. Only [`FrameContext::rebuild`] replaces the swapchain.

use ash::vk;
use ember_render::RenderSize;
use tracing::{info, warn};

use crate::command::{CommandResources, FramePass};
use crate::device::GpuDevice;
use crate::error::{Result, VkError};
use crate::frame::{FrameBackend, RebuildOutcome};
use crate::pipeline;
use crate::shader::ShaderSet;
use crate::surface;
use crate::swapchain::{Swapchain, SwapchainPlan, SwapchainRequest, VsyncMode};
use crate::sync::{AcquireOutcome, PresentOutcome, SyncGate};
use crate::RendererConfig;

pub struct FrameContext {
    swapchain: Swapchain,
    pipeline_layout: vk::PipelineLayout,
    pipeline: Option<vk::Pipeline>,
    shaders: ShaderSet,
    gate: SyncGate,
    commands: CommandResources,
    request: SwapchainRequest,
    acquire_timeout_ns: u64,
    fence_timeout_ns: u64,
    // declared last so it outlives every handle above
    gpu: GpuDevice,
}

impl FrameContext {
    /// Set up the first swapchain generation. When the surface has no area
    /// yet the swapchain starts out empty; see [`FrameContext::is_presentable`].
    pub fn new(gpu: GpuDevice, config: &RendererConfig, size: RenderSize) -> Result<Self> {
        let request = SwapchainRequest {
            framebuffer: size,
            desired_images: config.desired_images,
            vsync: config.vsync,
            vsync_mode: config.vsync_mode,
        };
        // Every tier starts null and is created in place, so an early
        // return drops `ctx` and destroys exactly what exists so far,
        // before the device goes.
        let mut ctx = Self {
            swapchain: Swapchain::empty(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: None,
            shaders: ShaderSet::load(config.shader_dir.as_deref()),
            gate: SyncGate::empty(),
            commands: CommandResources::empty(),
            request,
            acquire_timeout_ns: config.acquire_timeout_ns,
            fence_timeout_ns: config.fence_timeout_ns,
            gpu,
        };

        ctx.gate = unsafe { SyncGate::new(ctx.gpu.device()) }?;
        ctx.commands = unsafe { CommandResources::new(ctx.gpu.device(), ctx.gpu.queue_family()) }?;
        ctx.pipeline_layout = unsafe { pipeline::create_layout(ctx.gpu.device()) }?;

        let descriptor = ctx.query_surface()?;
        let plan = SwapchainPlan::resolve(&descriptor, &ctx.request);
        if plan.is_presentable() {
            ctx.swapchain = unsafe {
                Swapchain::create(
                    ctx.gpu.device(),
                    ctx.gpu.swapchain_loader(),
                    &descriptor,
                    &plan,
                )
            }?;
            ctx.pipeline = ctx.build_pipeline();
        } else {
            info!("surface has no area at startup, swapchain deferred");
        }
        Ok(ctx)
    }

    pub fn is_presentable(&self) -> bool {
        !self.swapchain.is_empty()
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn size_hint(&self) -> RenderSize {
        self.request.framebuffer
    }

    pub fn set_size_hint(&mut self, size: RenderSize) {
        self.request.framebuffer = size;
    }

    pub fn set_vsync(&mut self, on: bool) {
        self.request.vsync = on;
    }

    pub fn set_vsync_mode(&mut self, mode: VsyncMode) {
        self.request.vsync_mode = mode;
    }

    fn query_surface(&self) -> Result<surface::SurfaceDescriptor> {
        unsafe {
            surface::negotiate(
                self.gpu.surface_loader(),
                self.gpu.physical_device(),
                self.gpu.queue_family(),
                self.gpu.surface(),
            )
        }
    }

    /// A failed pipeline leaves frames clear-only.
    fn build_pipeline(&self) -> Option<vk::Pipeline> {
        if !self.shaders.is_complete() {
            return None;
        }
        let res = unsafe {
            pipeline::build_pipeline(
                self.gpu.device(),
                self.pipeline_layout,
                self.swapchain.render_pass(),
                &self.shaders,
            )
        };
        match res {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("triangle pipeline unavailable, drawing clear only: {e}");
                None
            }
        }
    }

    fn destroy_pipeline(&mut self) {
        if let Some(p) = self.pipeline.take() {
            unsafe { self.gpu.device().destroy_pipeline(p, None) };
        }
    }
}

impl FrameBackend for FrameContext {
    fn acquire(&mut self) -> Result<AcquireOutcome> {
        if self.swapchain.is_empty() {
            return Ok(AcquireOutcome::OutOfDate);
        }
        unsafe {
            self.gate.acquire_next(
                self.gpu.swapchain_loader(),
                self.swapchain.handle(),
                self.acquire_timeout_ns,
            )
        }
    }

    fn wait_and_reset(&mut self) -> Result<()> {
        unsafe { self.gate.wait_and_reset(self.gpu.device(), self.fence_timeout_ns) }
    }

    fn record(&mut self, image_index: u32, clear: [f32; 4]) -> Result<()> {
        let slot = self
            .swapchain
            .image(image_index)
            .ok_or(VkError::ImageIndex {
                index: image_index,
                count: self.swapchain.images().len(),
            })?;
        let pass = FramePass {
            render_pass: self.swapchain.render_pass(),
            framebuffer: slot.framebuffer,
            extent: self.swapchain.extent(),
            pipeline: self.pipeline,
            clear,
        };
        unsafe { self.commands.record(self.gpu.device(), &pass) }
    }

    fn submit(&mut self) -> Result<()> {
        unsafe {
            self.gate
                .submit(self.gpu.device(), self.gpu.queue(), self.commands.buffer)
        }
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        unsafe {
            self.gate.present(
                self.gpu.swapchain_loader(),
                self.gpu.queue(),
                self.swapchain.handle(),
                image_index,
            )
        }
    }

    /// Idle the device, re-query the surface, and replace pipeline and
    /// swapchain. Capabilities are checked before anything is destroyed so
    /// a minimized window keeps the old generation around untouched.
    fn rebuild(&mut self) -> Result<RebuildOutcome> {
        self.gpu.wait_idle()?;

        let descriptor = self.query_surface()?;
        let plan = SwapchainPlan::resolve(&descriptor, &self.request);
        if !plan.is_presentable() {
            return Ok(RebuildOutcome::Deferred);
        }

        info!(
            "rebuilding swapchain: {}x{} {:?} {:?} -> {}x{} {:?} {:?}",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.format(),
            self.swapchain.present_mode(),
            plan.extent.width,
            plan.extent.height,
            plan.format.format,
            plan.present_mode,
        );

        self.destroy_pipeline();
        unsafe {
            self.swapchain
                .destroy(self.gpu.device(), self.gpu.swapchain_loader());
            self.swapchain = Swapchain::create(
                self.gpu.device(),
                self.gpu.swapchain_loader(),
                &descriptor,
                &plan,
            )?;
        }
        self.pipeline = self.build_pipeline();
        Ok(RebuildOutcome::Rebuilt)
    }
}

impl Drop for FrameContext {
    fn drop(&mut self) {
        // Teardown: idle, pipeline, layout, swapchain generation, commands,
        // sync objects. The device itself goes when `gpu` drops.
        self.gpu.wait_idle().ok();
        self.destroy_pipeline();
        let device = self.gpu.device();
        unsafe {
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            self.swapchain.destroy(device, self.gpu.swapchain_loader());
            self.commands.destroy(device);
            self.gate.destroy(device);
        }
    }
}

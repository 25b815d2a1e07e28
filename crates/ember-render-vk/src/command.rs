// SPDX-License-Identifier: CEPL-1.0
//! Command pool and the single primary buffer that is re-recorded every
//! frame.

use ash::vk;

use crate::error::{Result, VkError, VkResultExt};

pub struct CommandResources {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
}

/// What one frame draws into one framebuffer.
#[derive(Clone, Copy, Debug)]
pub struct FramePass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: Option<vk::Pipeline>,
    pub clear: [f32; 4],
}

pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

impl CommandResources {
    /// No pool yet; `destroy` on it is a no-op.
    pub const fn empty() -> Self {
        Self {
            pool: vk::CommandPool::null(),
            buffer: vk::CommandBuffer::null(),
        }
    }

    /// # Safety
    /// `device` must be valid and own `queue_family`.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .during("create_command_pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(bufs) => bufs[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(VkError::from_vk("allocate_command_buffers", e));
            }
        };

        Ok(Self { pool, buffer })
    }

    /// Reset and record: one render pass that clears the image and, when a
    /// pipeline exists, draws the triangle.
    ///
    /// # Safety
    /// The buffer must not be pending on the GPU, i.e. the frame fence has
    /// been waited on.
    pub unsafe fn record(&self, device: &ash::Device, pass: &FramePass) -> Result<()> {
        let cmd = self.buffer;
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .during("reset_command_buffer")?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .during("begin_command_buffer")?;

            let clear = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: pass.clear,
                },
            };
            let (viewport, scissor) = full_viewport(pass.extent);
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: pass.render_pass,
                framebuffer: pass.framebuffer,
                render_area: scissor,
                clear_value_count: 1,
                p_clear_values: &clear,
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            if let Some(pipeline) = pass.pipeline {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
                device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
                device.cmd_draw(cmd, 3, 1, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).during("end_command_buffer")?;
        }
        Ok(())
    }

    /// # Safety
    /// The buffer must not be pending on the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pool != vk::CommandPool::null() {
            unsafe {
                device.free_command_buffers(self.pool, std::slice::from_ref(&self.buffer));
                device.destroy_command_pool(self.pool, None);
            }
        }
        self.buffer = vk::CommandBuffer::null();
        self.pool = vk::CommandPool::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resources_are_null() {
        let res = CommandResources::empty();
        assert_eq!(res.pool, vk::CommandPool::null());
        assert_eq!(res.buffer, vk::CommandBuffer::null());
    }

    #[test]
    fn viewport_covers_the_extent() {
        let (vp, sc) = full_viewport(vk::Extent2D {
            width: 800,
            height: 600,
        });
        assert_eq!((vp.width, vp.height), (800.0, 600.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        assert_eq!(sc.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(sc.extent.width, 800);
        assert_eq!(sc.extent.height, 600);
    }
}

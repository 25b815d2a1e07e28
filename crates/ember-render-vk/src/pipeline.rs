// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline for the triangle. Built against the current render
//! pass, so it is rebuilt with every swapchain generation.

use ash::vk;
use std::ffi::CStr;
use thiserror::Error;

use crate::error::{Result, VkResultExt};
use crate::shader::ShaderSet;

const ENTRY_POINT: &CStr = c"main";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} shader stage missing")]
    MissingStage(&'static str),
    #[error("{what}: {result}")]
    Vulkan { what: &'static str, result: vk::Result },
}

/// Empty layout: the triangle needs no descriptors or push constants.
///
/// # Safety
/// `device` must be valid.
pub unsafe fn create_layout(device: &ash::Device) -> Result<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        ..Default::default()
    };
    unsafe { device.create_pipeline_layout(&layout_info, None) }.during("create_pipeline_layout")
}

/// Build the triangle pipeline for subpass 0 of `render_pass`.
///
/// Failure is reported but is not fatal to the caller, which keeps
/// presenting clear-only frames.
///
/// # Safety
/// `device`, `layout` and `render_pass` must be valid.
pub unsafe fn build_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    shaders: &ShaderSet,
) -> std::result::Result<vk::Pipeline, PipelineError> {
    let vs_code = shaders
        .vertex
        .as_deref()
        .ok_or(PipelineError::MissingStage("vertex"))?;
    let fs_code = shaders
        .fragment
        .as_deref()
        .ok_or(PipelineError::MissingStage("fragment"))?;

    let vs = unsafe { create_module(device, vs_code) }?;
    let fs = match unsafe { create_module(device, fs_code) } {
        Ok(m) => m,
        Err(e) => {
            unsafe { device.destroy_shader_module(vs, None) };
            return Err(e);
        }
    };

    let result = unsafe { build_with_modules(device, layout, render_pass, vs, fs) };

    // modules are only needed while the pipeline is being compiled
    unsafe {
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
    }
    result
}

unsafe fn create_module(
    device: &ash::Device,
    code: &[u32],
) -> std::result::Result<vk::ShaderModule, PipelineError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.map_err(|result| PipelineError::Vulkan {
        what: "create_shader_module",
        result,
    })
}

unsafe fn build_with_modules(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> std::result::Result<vk::Pipeline, PipelineError> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: ENTRY_POINT.as_ptr(),
            ..Default::default()
        },
    ];

    // positions live in the vertex shader
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Viewport/scissor are set at record time from the swapchain extent.
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        min_sample_shading: 1.0,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    } {
        Ok(pipelines) => Ok(pipelines[0]),
        Err((_, result)) => Err(PipelineError::Vulkan {
            what: "create_graphics_pipelines",
            result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_point_is_main() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }

    #[test]
    fn missing_stage_is_named() {
        let err = PipelineError::MissingStage("fragment");
        assert_eq!(err.to_string(), "fragment shader stage missing");
    }
}

/// Pipeline - graphics pipeline and pipeline layout

use ash::vk;
use nebula_renderer::nebula::gpu::{
    DescriptorSetLayout as GpuDescriptorSetLayout, Pipeline as GpuPipeline, PipelineDesc,
    PushConstantRange, RenderPassLayout, ShaderModule as GpuShaderModule,
};
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_debug, engine_err};
use std::ffi::CString;
use std::sync::Arc;

use crate::context::GpuContext;
use crate::conversion::{
    cull_mode_to_vk, sample_count_to_vk, stage_flags_to_vk, topology_to_vk, vertex_format_to_vk,
};
use crate::descriptor::DescriptorSetLayout;
use crate::render_pass::create_vk_render_pass;
use crate::shader::ShaderModule;

pub struct Pipeline {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    render_pass_layout: RenderPassLayout,
    push_constants: Vec<PushConstantRange>,
}

impl Pipeline {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &PipelineDesc) -> Result<Self> {
        unsafe {
            // Downcast to Vulkan types
            let vertex_shader = &*(desc.vertex_shader as *const dyn GpuShaderModule as *const ShaderModule);
            let fragment_shader = &*(desc.fragment_shader as *const dyn GpuShaderModule as *const ShaderModule);

            let set_layouts: Vec<vk::DescriptorSetLayout> = desc
                .set_layouts
                .iter()
                .map(|layout| {
                    let layout = &*(*layout as *const dyn GpuDescriptorSetLayout as *const DescriptorSetLayout);
                    layout.layout
                })
                .collect();

            let push_constant_ranges: Vec<vk::PushConstantRange> = desc
                .push_constants
                .iter()
                .map(|range| vk::PushConstantRange {
                    stage_flags: stage_flags_to_vk(range.stages),
                    offset: range.offset,
                    size: range.size,
                })
                .collect();

            let layout_info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&set_layouts)
                .push_constant_ranges(&push_constant_ranges);
            let layout = ctx.device.create_pipeline_layout(&layout_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create pipeline layout '{}': {:?}", desc.name, e))?;

            match Self::create_pipeline(&ctx, desc, vertex_shader, fragment_shader, layout) {
                Ok(pipeline) => {
                    engine_debug!("nebula::vulkan", "Pipeline '{}' created ({} set layout(s), {} push constant range(s))",
                        desc.name, set_layouts.len(), push_constant_ranges.len());
                    Ok(Self {
                        ctx,
                        pipeline,
                        layout,
                        render_pass_layout: desc.render_pass,
                        push_constants: desc.push_constants.clone(),
                    })
                }
                Err(e) => {
                    ctx.device.destroy_pipeline_layout(layout, None);
                    Err(e)
                }
            }
        }
    }

    unsafe fn create_pipeline(
        ctx: &GpuContext,
        desc: &PipelineDesc,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let entry_point_vert = CString::new(vertex_shader.reflection().entry_point.as_str())
            .map_err(|e| engine_err!("nebula::vulkan", "Invalid entry point in '{}': {}", vertex_shader.name(), e))?;
        let entry_point_frag = CString::new(fragment_shader.reflection().entry_point.as_str())
            .map_err(|e| engine_err!("nebula::vulkan", "Invalid entry point in '{}': {}", fragment_shader.name(), e))?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.module)
                .name(&entry_point_vert),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.module)
                .name(&entry_point_frag),
        ];

        // Vertex input state (single interleaved binding)
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = if desc.vertex_layout.stride > 0 {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: desc.vertex_layout.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        } else {
            Vec::new()
        };
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: vertex_format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic, only counts are given here
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode_to_vk(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(sample_count_to_vk(desc.render_pass.samples));

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        // Compatible render pass, only needed during creation
        let render_pass = create_vk_render_pass(&ctx.device, &desc.render_pass)?;

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let result = ctx.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_create_info),
            None,
        );
        ctx.device.destroy_render_pass(render_pass, None);

        match result {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, e)) => Err(engine_err!("nebula::vulkan", "Failed to create pipeline '{}': {:?}", desc.name, e)),
        }
    }
}

impl GpuPipeline for Pipeline {
    fn render_pass_layout(&self) -> RenderPassLayout {
        self.render_pass_layout
    }

    fn push_constants(&self) -> &[PushConstantRange] {
        &self.push_constants
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
            self.ctx.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

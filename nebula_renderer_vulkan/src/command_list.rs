/// CommandList - Vulkan implementation of the CommandList trait
///
/// Each list owns a resettable command pool with one primary command buffer.

use ash::vk;
use nebula_renderer::nebula::gpu::{
    Buffer as GpuBuffer, ClearValue, CommandList as GpuCommandList, DescriptorSet as GpuDescriptorSet,
    Extent2D, Framebuffer as GpuFramebuffer, GpuImage, ImageLayout, IndexType, Pipeline as GpuPipeline,
    Rect2D, RenderPass as GpuRenderPass, ShaderStageFlags, Viewport,
};
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_bail, engine_err};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::conversion::{image_layout_to_vk, index_type_to_vk, layout_access, stage_flags_to_vk};
use crate::descriptor::DescriptorSet;
use crate::image::Image;
use crate::pipeline::Pipeline;
use crate::render_pass::{Framebuffer, RenderPass};

pub struct CommandList {
    ctx: Arc<GpuContext>,
    /// Command pool for allocating the command buffer
    command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    /// Whether the command list is currently recording
    is_recording: bool,
    /// Whether we're inside a render pass
    in_render_pass: bool,
}

impl CommandList {
    pub(crate) fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(ctx.graphics_queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let command_pool = ctx.device.create_command_pool(&pool_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create command pool: {:?}", e))?;

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffers = match ctx.device.allocate_command_buffers(&allocate_info) {
                Ok(buffers) => buffers,
                Err(e) => {
                    ctx.device.destroy_command_pool(command_pool, None);
                    return Err(engine_err!("nebula::vulkan", "Failed to allocate command buffer: {:?}", e));
                }
            };

            Ok(Self {
                ctx,
                command_pool,
                command_buffer: command_buffers[0],
                is_recording: false,
                in_render_pass: false,
            })
        }
    }

    fn check_recording(&self) -> Result<()> {
        if !self.is_recording {
            engine_bail!("nebula::vulkan", "Command list not recording");
        }
        Ok(())
    }

    fn check_outside_render_pass(&self, command: &str) -> Result<()> {
        self.check_recording()?;
        if self.in_render_pass {
            engine_bail!("nebula::vulkan", "{} is not allowed inside a render pass", command);
        }
        Ok(())
    }
}

impl GpuCommandList for CommandList {
    fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            engine_bail!("nebula::vulkan", "Command list already recording");
        }

        unsafe {
            self.ctx.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to reset command buffer: {:?}", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            self.ctx.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to begin command buffer: {:?}", e))?;
        }

        self.is_recording = true;
        self.in_render_pass = false;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.check_recording()?;
        if self.in_render_pass {
            engine_bail!("nebula::vulkan", "Render pass not ended before ending command list");
        }

        unsafe {
            self.ctx.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to end command buffer: {:?}", e))?;
        }

        self.is_recording = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        unsafe {
            self.ctx.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to reset command buffer: {:?}", e))?;
        }

        self.is_recording = false;
        self.in_render_pass = false;
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &dyn GpuRenderPass,
        framebuffer: &dyn GpuFramebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.check_outside_render_pass("begin_render_pass")?;

        unsafe {
            // Downcast to Vulkan types
            let vk_render_pass = &*(render_pass as *const dyn GpuRenderPass as *const RenderPass);
            let vk_framebuffer = &*(framebuffer as *const dyn GpuFramebuffer as *const Framebuffer);

            let vk_clear_values: Vec<vk::ClearValue> = clear_values
                .iter()
                .map(|cv| match cv {
                    ClearValue::Color(color) => vk::ClearValue {
                        color: vk::ClearColorValue { float32: *color },
                    },
                    ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: *depth,
                            stencil: *stencil,
                        },
                    },
                })
                .collect();

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(vk_render_pass.render_pass)
                .framebuffer(vk_framebuffer.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D { width: extent.width, height: extent.height },
                })
                .clear_values(&vk_clear_values);

            self.ctx.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
        }

        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.check_recording()?;
        if !self.in_render_pass {
            engine_bail!("nebula::vulkan", "Not inside a render pass");
        }

        unsafe {
            self.ctx.device.cmd_end_render_pass(self.command_buffer);
        }
        self.in_render_pass = false;
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.check_recording()?;

        let vk_viewport = vk::Viewport::default()
            .x(viewport.x)
            .y(viewport.y)
            .width(viewport.width)
            .height(viewport.height)
            .min_depth(viewport.min_depth)
            .max_depth(viewport.max_depth);

        unsafe {
            self.ctx.device.cmd_set_viewport(self.command_buffer, 0, &[vk_viewport]);
        }
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.check_recording()?;

        let vk_scissor = vk::Rect2D::default()
            .offset(vk::Offset2D { x: scissor.x, y: scissor.y })
            .extent(vk::Extent2D { width: scissor.width, height: scissor.height });

        unsafe {
            self.ctx.device.cmd_set_scissor(self.command_buffer, 0, &[vk_scissor]);
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &dyn GpuPipeline) -> Result<()> {
        self.check_recording()?;

        unsafe {
            let vk_pipeline = &*(pipeline as *const dyn GpuPipeline as *const Pipeline);
            self.ctx.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                vk_pipeline.pipeline,
            );
        }
        Ok(())
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: &dyn GpuPipeline,
        first_set: u32,
        sets: &[&dyn GpuDescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.check_recording()?;
        if sets.is_empty() {
            return Ok(());
        }

        unsafe {
            let vk_pipeline = &*(pipeline as *const dyn GpuPipeline as *const Pipeline);
            let vk_sets: Vec<vk::DescriptorSet> = sets
                .iter()
                .map(|set| {
                    let set = &*(*set as *const dyn GpuDescriptorSet as *const DescriptorSet);
                    set.set
                })
                .collect();

            self.ctx.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                vk_pipeline.layout,
                first_set,
                &vk_sets,
                dynamic_offsets,
            );
        }
        Ok(())
    }

    fn push_constants(
        &mut self,
        pipeline: &dyn GpuPipeline,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.check_recording()?;

        unsafe {
            let vk_pipeline = &*(pipeline as *const dyn GpuPipeline as *const Pipeline);
            self.ctx.device.cmd_push_constants(
                self.command_buffer,
                vk_pipeline.layout,
                stage_flags_to_vk(stages),
                offset,
                data,
            );
        }
        Ok(())
    }

    fn bind_vertex_buffer(&mut self, buffer: &dyn GpuBuffer, offset: u64) -> Result<()> {
        self.check_recording()?;

        unsafe {
            let vk_buffer = &*(buffer as *const dyn GpuBuffer as *const Buffer);
            self.ctx.device.cmd_bind_vertex_buffers(
                self.command_buffer,
                0,
                &[vk_buffer.buffer],
                &[offset],
            );
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &dyn GpuBuffer, offset: u64, index_type: IndexType) -> Result<()> {
        self.check_recording()?;

        unsafe {
            let vk_buffer = &*(buffer as *const dyn GpuBuffer as *const Buffer);
            self.ctx.device.cmd_bind_index_buffer(
                self.command_buffer,
                vk_buffer.buffer,
                offset,
                index_type_to_vk(index_type),
            );
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()> {
        self.check_recording()?;

        unsafe {
            self.ctx.device.cmd_draw(self.command_buffer, vertex_count, 1, first_vertex, 0);
        }
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()> {
        self.check_recording()?;

        unsafe {
            self.ctx.device.cmd_draw_indexed(self.command_buffer, index_count, 1, first_index, vertex_offset, 0);
        }
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &dyn GpuBuffer,
        src_offset: u64,
        dst: &dyn GpuBuffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.check_outside_render_pass("copy_buffer")?;

        unsafe {
            let vk_src = &*(src as *const dyn GpuBuffer as *const Buffer);
            let vk_dst = &*(dst as *const dyn GpuBuffer as *const Buffer);
            let region = vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            };
            self.ctx.device.cmd_copy_buffer(self.command_buffer, vk_src.buffer, vk_dst.buffer, &[region]);
        }
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, src: &dyn GpuBuffer, src_offset: u64, dst: &dyn GpuImage) -> Result<()> {
        self.check_outside_render_pass("copy_buffer_to_image")?;

        unsafe {
            let vk_src = &*(src as *const dyn GpuBuffer as *const Buffer);
            let vk_dst = &*(dst as *const dyn GpuImage as *const Image);
            let desc = dst.desc();

            // Layers are tightly packed one after another
            let region = vk::BufferImageCopy::default()
                .buffer_offset(src_offset)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk_dst.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: desc.kind.layer_count(),
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 });

            self.ctx.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                vk_src.buffer,
                vk_dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    fn transition_image(&mut self, image: &dyn GpuImage, old: ImageLayout, new: ImageLayout) -> Result<()> {
        self.check_outside_render_pass("transition_image")?;

        let (src_access, src_stage) = layout_access(old);
        let (dst_access, dst_stage) = layout_access(new);

        unsafe {
            let vk_image = &*(image as *const dyn GpuImage as *const Image);
            let barrier = vk::ImageMemoryBarrier::default()
                .old_layout(image_layout_to_vk(old))
                .new_layout(image_layout_to_vk(new))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(vk_image.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk_image.aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: image.desc().kind.layer_count(),
                })
                .src_access_mask(src_access)
                .dst_access_mask(dst_access);

            self.ctx.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        unsafe {
            // Frees the command buffer with it
            self.ctx.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

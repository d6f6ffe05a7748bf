/// Render pass and framebuffer
///
/// Attachment order: multisample color (MSAA only), depth, swapchain color.
/// Without MSAA the swapchain image is the color attachment; with MSAA it is
/// the resolve target.

use ash::vk;
use nebula_renderer::nebula::gpu::{
    Extent2D, Framebuffer as GpuFramebuffer, FramebufferDesc, GpuImage, RenderPass as GpuRenderPass,
    RenderPassLayout, Swapchain as GpuSwapchain,
};
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_bail_warn, engine_err};
use std::sync::Arc;

use crate::context::GpuContext;
use crate::conversion::{image_format_to_vk, sample_count_to_vk};
use crate::image::Image;
use crate::swapchain::Swapchain;

pub struct RenderPass {
    ctx: Arc<GpuContext>,
    pub(crate) render_pass: vk::RenderPass,
    layout: RenderPassLayout,
}

impl RenderPass {
    pub(crate) fn new(ctx: Arc<GpuContext>, layout: &RenderPassLayout) -> Result<Self> {
        let render_pass = create_vk_render_pass(&ctx.device, layout)?;
        Ok(Self { ctx, render_pass, layout: *layout })
    }
}

/// Create the Vulkan render pass of a layout
///
/// Also used for pipeline creation, where only render pass compatibility
/// (formats and sample counts) matters.
pub(crate) fn create_vk_render_pass(device: &ash::Device, layout: &RenderPassLayout) -> Result<vk::RenderPass> {
    let multisampled = layout.samples.is_multisampled();
    let samples = sample_count_to_vk(layout.samples);
    let color_format = image_format_to_vk(layout.color_format);

    let mut attachments = Vec::with_capacity(3);
    if multisampled {
        attachments.push(vk::AttachmentDescription::default()
            .format(color_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
    }

    let depth_index = attachments.len() as u32;
    attachments.push(vk::AttachmentDescription::default()
        .format(image_format_to_vk(layout.depth_format))
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));

    let present_index = attachments.len() as u32;
    attachments.push(vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(if multisampled { vk::AttachmentLoadOp::DONT_CARE } else { vk::AttachmentLoadOp::CLEAR })
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR));

    let color_ref = [vk::AttachmentReference::default()
        .attachment(if multisampled { 0 } else { present_index })
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let resolve_ref = [vk::AttachmentReference::default()
        .attachment(present_index)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_ref = vk::AttachmentReference::default()
        .attachment(depth_index)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref);
    if multisampled {
        subpass = subpass.resolve_attachments(&resolve_ref);
    }

    let stage_mask = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stage_mask)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stage_mask)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE);

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));

    unsafe {
        device.create_render_pass(&create_info, None)
            .map_err(|e| engine_err!("nebula::vulkan", "Failed to create render pass {:?}: {:?}", layout, e))
    }
}

impl GpuRenderPass for RenderPass {
    fn layout(&self) -> RenderPassLayout {
        self.layout
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

// ===== FRAMEBUFFER =====

pub struct Framebuffer {
    ctx: Arc<GpuContext>,
    pub(crate) framebuffer: vk::Framebuffer,
    extent: Extent2D,
}

impl Framebuffer {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &FramebufferDesc) -> Result<Self> {
        let render_pass = unsafe { &*(desc.render_pass as *const dyn GpuRenderPass as *const RenderPass) };
        let swapchain = unsafe { &*(desc.swapchain as *const dyn GpuSwapchain as *const Swapchain) };
        let depth = unsafe { &*(desc.depth as *const dyn GpuImage as *const Image) };

        let Some(&swapchain_view) = swapchain.image_views.get(desc.image_index as usize) else {
            engine_bail_warn!("nebula::vulkan", "Framebuffer: swapchain image {} out of range ({} images)",
                desc.image_index, swapchain.image_views.len());
        };

        let multisampled = render_pass.layout.samples.is_multisampled();
        let mut attachments = Vec::with_capacity(3);
        match (multisampled, desc.multisample) {
            (true, Some(image)) => {
                let image = unsafe { &*(image as *const dyn GpuImage as *const Image) };
                attachments.push(image.view);
            }
            (true, None) => {
                engine_bail_warn!("nebula::vulkan", "Framebuffer: multisampled render pass without a multisample image");
            }
            (false, _) => {}
        }
        attachments.push(depth.view);
        attachments.push(swapchain_view);

        let extent = swapchain.extent;
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            ctx.device.create_framebuffer(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create framebuffer for image {}: {:?}", desc.image_index, e))?
        };

        Ok(Self { ctx, framebuffer, extent })
    }
}

impl GpuFramebuffer for Framebuffer {
    fn extent(&self) -> Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

/// Pipeline, descriptor and render pass traits

use crate::config::SampleCount;
use crate::error::Result;
use crate::gpu::buffer::Buffer;
use crate::gpu::image::{GpuImage, ImageFormat};
use crate::gpu::shader::{
    DescriptorSetLayoutDesc, DescriptorType, PushConstantRange, ShaderModule, VertexInputLayout,
};
use crate::gpu::swapchain::{Extent2D, Swapchain};

// ===== DESCRIPTORS =====

/// Descriptor set layout (one per shader-declared set)
pub trait DescriptorSetLayout: Send + Sync {
    /// Bindings the layout was created from
    fn desc(&self) -> &DescriptorSetLayoutDesc;
}

/// Pool sizing for a descriptor pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    /// Maximum number of sets the pool hands out
    pub max_sets: u32,
    /// Total descriptor count per type
    pub sizes: Vec<(DescriptorType, u32)>,
}

impl DescriptorPoolDesc {
    /// Size a pool for `instances` copies of every layout in `layouts`
    pub fn for_instances(layouts: &[DescriptorSetLayoutDesc], instances: u32) -> Self {
        let mut sizes: Vec<(DescriptorType, u32)> = Vec::new();
        for layout in layouts {
            for binding in &layout.bindings {
                let count = binding.count * instances;
                match sizes.iter_mut().find(|(ty, _)| *ty == binding.descriptor_type) {
                    Some((_, total)) => *total += count,
                    None => sizes.push((binding.descriptor_type, count)),
                }
            }
        }
        Self {
            max_sets: (layouts.len() as u32).max(1) * instances,
            sizes,
        }
    }
}

/// Resource written into a descriptor
pub enum DescriptorResource<'a> {
    /// Uniform or storage buffer range
    Buffer {
        buffer: &'a dyn Buffer,
        offset: u64,
        range: u64,
    },
    /// Combined image sampler (image view + the image's sampler)
    Image { image: &'a dyn GpuImage },
}

/// One descriptor write
pub struct DescriptorWrite<'a> {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub resource: DescriptorResource<'a>,
}

/// Allocated descriptor set
///
/// Sets are freed with the pool that allocated them.
pub trait DescriptorSet: Send + Sync {
    /// Set index this set was allocated for
    fn set_index(&self) -> u32;

    /// Write descriptors
    fn update(&self, writes: &[DescriptorWrite]) -> Result<()>;
}

/// Descriptor pool
pub trait DescriptorPool: Send + Sync {
    /// Sizing the pool was created with
    fn desc(&self) -> &DescriptorPoolDesc;

    /// Allocate one set per layout
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the pool is exhausted (out of pool memory or fragmented).
    fn allocate(
        &mut self,
        layouts: &[&dyn DescriptorSetLayout],
    ) -> Result<Option<Vec<Box<dyn DescriptorSet>>>>;
}

// ===== RENDER PASS / FRAMEBUFFER =====

/// Attachment formats a pipeline is compatible with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassLayout {
    pub color_format: ImageFormat,
    pub depth_format: ImageFormat,
    pub samples: SampleCount,
}

/// Render pass (clear color + depth, store color, present layout)
pub trait RenderPass: Send + Sync {
    fn layout(&self) -> RenderPassLayout;
}

/// Framebuffer for one swapchain image
pub trait Framebuffer: Send + Sync {
    fn extent(&self) -> Extent2D;
}

/// Descriptor for creating a framebuffer
///
/// Attachment order: multisample color (if any), depth, swapchain image.
pub struct FramebufferDesc<'a> {
    pub render_pass: &'a dyn RenderPass,
    pub swapchain: &'a dyn Swapchain,
    pub image_index: u32,
    pub depth: &'a dyn GpuImage,
    pub multisample: Option<&'a dyn GpuImage>,
}

// ===== PIPELINE =====

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Descriptor for creating a graphics pipeline
pub struct PipelineDesc<'a> {
    pub name: &'a str,
    pub vertex_shader: &'a dyn ShaderModule,
    pub fragment_shader: &'a dyn ShaderModule,
    pub set_layouts: Vec<&'a dyn DescriptorSetLayout>,
    pub push_constants: Vec<PushConstantRange>,
    pub vertex_layout: VertexInputLayout,
    pub render_pass: RenderPassLayout,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_test: bool,
}

/// Graphics pipeline with its pipeline layout
pub trait Pipeline: Send + Sync {
    /// Render pass layout the pipeline was built against
    fn render_pass_layout(&self) -> RenderPassLayout;

    /// Push constant ranges of the pipeline layout
    fn push_constants(&self) -> &[PushConstantRange];
}

/// CommandList trait - for recording GPU commands

use crate::error::Result;
use crate::gpu::buffer::Buffer;
use crate::gpu::image::{GpuImage, ImageLayout};
use crate::gpu::pipeline::{DescriptorSet, Framebuffer, Pipeline, RenderPass};
use crate::gpu::shader::ShaderStageFlags;
use crate::gpu::swapchain::Extent2D;

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Viewport dimensions and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with depth range 0..1
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Clear value for one attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Command list for recording commands
///
/// Commands are recorded and later submitted with `GraphicsDevice::submit`.
/// `begin` implicitly resets previously recorded content.
pub trait CommandList: Send + Sync {
    /// Reset and begin recording
    fn begin(&mut self) -> Result<()>;

    /// End recording
    fn end(&mut self) -> Result<()>;

    /// Discard recorded content, leaving the list ready for `begin`
    ///
    /// Valid in any state, including in the middle of a render pass.
    fn reset(&mut self) -> Result<()>;

    /// Begin a render pass on a framebuffer
    ///
    /// # Arguments
    ///
    /// * `render_pass` - The render pass to begin
    /// * `framebuffer` - Framebuffer of the acquired swapchain image
    /// * `extent` - Render area
    /// * `clear_values` - One clear value per attachment, in attachment order
    fn begin_render_pass(
        &mut self,
        render_pass: &dyn RenderPass,
        framebuffer: &dyn Framebuffer,
        extent: Extent2D,
        clear_values: &[ClearValue],
    ) -> Result<()>;

    /// End the current render pass
    fn end_render_pass(&mut self) -> Result<()>;

    /// Set the viewport
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Set the scissor rectangle
    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()>;

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<()>;

    /// Bind descriptor sets starting at `first_set`
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline whose layout the sets are bound against
    /// * `first_set` - Set index of the first element of `sets`
    /// * `sets` - Consecutive descriptor sets
    /// * `dynamic_offsets` - One offset per dynamic binding of `sets`, in set then binding order
    fn bind_descriptor_sets(
        &mut self,
        pipeline: &dyn Pipeline,
        first_set: u32,
        sets: &[&dyn DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> Result<()>;

    /// Push constants to the pipeline
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline whose layout declares the range
    /// * `stages` - Stages that read the data
    /// * `offset` - Offset in bytes into the push constant range
    /// * `data` - Bytes to push
    fn push_constants(
        &mut self,
        pipeline: &dyn Pipeline,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Bind a vertex buffer at binding 0
    fn bind_vertex_buffer(&mut self, buffer: &dyn Buffer, offset: u64) -> Result<()>;

    /// Bind an index buffer
    fn bind_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_type: IndexType) -> Result<()>;

    /// Draw non-indexed vertices
    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<()>;

    /// Draw indexed vertices
    ///
    /// # Arguments
    ///
    /// * `index_count` - Number of indices
    /// * `first_index` - First index inside the bound index buffer
    /// * `vertex_offset` - Value added to each index before fetching the vertex
    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) -> Result<()>;

    /// Copy a byte range between buffers
    fn copy_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<()>;

    /// Copy tightly packed pixels (all layers) from a buffer into an image
    ///
    /// The image must be in `ImageLayout::TransferDst`.
    fn copy_buffer_to_image(&mut self, src: &dyn Buffer, src_offset: u64, dst: &dyn GpuImage) -> Result<()>;

    /// Transition all subresources of an image between layouts
    fn transition_image(&mut self, image: &dyn GpuImage, old: ImageLayout, new: ImageLayout) -> Result<()>;
}

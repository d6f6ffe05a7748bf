/// GraphicsDevice trait - factory for GPU resources and queue submission
///
/// Backends implement this trait once per logical device. Every component that
/// touches the GPU receives an `Arc<dyn GraphicsDevice>` explicitly; there is no
/// global device accessor.

use std::sync::Arc;
use crate::error::Result;
use crate::gpu::buffer::{Buffer, BufferDesc, BufferUsage};
use crate::gpu::command_list::CommandList;
use crate::gpu::image::{GpuImage, ImageDesc};
use crate::gpu::memory::MemoryType;
use crate::gpu::pipeline::{
    DescriptorPool, DescriptorPoolDesc, DescriptorSetLayout, Framebuffer, FramebufferDesc,
    Pipeline, PipelineDesc, RenderPass, RenderPassLayout,
};
use crate::gpu::shader::{DescriptorSetLayoutDesc, ShaderModule, ShaderStage};
use crate::gpu::swapchain::{Surface, Swapchain, SwapchainDesc};
use crate::gpu::sync::{Fence, Semaphore};

/// Physical device category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

/// Physical device description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: DeviceType,
}

/// Pick the physical device to use: the first discrete GPU, else the first
/// integrated GPU, else the first device
pub fn pick_physical_device(candidates: &[DeviceInfo]) -> Option<usize> {
    candidates
        .iter()
        .position(|info| info.device_type == DeviceType::Discrete)
        .or_else(|| candidates.iter().position(|info| info.device_type == DeviceType::Integrated))
        .or(if candidates.is_empty() { None } else { Some(0) })
}

/// Device limits relevant to sub-allocation and push constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub min_uniform_buffer_offset_alignment: u64,
    pub min_storage_buffer_offset_alignment: u64,
    pub optimal_buffer_copy_offset_alignment: u64,
    pub non_coherent_atom_size: u64,
    pub max_push_constants_size: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            optimal_buffer_copy_offset_alignment: 4,
            non_coherent_atom_size: 64,
            max_push_constants_size: 128,
        }
    }
}

impl DeviceLimits {
    /// Offset alignment a sub-buffer with `usage` must respect
    pub fn alignment_for(&self, usage: BufferUsage) -> u64 {
        // Vertex/index data is 4-byte aligned so u32 indices stay addressable
        let mut alignment = 4u64;
        if usage.contains(BufferUsage::UNIFORM) {
            alignment = alignment.max(self.min_uniform_buffer_offset_alignment);
        }
        if usage.contains(BufferUsage::STORAGE) {
            alignment = alignment.max(self.min_storage_buffer_offset_alignment);
        }
        if usage.intersects(BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST) {
            alignment = alignment.max(self.optimal_buffer_copy_offset_alignment);
        }
        alignment
    }
}

/// Queue a submission targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    Transfer,
}

/// Pipeline stage a semaphore wait blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TopOfPipe,
    Transfer,
    FragmentShader,
    ColorAttachmentOutput,
}

/// One queue submission
pub struct Submission<'a> {
    pub queue: QueueKind,
    pub command_lists: &'a [&'a dyn CommandList],
    pub wait: &'a [(&'a dyn Semaphore, PipelineStage)],
    pub signal: &'a [&'a dyn Semaphore],
    pub fence: Option<&'a dyn Fence>,
}

/// GPU device factory and queue access
pub trait GraphicsDevice: Send + Sync {
    /// Physical device description
    fn info(&self) -> DeviceInfo;

    /// Device limits
    fn limits(&self) -> DeviceLimits;

    /// Memory types of the physical device, in device order
    fn memory_types(&self) -> Vec<MemoryType>;

    /// Create a buffer bound to its own device memory allocation
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    /// Create an image with view (and sampler for sampled kinds)
    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn GpuImage>>;

    /// Create a shader module from a SPIR-V blob and reflect it
    fn create_shader_module(&self, name: &str, code: &[u8], stage: ShaderStage) -> Result<Arc<dyn ShaderModule>>;

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDesc) -> Result<Arc<dyn DescriptorSetLayout>>;

    /// Create a descriptor pool
    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn DescriptorPool>>;

    /// Create a graphics pipeline and its layout
    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<Arc<dyn Pipeline>>;

    /// Create a render pass for the given attachment layout
    fn create_render_pass(&self, layout: &RenderPassLayout) -> Result<Arc<dyn RenderPass>>;

    /// Create a framebuffer for one swapchain image
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    /// Create a resettable primary command list
    fn create_command_list(&self) -> Result<Box<dyn CommandList>>;

    /// Create a fence
    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>>;

    /// Create a swapchain for `surface`, retiring `old` if given
    fn create_swapchain(
        &self,
        surface: &dyn Surface,
        desc: &SwapchainDesc,
        old: Option<Box<dyn Swapchain>>,
    ) -> Result<Box<dyn Swapchain>>;

    /// Submit command lists to a queue
    fn submit(&self, submission: &Submission) -> Result<()>;

    /// Block until the device is idle
    fn wait_idle(&self) -> Result<()>;
}

/// Record commands into a fresh command list, submit them and wait for completion
///
/// # Arguments
///
/// * `device` - Device to record and submit on
/// * `queue` - Target queue
/// * `record` - Closure recording commands between `begin` and `end`
pub fn submit_and_wait<F>(device: &dyn GraphicsDevice, queue: QueueKind, record: F) -> Result<()>
where
    F: FnOnce(&mut dyn CommandList) -> Result<()>,
{
    let mut cmd = device.create_command_list()?;
    cmd.begin()?;
    record(cmd.as_mut())?;
    cmd.end()?;

    let fence = device.create_fence(false)?;
    let lists: [&dyn CommandList; 1] = [cmd.as_ref()];
    device.submit(&Submission {
        queue,
        command_lists: &lists,
        wait: &[],
        signal: &[],
        fence: Some(fence.as_ref()),
    })?;
    fence.wait(u64::MAX)?;
    Ok(())
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;

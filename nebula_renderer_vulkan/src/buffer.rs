/// Buffer - Vulkan implementation of the Buffer trait

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use nebula_renderer::nebula::gpu::{Buffer as GpuBuffer, BufferDesc, BufferUsage, DeviceMemoryInfo};
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_bail_warn, engine_err, engine_trace};
use std::sync::Arc;

use crate::context::GpuContext;
use crate::conversion::buffer_usage_to_vk;

/// Vulkan buffer bound to its own allocation
pub struct Buffer {
    ctx: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    memory: DeviceMemoryInfo,
    size: u64,
    usage: BufferUsage,
}

impl Buffer {
    /// Create a buffer, allocate its memory and bind it
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &BufferDesc) -> Result<Self> {
        if desc.size == 0 {
            engine_bail_warn!("nebula::vulkan", "Buffer '{}': size must be non-zero", desc.name);
        }

        unsafe {
            let create_info = vk::BufferCreateInfo::default()
                .size(desc.size)
                .usage(buffer_usage_to_vk(desc.usage))
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = ctx.device.create_buffer(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create buffer '{}' ({} bytes): {:?}", desc.name, desc.size, e))?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let (allocation, memory) = match ctx.allocate(&desc.name, requirements, desc.memory, true) {
                Ok(result) => result,
                Err(e) => {
                    ctx.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            if let Err(e) = ctx.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
                ctx.free(allocation);
                ctx.device.destroy_buffer(buffer, None);
                return Err(engine_err!("nebula::vulkan", "Failed to bind memory of buffer '{}': {:?}", desc.name, e));
            }

            engine_trace!("nebula::vulkan", "Buffer '{}' created ({} bytes)", desc.name, desc.size);

            Ok(Self {
                ctx,
                buffer,
                allocation: Some(allocation),
                memory,
                size: desc.size,
                usage: desc.usage,
            })
        }
    }
}

impl GpuBuffer for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn memory(&self) -> DeviceMemoryInfo {
        self.memory
    }

    fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr() as *mut u8)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// GpuContext - Vulkan objects shared by every resource of one device
///
/// Buffers, images, pipelines, swapchains and sync objects each keep an
/// `Arc<GpuContext>`. The context is dropped after the last of them, so the
/// device and instance are destroyed only once nothing can reference them.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use gpu_allocator::MemoryLocation;
use nebula_renderer::nebula::gpu::{
    select_memory_type, DeviceMemoryInfo, MemoryPropertyFlags, MemoryType,
};
use nebula_renderer::nebula::{Error, Result};
use nebula_renderer::{engine_err, engine_error};
use std::mem::ManuallyDrop;
use std::sync::{Mutex, MutexGuard};

use crate::conversion::memory_properties_from_vk;

pub struct GpuContext {
    /// Loader entry (keeps the Vulkan library loaded)
    pub(crate) _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,

    /// Dropped manually before the device is destroyed
    allocator: ManuallyDrop<Mutex<Allocator>>,

    pub(crate) graphics_queue: vk::Queue,
    pub(crate) graphics_queue_family: u32,
    /// Second queue of the graphics family, or the graphics queue when the family has only one
    pub(crate) transfer_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,

    /// Host synchronization of queue submission, presentation and idle waits
    queue_lock: Mutex<()>,

    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,

    /// Maximum sampler anisotropy (None when the feature is not enabled)
    pub(crate) max_anisotropy: Option<f32>,

    /// Memory types of the physical device, in device order
    pub(crate) memory_types: Vec<MemoryType>,

    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Handles created by `VulkanDevice::new` that the context takes ownership of
pub(crate) struct GpuContextDesc {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub allocator: Allocator,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub transfer_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub surface_loader: ash::khr::surface::Instance,
    pub max_anisotropy: Option<f32>,
    pub memory_types: Vec<MemoryType>,
    pub debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    pub(crate) fn new(desc: GpuContextDesc) -> Self {
        let swapchain_loader = ash::khr::swapchain::Device::new(&desc.instance, &desc.device);
        Self {
            _entry: desc.entry,
            instance: desc.instance,
            physical_device: desc.physical_device,
            device: desc.device,
            allocator: ManuallyDrop::new(Mutex::new(desc.allocator)),
            graphics_queue: desc.graphics_queue,
            graphics_queue_family: desc.graphics_queue_family,
            transfer_queue: desc.transfer_queue,
            present_queue: desc.present_queue,
            queue_lock: Mutex::new(()),
            surface_loader: desc.surface_loader,
            swapchain_loader,
            max_anisotropy: desc.max_anisotropy,
            memory_types: desc.memory_types,
            debug_utils_loader: desc.debug_utils_loader,
            debug_messenger: desc.debug_messenger,
        }
    }

    /// Lock the queues for submission or presentation
    pub(crate) fn lock_queues(&self) -> Result<MutexGuard<'_, ()>> {
        self.queue_lock
            .lock()
            .map_err(|_| engine_err!("nebula::vulkan", "Queue lock poisoned"))
    }

    /// Allocate device memory for a buffer or image
    ///
    /// # Arguments
    ///
    /// * `name` - Debug name of the owning resource
    /// * `requirements` - Requirements reported by the driver
    /// * `properties` - Memory properties the allocation must have
    /// * `linear` - True for buffers and linear images
    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        properties: MemoryPropertyFlags,
        linear: bool,
    ) -> Result<(Allocation, DeviceMemoryInfo)> {
        let location = crate::conversion::memory_location(properties);
        let mut allocator = self
            .allocator
            .lock()
            .map_err(|_| engine_err!("nebula::vulkan", "Allocator lock poisoned"))?;
        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                engine_error!("nebula::vulkan", "Out of GPU memory for '{}' ({:.2} MB): {:?}", name, size_mb, e);
                Error::OutOfMemory
            })?;

        // The allocator picks the concrete type; report the first type with the same properties
        let granted = memory_properties_from_vk(allocation.memory_properties());
        let memory_type_index = select_memory_type(&self.memory_types, requirements.memory_type_bits, granted)
            .unwrap_or(0);

        let info = DeviceMemoryInfo {
            size: allocation.size(),
            memory_type_index,
            properties,
        };
        Ok((allocation, info))
    }

    /// Return an allocation to the allocator
    pub(crate) fn free(&self, allocation: Allocation) {
        match self.allocator.lock() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    engine_error!("nebula::vulkan", "Failed to free allocation: {:?}", e);
                }
            }
            Err(_) => engine_error!("nebula::vulkan", "Allocator lock poisoned, leaking allocation"),
        }
    }

    /// Block until every queue of the device is idle
    pub(crate) fn wait_idle(&self) -> Result<()> {
        let _queues = self.lock_queues()?;
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to wait idle: {:?}", e))
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // Free VkDeviceMemory pages before the device goes away
            ManuallyDrop::drop(&mut self.allocator);

            crate::debug::cleanup_debug_config();
            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

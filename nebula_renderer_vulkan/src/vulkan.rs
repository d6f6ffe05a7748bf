/// VulkanDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Owns nothing but an `Arc<GpuContext>`; every resource created through it
/// holds its own reference to the same context.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use nebula_renderer::nebula::gpu::{
    pick_physical_device, Buffer as GpuBuffer, BufferDesc, CommandList as GpuCommandList,
    DescriptorPool as GpuDescriptorPool, DescriptorPoolDesc, DescriptorSetLayout as GpuDescriptorSetLayout,
    DescriptorSetLayoutDesc, DeviceInfo, DeviceLimits, Fence as GpuFence, Framebuffer as GpuFramebuffer,
    FramebufferDesc, GpuImage, GraphicsDevice, ImageDesc, MemoryType, Pipeline as GpuPipeline, PipelineDesc,
    QueueKind, RenderPass as GpuRenderPass, RenderPassLayout, Semaphore as GpuSemaphore,
    ShaderModule as GpuShaderModule, ShaderStage, Submission, Surface, Swapchain as GpuSwapchain, SwapchainDesc,
};
use nebula_renderer::nebula::{Config, Error, Result};
use nebula_renderer::{engine_debug, engine_err, engine_error, engine_info, engine_warn};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::buffer::Buffer;
use crate::command_list::CommandList;
use crate::context::{GpuContext, GpuContextDesc};
use crate::conversion::{
    debug_severity_flags, device_type_from_vk, graphics_family_queues, memory_properties_from_vk, pipeline_stage_to_vk,
};
use crate::descriptor::{DescriptorPool, DescriptorSetLayout};
use crate::image::Image;
use crate::pipeline::Pipeline;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::shader::ShaderModule;
use crate::swapchain::{Swapchain, VulkanSurface};
use crate::sync::{Fence, Semaphore};

fn init_failed(message: String) -> Error {
    engine_error!("nebula::vulkan", "{}", message);
    Error::InitializationFailed(message)
}

/// Physical device usable for rendering to the window surface
struct Candidate {
    physical_device: vk::PhysicalDevice,
    info: DeviceInfo,
    graphics_family: u32,
    graphics_queue_count: u32,
    present_family: u32,
}

pub struct VulkanDevice {
    ctx: Arc<GpuContext>,
    info: DeviceInfo,
    limits: DeviceLimits,
}

impl VulkanDevice {
    /// Create the instance, pick a physical device and create the logical device
    ///
    /// # Arguments
    ///
    /// * `window` - Window used to choose a device able to present to it
    /// * `config` - Renderer configuration (validation settings)
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(window: &W, config: &Config) -> Result<Self> {
        let validation = cfg!(feature = "vulkan-validation") && config.enable_validation;
        if config.enable_validation && !validation {
            engine_warn!("nebula::vulkan", "Validation requested but the 'vulkan-validation' feature is disabled");
        }

        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| init_failed(format!("Failed to load Vulkan library: {:?}", e)))?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Nebula")
                .application_version(vk::make_api_version(0, 0, 1, 0))
                .engine_name(c"Nebula")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window.display_handle()
                .map_err(|e| init_failed(format!("Failed to get display handle: {}", e)))?;
            let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| init_failed(format!("Failed to get required extensions: {}", e)))?
                .to_vec();

            if validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None)
                .map_err(|e| init_failed(format!("Failed to create instance: {:?}", e)))?;

            let (debug_utils_loader, debug_messenger) = if validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                crate::debug::init_debug_config(config.debug_severity);

                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(debug_severity_flags(config.debug_severity))
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

                match debug_utils.create_debug_utils_messenger(&debug_info, None) {
                    Ok(messenger) => (Some(debug_utils), Some(messenger)),
                    Err(e) => {
                        crate::debug::cleanup_debug_config();
                        instance.destroy_instance(None);
                        return Err(init_failed(format!("Failed to create debug messenger: {:?}", e)));
                    }
                }
            } else {
                (None, None)
            };

            // From here on, failures must release the instance and messenger
            let destroy_instance = || {
                if let (Some(debug_utils), Some(messenger)) = (&debug_utils_loader, debug_messenger) {
                    debug_utils.destroy_debug_utils_messenger(messenger, None);
                    crate::debug::cleanup_debug_config();
                }
                instance.destroy_instance(None);
            };

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            // Temporary surface for queue selection
            let window_handle = match window.window_handle() {
                Ok(handle) => handle,
                Err(e) => {
                    destroy_instance();
                    return Err(init_failed(format!("Failed to get window handle: {}", e)));
                }
            };
            let surface = match ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            ) {
                Ok(surface) => surface,
                Err(e) => {
                    destroy_instance();
                    return Err(init_failed(format!("Failed to create surface: {:?}", e)));
                }
            };

            let candidates = Self::candidates(&instance, &surface_loader, surface);
            surface_loader.destroy_surface(surface, None);

            let candidates = match candidates {
                Ok(candidates) => candidates,
                Err(e) => {
                    destroy_instance();
                    return Err(e);
                }
            };
            let infos: Vec<DeviceInfo> = candidates.iter().map(|c| c.info.clone()).collect();
            let Some(Candidate { physical_device, info, graphics_family, graphics_queue_count, present_family }) =
                pick_physical_device(&infos).and_then(|chosen| candidates.into_iter().nth(chosen))
            else {
                destroy_instance();
                return Err(init_failed("No Vulkan device can render to this window".to_string()));
            };

            engine_info!("nebula::vulkan", "Using '{}' ({:?})", info.name, info.device_type);

            let properties = instance.get_physical_device_properties(physical_device);
            let limits = DeviceLimits {
                min_uniform_buffer_offset_alignment: properties.limits.min_uniform_buffer_offset_alignment,
                min_storage_buffer_offset_alignment: properties.limits.min_storage_buffer_offset_alignment,
                optimal_buffer_copy_offset_alignment: properties.limits.optimal_buffer_copy_offset_alignment,
                non_coherent_atom_size: properties.limits.non_coherent_atom_size,
                max_push_constants_size: properties.limits.max_push_constants_size,
            };

            let memory_properties = instance.get_physical_device_memory_properties(physical_device);
            let memory_types: Vec<MemoryType> = memory_properties.memory_types
                [..memory_properties.memory_type_count as usize]
                .iter()
                .map(|ty| MemoryType {
                    properties: memory_properties_from_vk(ty.property_flags),
                    heap_index: ty.heap_index,
                })
                .collect();

            let supported_features = instance.get_physical_device_features(physical_device);
            let anisotropy = supported_features.sampler_anisotropy == vk::TRUE;
            let max_anisotropy = anisotropy.then_some(properties.limits.max_sampler_anisotropy);

            // Logical device
            let (graphics_queues, transfer_index) = graphics_family_queues(graphics_queue_count);
            let queue_priorities = [1.0, 1.0];
            let mut queue_create_infos = vec![
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family)
                    .queue_priorities(&queue_priorities[..graphics_queues as usize]),
            ];
            if present_family != graphics_family {
                queue_create_infos.push(
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family)
                        .queue_priorities(&queue_priorities[..1]),
                );
            }

            let device_extension_names = [ash::khr::swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);

            let device = match instance.create_device(physical_device, &device_create_info, None) {
                Ok(device) => device,
                Err(e) => {
                    destroy_instance();
                    return Err(init_failed(format!("Failed to create device: {:?}", e)));
                }
            };

            let graphics_queue = device.get_device_queue(graphics_family, 0);
            let transfer_queue = device.get_device_queue(graphics_family, transfer_index);
            let present_queue = device.get_device_queue(present_family, 0);
            engine_debug!("nebula::vulkan", "Graphics family {}: {} queue(s), transfers on queue {}",
                graphics_family, graphics_queues, transfer_index);

            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    destroy_instance();
                    return Err(init_failed(format!("Failed to create allocator: {:?}", e)));
                }
            };

            // GpuContext owns device, instance and debug messenger destruction
            let ctx = Arc::new(GpuContext::new(GpuContextDesc {
                entry,
                instance,
                physical_device,
                device,
                allocator,
                graphics_queue,
                graphics_queue_family: graphics_family,
                transfer_queue,
                present_queue,
                surface_loader,
                max_anisotropy,
                memory_types,
                debug_utils_loader,
                debug_messenger,
            }));

            Ok(Self { ctx, info, limits })
        }
    }

    /// Physical devices with a graphics queue and a queue able to present to `surface`
    unsafe fn candidates(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<Candidate>> {
        let physical_devices = instance.enumerate_physical_devices()
            .map_err(|e| init_failed(format!("Failed to enumerate physical devices: {:?}", e)))?;

        let mut candidates = Vec::new();
        for physical_device in physical_devices {
            let properties = instance.get_physical_device_properties(physical_device);
            let name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let queue_families = instance.get_physical_device_queue_family_properties(physical_device);
            let graphics = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, qf)| (i as u32, qf.queue_count));
            let present_family = (0..queue_families.len() as u32).find(|&i| {
                surface_loader
                    .get_physical_device_surface_support(physical_device, i, surface)
                    .unwrap_or(false)
            });

            match (graphics, present_family) {
                (Some((graphics_family, graphics_queue_count)), Some(present_family)) => candidates.push(Candidate {
                    physical_device,
                    info: DeviceInfo { name, device_type: device_type_from_vk(properties.device_type) },
                    graphics_family,
                    graphics_queue_count,
                    present_family,
                }),
                _ => {
                    engine_info!("nebula::vulkan", "Skipping '{}': no graphics or present queue", name);
                }
            }
        }
        Ok(candidates)
    }

    /// Create the presentation surface of a window
    ///
    /// The surface keeps the window alive; views query its inner size.
    pub fn create_surface(&self, window: Arc<Window>) -> Result<Arc<dyn Surface>> {
        Ok(Arc::new(VulkanSurface::new(Arc::clone(&self.ctx), window)?))
    }
}

impl GraphicsDevice for VulkanDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn memory_types(&self) -> Vec<MemoryType> {
        self.ctx.memory_types.clone()
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn GpuBuffer>> {
        Ok(Arc::new(Buffer::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn GpuImage>> {
        Ok(Arc::new(Image::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_shader_module(&self, name: &str, code: &[u8], stage: ShaderStage) -> Result<Arc<dyn GpuShaderModule>> {
        Ok(Arc::new(ShaderModule::new(Arc::clone(&self.ctx), name, code, stage)?))
    }

    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDesc) -> Result<Arc<dyn GpuDescriptorSetLayout>> {
        Ok(Arc::new(DescriptorSetLayout::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn GpuDescriptorPool>> {
        Ok(Box::new(DescriptorPool::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<Arc<dyn GpuPipeline>> {
        Ok(Arc::new(Pipeline::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> Result<Arc<dyn GpuRenderPass>> {
        Ok(Arc::new(RenderPass::new(Arc::clone(&self.ctx), layout)?))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn GpuFramebuffer>> {
        Ok(Arc::new(Framebuffer::new(Arc::clone(&self.ctx), desc)?))
    }

    fn create_command_list(&self) -> Result<Box<dyn GpuCommandList>> {
        Ok(Box::new(CommandList::new(Arc::clone(&self.ctx))?))
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn GpuFence>> {
        Ok(Box::new(Fence::new(Arc::clone(&self.ctx), signaled)?))
    }

    fn create_semaphore(&self) -> Result<Box<dyn GpuSemaphore>> {
        Ok(Box::new(Semaphore::new(Arc::clone(&self.ctx))?))
    }

    fn create_swapchain(
        &self,
        surface: &dyn Surface,
        desc: &SwapchainDesc,
        old: Option<Box<dyn GpuSwapchain>>,
    ) -> Result<Box<dyn GpuSwapchain>> {
        // Surfaces are always created by `VulkanDevice::create_surface`
        let surface = unsafe { &*(surface as *const dyn Surface as *const VulkanSurface) };
        Ok(Box::new(Swapchain::new(Arc::clone(&self.ctx), surface, desc, old)?))
    }

    fn submit(&self, submission: &Submission) -> Result<()> {
        let command_buffers: Vec<vk::CommandBuffer> = submission
            .command_lists
            .iter()
            .map(|list| {
                let list = unsafe { &*(*list as *const dyn GpuCommandList as *const CommandList) };
                list.command_buffer
            })
            .collect();
        let (wait_semaphores, wait_stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) = submission
            .wait
            .iter()
            .map(|(semaphore, stage)| {
                let semaphore = unsafe { &*(*semaphore as *const dyn GpuSemaphore as *const Semaphore) };
                (semaphore.semaphore, pipeline_stage_to_vk(*stage))
            })
            .unzip();
        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signal
            .iter()
            .map(|semaphore| {
                let semaphore = unsafe { &*(*semaphore as *const dyn GpuSemaphore as *const Semaphore) };
                semaphore.semaphore
            })
            .collect();
        let fence = submission
            .fence
            .map(|fence| {
                let fence = unsafe { &*(fence as *const dyn GpuFence as *const Fence) };
                fence.fence
            })
            .unwrap_or(vk::Fence::null());

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let queue = match submission.queue {
            QueueKind::Graphics => self.ctx.graphics_queue,
            QueueKind::Transfer => self.ctx.transfer_queue,
        };

        let _queues = self.ctx.lock_queues()?;
        unsafe {
            self.ctx.device
                .queue_submit(queue, std::slice::from_ref(&submit_info), fence)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to submit {} command list(s) to {:?} queue: {:?}",
                    command_buffers.len(), submission.queue, e))
        }
    }

    fn wait_idle(&self) -> Result<()> {
        self.ctx.wait_idle()
    }
}

/// Surface and swapchain - Vulkan implementation of the Surface and Swapchain traits
///
/// A swapchain only manages images and presentation. Synchronization objects
/// belong to the view that drives it and are passed in per call.

use ash::vk;
use nebula_renderer::nebula::gpu::{
    AcquireResult, Extent2D, ImageFormat, PresentResult, Semaphore as GpuSemaphore, Surface,
    Swapchain as GpuSwapchain, SwapchainDesc,
};
use nebula_renderer::nebula::{Error, Result};
use nebula_renderer::{engine_debug, engine_err, engine_error};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::context::GpuContext;
use crate::conversion::image_format_from_vk;
use crate::sync::Semaphore;

// ===== SURFACE =====

/// Window surface
///
/// Reports the window's inner size as its current extent.
pub struct VulkanSurface {
    ctx: Arc<GpuContext>,
    pub(crate) surface: vk::SurfaceKHR,
    window: Arc<Window>,
}

impl VulkanSurface {
    pub(crate) fn new(ctx: Arc<GpuContext>, window: Arc<Window>) -> Result<Self> {
        let display_handle = window.display_handle().map_err(|e| {
            engine_error!("nebula::vulkan", "Failed to get display handle: {}", e);
            Error::InitializationFailed(format!("Failed to get display handle: {}", e))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            engine_error!("nebula::vulkan", "Failed to get window handle: {}", e);
            Error::InitializationFailed(format!("Failed to get window handle: {}", e))
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                &ctx._entry,
                &ctx.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                engine_error!("nebula::vulkan", "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?
        };

        let supported = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_support(ctx.physical_device, ctx.graphics_queue_family, surface)
                .unwrap_or(false)
        };
        if !supported {
            engine_debug!("nebula::vulkan", "Graphics queue family cannot present to this surface, using the present queue");
        }

        Ok(Self { ctx, surface, window })
    }

    /// Window the surface was created for
    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl Surface for VulkanSurface {
    fn current_extent(&self) -> Extent2D {
        self.window.inner_size().into()
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.ctx.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

// ===== SELECTION =====

/// Preferred surface format: sRGB BGRA/RGBA, else the first reported format
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            (f.format == vk::Format::B8G8R8A8_SRGB || f.format == vk::Format::R8G8B8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.iter().find(|f| image_format_from_vk(f.format).is_some()))
        .copied()
}

/// FIFO with vsync; otherwise MAILBOX, then IMMEDIATE, then FIFO (always supported)
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Surface extent when fixed by the platform, else the requested extent clamped to the limits
pub(crate) fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image more than the minimum, within the maximum (0 means unbounded)
pub(crate) fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

// ===== SWAPCHAIN =====

pub struct Swapchain {
    ctx: Arc<GpuContext>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    pub(crate) image_views: Vec<vk::ImageView>,
    format: ImageFormat,
    pub(crate) extent: Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface`, retiring `old`
    ///
    /// The retired swapchain is destroyed once the new one exists.
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        surface: &VulkanSurface,
        desc: &SwapchainDesc,
        old: Option<Box<dyn GpuSwapchain>>,
    ) -> Result<Self> {
        unsafe {
            let capabilities = ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, surface.surface)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to get surface capabilities: {:?}", e))?;
            let formats = ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, surface.surface)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to get surface formats: {:?}", e))?;
            let modes = ctx.surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, surface.surface)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to get present modes: {:?}", e))?;

            let Some(surface_format) = choose_surface_format(&formats) else {
                return Err(engine_err!("nebula::vulkan", "Surface reports no usable format ({} formats)", formats.len()));
            };
            let Some(format) = image_format_from_vk(surface_format.format) else {
                return Err(engine_err!("nebula::vulkan", "Unsupported surface format {:?}", surface_format.format));
            };
            let extent = choose_extent(&capabilities, desc.extent);
            let present_mode = choose_present_mode(&modes, desc.vsync);

            let old_handle = match old.as_ref() {
                Some(old) => {
                    let old = &*(old.as_ref() as *const dyn GpuSwapchain as *const Swapchain);
                    old.swapchain
                }
                None => vk::SwapchainKHR::null(),
            };

            let create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(surface.surface)
                .min_image_count(choose_image_count(&capabilities))
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(present_mode)
                .clipped(true)
                .old_swapchain(old_handle);

            let swapchain = ctx.swapchain_loader.create_swapchain(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create swapchain ({}x{}): {:?}",
                    extent.width, extent.height, e))?;

            // Retired swapchain goes away now that the new one owns the surface
            drop(old);

            let mut this = Self {
                ctx,
                swapchain,
                images: Vec::new(),
                image_views: Vec::new(),
                format,
                extent: Extent2D::new(extent.width, extent.height),
            };

            this.images = this.ctx.swapchain_loader.get_swapchain_images(swapchain)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to get swapchain images: {:?}", e))?;

            for &image in &this.images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                let view = this.ctx.device.create_image_view(&view_info, None)
                    .map_err(|e| engine_err!("nebula::vulkan", "Failed to create swapchain image view: {:?}", e))?;
                this.image_views.push(view);
            }

            engine_debug!("nebula::vulkan", "Swapchain created: {}x{}, {} images, {:?}, {:?}",
                extent.width, extent.height, this.images.len(), format, present_mode);

            Ok(this)
        }
    }
}

impl GpuSwapchain for Swapchain {
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> Extent2D {
        self.extent
    }

    fn format(&self) -> ImageFormat {
        self.format
    }

    fn acquire_next_image(&mut self, timeout_ns: u64, signal: &dyn GpuSemaphore) -> Result<AcquireResult> {
        let signal = unsafe { &*(signal as *const dyn GpuSemaphore as *const Semaphore) };
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                signal.semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Ok(AcquireResult::Timeout),
            Err(e) => Err(engine_err!("nebula::vulkan", "Failed to acquire swapchain image: {:?}", e)),
        }
    }

    fn present(&mut self, image_index: u32, wait: &dyn GpuSemaphore) -> Result<PresentResult> {
        let wait = unsafe { &*(wait as *const dyn GpuSemaphore as *const Semaphore) };
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait.semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let _queues = self.ctx.lock_queues()?;
        let result = unsafe {
            self.ctx.swapchain_loader.queue_present(self.ctx.present_queue, &present_info)
        };
        match result {
            Ok(false) => Ok(PresentResult::Optimal),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::OutOfDate),
            Err(e) => Err(engine_err!("nebula::vulkan", "Failed to present swapchain image {}: {:?}", image_index, e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            // Presentation may still read the images
            if let Err(e) = self.ctx.wait_idle() {
                engine_error!("nebula::vulkan", "Swapchain drop: {}", e);
            }
            for &view in &self.image_views {
                self.ctx.device.destroy_image_view(view, None);
            }
            self.ctx.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
#[path = "swapchain_tests.rs"]
mod tests;

/// Surface and swapchain traits

use crate::error::Result;
use crate::gpu::image::ImageFormat;
use crate::gpu::sync::Semaphore;

/// 2D extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-sized surface
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width / height (1.0 for empty extents)
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl From<winit::dpi::PhysicalSize<u32>> for Extent2D {
    fn from(size: winit::dpi::PhysicalSize<u32>) -> Self {
        Self::new(size.width, size.height)
    }
}

/// Presentation surface of one window
///
/// The surface outlives every swapchain created for it.
pub trait Surface: Send + Sync {
    /// Current drawable size of the surface
    fn current_extent(&self) -> Extent2D;
}

/// Parameters for swapchain creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Requested extent (clamped to surface capabilities by the backend)
    pub extent: Extent2D,
    /// FIFO presentation when true, MAILBOX/IMMEDIATE otherwise
    pub vsync: bool,
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// Image acquired; `suboptimal` asks for recreation after this frame
    Acquired { image_index: u32, suboptimal: bool },
    /// Swapchain no longer matches the surface
    OutOfDate,
    /// No image became available within the timeout
    Timeout,
}

/// Result of presenting a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// Swapchain of one surface
pub trait Swapchain: Send + Sync {
    /// Number of swapchain images
    fn image_count(&self) -> u32;

    /// Extent of the swapchain images
    fn extent(&self) -> Extent2D;

    /// Color format of the swapchain images
    fn format(&self) -> ImageFormat;

    /// Acquire the next image, signaling `signal` when it is ready
    fn acquire_next_image(&mut self, timeout_ns: u64, signal: &dyn Semaphore) -> Result<AcquireResult>;

    /// Present `image_index` once `wait` is signaled
    fn present(&mut self, image_index: u32, wait: &dyn Semaphore) -> Result<PresentResult>;
}

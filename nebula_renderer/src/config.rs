//! Renderer configuration
//!
//! Every capacity in here is fixed at process start. The defaults are the
//! compiled-in constants; applications override fields before handing the
//! config to the backend and to `Renderer::new`.

use std::time::Duration;

/// Capacity of the global vertex/index pool (64 MiB)
pub const GEOMETRY_POOL_CAPACITY: u64 = 64 * 1024 * 1024;

/// Capacity of the global uniform pool (4 MiB)
pub const UNIFORM_POOL_CAPACITY: u64 = 4 * 1024 * 1024;

/// Capacity of the global transfer staging pool (64 MiB)
pub const STAGING_POOL_CAPACITY: u64 = 64 * 1024 * 1024;

/// Maximum number of simultaneously active views
pub const MAX_VIEWS: usize = 4;

/// Swapchain images per view that get their own camera slot
pub const MAX_SWAPCHAIN_IMAGES: u32 = 8;

/// Number of worker threads for CPU-side asset jobs
pub const WORKER_THREADS: usize = 2;

/// Initial instance capacity of a material's descriptor pool
pub const DEFAULT_MATERIAL_INSTANCES: u32 = 16;

/// Edge length of the checkerboard placeholder texture
pub const PLACEHOLDER_SIZE: u32 = 64;

/// Swapchain image acquisition timeout (1 second)
pub const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Sleep after an out-of-date present before the next frame
pub const OUT_OF_DATE_BACKOFF: Duration = Duration::from_millis(16);

/// Validation message severity filter for the backend debug messenger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    /// Only validation errors
    ErrorsOnly,
    /// Errors and warnings
    ErrorsAndWarnings,
    /// Everything including info and verbose messages
    All,
}

/// MSAA sample count used by views and material pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleCount {
    S1,
    S2,
    S4,
    S8,
}

impl SampleCount {
    /// Number of samples per pixel
    pub fn count(self) -> u32 {
        match self {
            SampleCount::S1 => 1,
            SampleCount::S2 => 2,
            SampleCount::S4 => 4,
            SampleCount::S8 => 8,
        }
    }

    /// True when a separate multisample color image is required
    pub fn is_multisampled(self) -> bool {
        self != SampleCount::S1
    }
}

/// Renderer configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable Vulkan validation layers (requires the `vulkan-validation` feature)
    pub enable_validation: bool,
    /// Validation message filter
    pub debug_severity: DebugSeverity,
    /// Prefer FIFO presentation (vsync)
    pub vsync: bool,
    /// Capacity of the global vertex/index pool in bytes
    pub geometry_pool_capacity: u64,
    /// Capacity of the global uniform pool in bytes
    pub uniform_pool_capacity: u64,
    /// Capacity of the global staging pool in bytes
    pub staging_pool_capacity: u64,
    /// Size of the bounded view array
    pub max_views: usize,
    /// Upper bound on a view's swapchain image count (sizes the camera slots)
    pub max_swapchain_images: u32,
    /// Worker threads of the task pool
    pub worker_threads: usize,
    /// Initial instance capacity for new materials
    pub material_instance_capacity: u32,
    /// Edge length of the placeholder texture
    pub placeholder_size: u32,
    /// Timeout handed to swapchain image acquisition
    pub acquire_timeout_ns: u64,
    /// Sleep after an out-of-date present
    pub out_of_date_backoff: Duration,
    /// MSAA sample count for view color targets
    pub samples: SampleCount,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            vsync: true,
            geometry_pool_capacity: GEOMETRY_POOL_CAPACITY,
            uniform_pool_capacity: UNIFORM_POOL_CAPACITY,
            staging_pool_capacity: STAGING_POOL_CAPACITY,
            max_views: MAX_VIEWS,
            max_swapchain_images: MAX_SWAPCHAIN_IMAGES,
            worker_threads: WORKER_THREADS,
            material_instance_capacity: DEFAULT_MATERIAL_INSTANCES,
            placeholder_size: PLACEHOLDER_SIZE,
            acquire_timeout_ns: ACQUIRE_TIMEOUT_NS,
            out_of_date_backoff: OUT_OF_DATE_BACKOFF,
            samples: SampleCount::S1,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

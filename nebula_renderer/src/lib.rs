/*!
# Nebula Renderer

GPU resource and frame-rendering core of the Nebula real-time 3D renderer.

The crate is backend-agnostic: every GPU object is reached through the trait
objects of [`gpu`] (`GraphicsDevice`, `Buffer`, `GpuImage`, `Swapchain`, ...).
Backends (the `nebula_renderer_vulkan` crate) implement these traits; the
core builds everything else on top of them.

## Architecture

- **BufferPool**: one large buffer sub-allocated into non-overlapping regions
- **Image**: depth, multisample, texture and cubemap images with staged uploads
- **Shader / Material**: reflected shader pairs, pipelines and descriptor pools
- **Scene**: one model packed into pool sub-buffers with per-material draws
- **View**: swapchain, framebuffers and frame synchronization of one surface
- **Renderer**: owner of all of the above, driven by `tick`
- **TaskPool**: worker threads for CPU-side jobs such as image decoding
*/

// Internal modules
mod error;
mod renderer;
pub mod log;
pub mod config;
pub mod camera;
pub mod gpu;
pub mod resource;
pub mod asset;
pub mod scene;
pub mod view;
pub mod task;

// Main nebula namespace module
pub mod nebula {
    // Error types
    pub use crate::error::{Error, Result};

    // Renderer and its configuration
    pub use crate::renderer::{FrameStats, MaterialKey, Renderer, SceneKey, DEFAULT_MATERIAL};
    pub use crate::config::{Config, DebugSeverity, SampleCount};
    pub use crate::camera::{vulkan_perspective, CameraData};

    // Logging sub-module (types and logger slot, NOT macros)
    pub mod log {
        pub use crate::log::{
            min_severity, reset_logger, set_logger, set_min_severity, DefaultLogger, LogEntry,
            LogSeverity, Logger,
        };
    }

    // Backend seam
    pub mod gpu {
        pub use crate::gpu::*;
    }

    pub mod resource {
        pub use crate::resource::*;
    }

    pub mod asset {
        pub use crate::asset::*;
    }

    pub mod scene {
        pub use crate::scene::*;
    }

    pub mod view {
        pub use crate::view::*;
    }

    pub mod task {
        pub use crate::task::*;
    }
}

// Re-export math library at crate root
pub use glam;

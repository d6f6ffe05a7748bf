/*!
# Nebula Renderer - Vulkan Backend

Vulkan implementation of the `nebula_renderer` GPU traits.

This crate implements `GraphicsDevice` and every resource trait of
`nebula_renderer::nebula::gpu` using the Ash library for Vulkan bindings,
gpu-allocator for memory management and spirq for shader reflection.

```no_run
use nebula_renderer::nebula::{Config, Renderer};
use nebula_renderer_vulkan::VulkanDevice;
use std::sync::Arc;
# fn run(window: Arc<winit::window::Window>, vertex: nebula_renderer::nebula::resource::ShaderSource,
#        fragment: nebula_renderer::nebula::resource::ShaderSource) -> nebula_renderer::nebula::Result<()> {
let config = Config::default();
let device = Arc::new(VulkanDevice::new(window.as_ref(), &config)?);
let surface = device.create_surface(Arc::clone(&window))?;

let mut renderer = Renderer::new(device, config, vertex, fragment)?;
renderer.add_view(surface)?;
renderer.tick(0.016)?;
# Ok(())
# }
```
*/

mod context;
mod conversion;
mod debug;
mod buffer;
mod image;
mod shader;
mod descriptor;
mod render_pass;
mod pipeline;
mod command_list;
mod sync;
mod swapchain;
mod vulkan;

pub use vulkan::VulkanDevice;
pub use swapchain::VulkanSurface;

// Re-export debug utilities
pub use debug::{print_validation_stats_report, validation_stats, ValidationStats};

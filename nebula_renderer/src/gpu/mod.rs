/// GPU abstraction module - backend-agnostic device and resource traits

pub mod memory;
pub mod buffer;
pub mod image;
pub mod shader;
pub mod pipeline;
pub mod command_list;
pub mod swapchain;
pub mod sync;
pub mod device;

#[cfg(test)]
pub(crate) mod mock_device;

pub use memory::*;
pub use buffer::*;
pub use image::*;
pub use shader::*;
pub use pipeline::*;
pub use command_list::*;
pub use swapchain::*;
pub use sync::*;
pub use device::*;

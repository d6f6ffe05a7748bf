/// Resource module - buffer pools, images, shaders and materials built on the GPU traits

pub mod buffer_pool;
pub mod image;
pub mod shader;
pub mod material;

pub use buffer_pool::{BufferBinding, BufferPool, MappedRange, SubBuffer, SubBufferId};
pub use image::Image;
pub use shader::{Shader, ShaderSource};
pub use material::{
    DescriptorWriteInfo, Material, MaterialDesc, MaterialInstance, MaterialInstanceKey,
    WrittenResource,
};

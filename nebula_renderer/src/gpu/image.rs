/// GPU image trait, image kinds and descriptors
///
/// Depth, multisample, texture and cubemap images share one creation path.
/// They differ only in the flags derived from their `ImageKind`.

use bitflags::bitflags;
use crate::config::SampleCount;
use crate::gpu::memory::{DeviceMemoryInfo, MemoryPropertyFlags};

/// Image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    D16_UNORM,
    D32_FLOAT,
    D24_UNORM_S8_UINT,
}

impl ImageFormat {
    /// Bytes per texel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            ImageFormat::D16_UNORM => 2,
            _ => 4,
        }
    }

    /// True for depth (and depth/stencil) formats
    pub fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::D16_UNORM | ImageFormat::D32_FLOAT | ImageFormat::D24_UNORM_S8_UINT)
    }
}

bitflags! {
    /// Image aspect flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 0b001;
        const DEPTH = 0b010;
        const STENCIL = 0b100;
    }
}

bitflags! {
    /// Image usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 0b0000_0001;
        const TRANSFER_DST = 0b0000_0010;
        const SAMPLED = 0b0000_0100;
        const COLOR_ATTACHMENT = 0b0001_0000;
        const DEPTH_STENCIL_ATTACHMENT = 0b0010_0000;
        const TRANSIENT_ATTACHMENT = 0b0100_0000;
    }
}

/// Image layouts used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    PresentSrc,
}

/// View dimensionality of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageViewType {
    D2,
    Cube,
}

/// Kind of image, selected at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Depth attachment of a view
    Depth,
    /// Multisampled color attachment resolved into the swapchain image
    Multisample,
    /// Sampled 2D texture with pixel upload
    Texture,
    /// Sampled cubemap (6 layers) with pixel upload
    Cubemap,
}

impl ImageKind {
    /// Aspect mask of the image view and barriers
    pub fn aspect(&self, format: ImageFormat) -> ImageAspect {
        match self {
            ImageKind::Depth if format == ImageFormat::D24_UNORM_S8_UINT => {
                ImageAspect::DEPTH | ImageAspect::STENCIL
            }
            ImageKind::Depth => ImageAspect::DEPTH,
            _ => ImageAspect::COLOR,
        }
    }

    /// Usage flags the image is created with
    pub fn usage(&self) -> ImageUsage {
        match self {
            ImageKind::Depth => ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            ImageKind::Multisample => ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSIENT_ATTACHMENT,
            ImageKind::Texture | ImageKind::Cubemap => ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        }
    }

    /// Number of array layers
    pub fn layer_count(&self) -> u32 {
        match self {
            ImageKind::Cubemap => 6,
            _ => 1,
        }
    }

    /// Cubemaps need the cube-compatible create flag
    pub fn cube_compatible(&self) -> bool {
        matches!(self, ImageKind::Cubemap)
    }

    /// View type of the image view
    pub fn view_type(&self) -> ImageViewType {
        match self {
            ImageKind::Cubemap => ImageViewType::Cube,
            _ => ImageViewType::D2,
        }
    }

    /// Sampled images get their own sampler
    pub fn has_sampler(&self) -> bool {
        matches!(self, ImageKind::Texture | ImageKind::Cubemap)
    }

    /// Images that receive pixel data through the staging pool
    pub fn receives_pixels(&self) -> bool {
        matches!(self, ImageKind::Texture | ImageKind::Cubemap)
    }

    /// Memory properties of the backing allocation
    pub fn memory_properties(&self) -> MemoryPropertyFlags {
        MemoryPropertyFlags::DEVICE_LOCAL
    }
}

/// Descriptor for creating a GPU image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDesc {
    /// Debug name
    pub name: String,
    /// Image kind (drives aspect, usage, layers, view type)
    pub kind: ImageKind,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: ImageFormat,
    /// Sample count (only Multisample and Depth images use more than one)
    pub samples: SampleCount,
}

impl ImageDesc {
    /// Byte size of tightly packed pixel data for all layers
    pub fn pixel_data_size(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.format.bytes_per_pixel() as u64
            * self.kind.layer_count() as u64
    }
}

/// GPU image resource trait
///
/// Owns the image handle, its view, an optional sampler and its device memory.
/// Everything is destroyed when the image is dropped.
pub trait GpuImage: Send + Sync {
    /// Descriptor the image was created from
    fn desc(&self) -> &ImageDesc;

    /// Backing allocation
    fn memory(&self) -> DeviceMemoryInfo;

    /// True when a sampler was created with the image
    fn has_sampler(&self) -> bool;
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;

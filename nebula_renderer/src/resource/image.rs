/// Image resource: depth, multisample, texture and cubemap images
///
/// All kinds share one creation path. The backend creates the image, binds a
/// dedicated allocation with the kind's memory properties, builds the view and
/// (for sampled kinds) the sampler, in that order. Textures and cubemaps then
/// receive their pixels through the staging pool:
///
/// 1. transition Undefined -> TransferDst, signal `ready_for_copy`
/// 2. copy staging -> image, wait `ready_for_copy`, signal `copy_done`
/// 3. transition TransferDst -> ShaderReadOnly, wait `copy_done`, fence
///
/// Pixel data that does not match the image extent is replaced by the
/// magenta/black checkerboard instead of failing the image.

use std::sync::Arc;
use crate::asset::DecodedImage;
use crate::config::SampleCount;
use crate::error::Result;
use crate::gpu::{
    CommandList, Extent2D, GpuImage, GraphicsDevice, ImageDesc, ImageFormat, ImageKind,
    ImageLayout, PipelineStage, QueueKind, Submission,
};
use crate::resource::buffer_pool::BufferPool;
use crate::{engine_bail_warn, engine_debug, engine_warn};

/// GPU image with its current layout
pub struct Image {
    device: Arc<dyn GraphicsDevice>,
    desc: ImageDesc,
    gpu: Option<Arc<dyn GpuImage>>,
    layout: ImageLayout,
    placeholder: bool,
}

impl Image {
    /// Create an attachment image (depth or multisample color)
    pub fn create(device: Arc<dyn GraphicsDevice>, desc: ImageDesc) -> Result<Self> {
        if desc.kind.receives_pixels() {
            engine_bail_warn!("nebula::Image", "Image '{}' of kind {:?} needs pixel data", desc.name, desc.kind);
        }
        let mut image = Self {
            device,
            desc,
            gpu: None,
            layout: ImageLayout::Undefined,
            placeholder: false,
        };
        image.build()?;
        Ok(image)
    }

    /// Depth attachment of a view
    pub fn depth(device: Arc<dyn GraphicsDevice>, name: &str, extent: Extent2D, format: ImageFormat, samples: SampleCount) -> Result<Self> {
        Self::create(device, ImageDesc {
            name: name.to_string(),
            kind: ImageKind::Depth,
            width: extent.width,
            height: extent.height,
            format,
            samples,
        })
    }

    /// Multisample color attachment of a view
    pub fn multisample(device: Arc<dyn GraphicsDevice>, name: &str, extent: Extent2D, format: ImageFormat, samples: SampleCount) -> Result<Self> {
        Self::create(device, ImageDesc {
            name: name.to_string(),
            kind: ImageKind::Multisample,
            width: extent.width,
            height: extent.height,
            format,
            samples,
        })
    }

    /// Create a sampled texture (2D or cubemap) and upload its pixels
    ///
    /// # Arguments
    ///
    /// * `device` - Device creating the image
    /// * `staging` - Host-visible pool the pixels are staged in
    /// * `name` - Debug name
    /// * `kind` - `ImageKind::Texture` or `ImageKind::Cubemap`
    /// * `pixels` - RGBA8 pixels for every layer
    /// * `placeholder_size` - Edge length of the checkerboard substituted for invalid pixels
    pub fn texture(
        device: Arc<dyn GraphicsDevice>,
        staging: &BufferPool,
        name: &str,
        kind: ImageKind,
        pixels: &DecodedImage,
        placeholder_size: u32,
    ) -> Result<Self> {
        if !kind.receives_pixels() {
            engine_bail_warn!("nebula::Image", "Image '{}' of kind {:?} cannot receive pixels", name, kind);
        }

        let layers = kind.layer_count();
        let substitute;
        let (source, placeholder) = match pixels.validate(layers) {
            Ok(()) => (pixels, false),
            Err(e) => {
                engine_warn!("nebula::Image", "Texture '{}': {}; using placeholder", name, e);
                substitute = DecodedImage::checkerboard_layers(placeholder_size, layers);
                (&substitute, true)
            }
        };

        let mut image = Self {
            device,
            desc: ImageDesc {
                name: name.to_string(),
                kind,
                width: source.width,
                height: source.height,
                format: ImageFormat::R8G8B8A8_SRGB,
                samples: SampleCount::S1,
            },
            gpu: None,
            layout: ImageLayout::Undefined,
            placeholder,
        };
        image.build()?;
        image.upload(staging, &source.pixels)?;
        Ok(image)
    }

    /// The engine-wide checkerboard texture bound to unresolved image bindings
    pub fn placeholder(device: Arc<dyn GraphicsDevice>, staging: &BufferPool, size: u32) -> Result<Self> {
        let pixels = DecodedImage::checkerboard(size);
        let mut image = Self::texture(device, staging, "placeholder", ImageKind::Texture, &pixels, size)?;
        image.placeholder = true;
        Ok(image)
    }

    fn build(&mut self) -> Result<()> {
        let gpu = self.device.create_image(&self.desc)?;
        engine_debug!("nebula::Image", "Created {:?} image '{}' {}x{} ({} layer(s), memory type {})",
            self.desc.kind, self.desc.name, self.desc.width, self.desc.height,
            self.desc.kind.layer_count(), gpu.memory().memory_type_index);
        self.gpu = Some(gpu);
        self.layout = ImageLayout::Undefined;
        Ok(())
    }

    fn upload(&mut self, staging: &BufferPool, pixels: &[u8]) -> Result<()> {
        let gpu = self.gpu()?.clone();
        let alignment = staging.alignment().max(self.desc.format.bytes_per_pixel() as u64);
        let staged = staging.make_buffer_aligned(pixels.len() as u64, alignment)?;

        let result = staging.write(staged, 0, pixels).and_then(|_| {
            let offset = staging
                .sub_buffer(staged)
                .map(|sub| sub.offset)
                .unwrap_or_default();
            self.submit_upload(staging, offset, gpu.as_ref())
        });
        staging.free_buffer(staged)?;
        result?;

        self.layout = ImageLayout::ShaderReadOnly;
        Ok(())
    }

    fn submit_upload(&self, staging: &BufferPool, offset: u64, gpu: &dyn GpuImage) -> Result<()> {
        let device = self.device.as_ref();
        let ready_for_copy = device.create_semaphore()?;
        let copy_done = device.create_semaphore()?;
        let fence = device.create_fence(false)?;

        let mut to_transfer = device.create_command_list()?;
        to_transfer.begin()?;
        to_transfer.transition_image(gpu, ImageLayout::Undefined, ImageLayout::TransferDst)?;
        to_transfer.end()?;

        let mut copy = device.create_command_list()?;
        copy.begin()?;
        copy.copy_buffer_to_image(staging.backing().as_ref(), offset, gpu)?;
        copy.end()?;

        let mut to_shader = device.create_command_list()?;
        to_shader.begin()?;
        to_shader.transition_image(gpu, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly)?;
        to_shader.end()?;

        device.submit(&Submission {
            queue: QueueKind::Transfer,
            command_lists: &[to_transfer.as_ref()],
            wait: &[],
            signal: &[ready_for_copy.as_ref()],
            fence: None,
        })?;
        device.submit(&Submission {
            queue: QueueKind::Transfer,
            command_lists: &[copy.as_ref()],
            wait: &[(ready_for_copy.as_ref(), PipelineStage::Transfer)],
            signal: &[copy_done.as_ref()],
            fence: None,
        })?;
        device.submit(&Submission {
            queue: QueueKind::Transfer,
            command_lists: &[to_shader.as_ref()],
            wait: &[(copy_done.as_ref(), PipelineStage::Transfer)],
            signal: &[],
            fence: Some(fence.as_ref()),
        })?;

        // Semaphores and command lists must outlive the GPU work
        fence.wait(u64::MAX)?;
        Ok(())
    }

    /// Destroy and rebuild at a new extent (swapchain resize)
    pub fn recreate(&mut self, extent: Extent2D) -> Result<()> {
        if self.desc.kind.receives_pixels() {
            engine_bail_warn!("nebula::Image", "Texture '{}' cannot be recreated without pixels", self.desc.name);
        }
        self.destroy();
        self.desc.width = extent.width;
        self.desc.height = extent.height;
        self.build()
    }

    /// Release the GPU image (view, sampler and memory go with it)
    pub fn destroy(&mut self) {
        self.gpu = None;
        self.layout = ImageLayout::Undefined;
    }

    /// Record a layout transition and track the new layout
    pub fn record_transition(&mut self, cmd: &mut dyn CommandList, new_layout: ImageLayout) -> Result<()> {
        let gpu = self.gpu()?.clone();
        cmd.transition_image(gpu.as_ref(), self.layout, new_layout)?;
        self.layout = new_layout;
        Ok(())
    }

    // ===== ACCESSORS =====

    /// Backend image; fails after `destroy`
    pub fn gpu(&self) -> Result<&Arc<dyn GpuImage>> {
        match &self.gpu {
            Some(gpu) => Ok(gpu),
            None => engine_bail_warn!("nebula::Image", "Image '{}' used after destroy", self.desc.name),
        }
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn kind(&self) -> ImageKind {
        self.desc.kind
    }

    pub fn extent(&self) -> Extent2D {
        Extent2D::new(self.desc.width, self.desc.height)
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn is_alive(&self) -> bool {
        self.gpu.is_some()
    }

    /// True when the image holds checkerboard pixels
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;

/// Image - Vulkan implementation of the GpuImage trait
///
/// One creation path for every `ImageKind`: the kind selects usage, aspect,
/// layer count, cube compatibility, view type and whether a sampler is made.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use nebula_renderer::nebula::gpu::{DeviceMemoryInfo, GpuImage, ImageDesc, ImageKind};
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_bail_warn, engine_err, engine_trace};
use std::sync::Arc;

use crate::context::GpuContext;
use crate::conversion::{
    aspect_to_vk, image_format_to_vk, image_usage_to_vk, sample_count_to_vk, view_type_to_vk,
};

pub struct Image {
    ctx: Arc<GpuContext>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) sampler: Option<vk::Sampler>,
    pub(crate) aspect: vk::ImageAspectFlags,
    allocation: Option<Allocation>,
    memory: DeviceMemoryInfo,
    desc: ImageDesc,
}

impl Image {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &ImageDesc) -> Result<Self> {
        if desc.width == 0 || desc.height == 0 {
            engine_bail_warn!("nebula::vulkan", "Image '{}': zero extent {}x{}", desc.name, desc.width, desc.height);
        }
        if desc.kind == ImageKind::Cubemap && desc.width != desc.height {
            engine_bail_warn!("nebula::vulkan", "Cubemap '{}': faces must be square ({}x{})", desc.name, desc.width, desc.height);
        }

        let kind = desc.kind;
        let format = image_format_to_vk(desc.format);
        let aspect = aspect_to_vk(kind.aspect(desc.format));
        let layers = kind.layer_count();
        let samples = match kind {
            ImageKind::Depth | ImageKind::Multisample => sample_count_to_vk(desc.samples),
            ImageKind::Texture | ImageKind::Cubemap => vk::SampleCountFlags::TYPE_1,
        };
        let flags = if kind.cube_compatible() {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        unsafe {
            let create_info = vk::ImageCreateInfo::default()
                .flags(flags)
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D { width: desc.width, height: desc.height, depth: 1 })
                .mip_levels(1)
                .array_layers(layers)
                .samples(samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(image_usage_to_vk(kind.usage()))
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = ctx.device.create_image(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create image '{}': {:?}", desc.name, e))?;

            let requirements = ctx.device.get_image_memory_requirements(image);
            let (allocation, memory) = match ctx.allocate(&desc.name, requirements, kind.memory_properties(), false) {
                Ok(result) => result,
                Err(e) => {
                    ctx.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let mut this = Self {
                ctx,
                image,
                view: vk::ImageView::null(),
                sampler: None,
                aspect,
                allocation: Some(allocation),
                memory,
                desc: desc.clone(),
            };

            // From here on, Drop releases whatever was created
            if let Some(allocation) = this.allocation.as_ref() {
                this.ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset())
                    .map_err(|e| engine_err!("nebula::vulkan", "Failed to bind memory of image '{}': {:?}", desc.name, e))?;
            }

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(view_type_to_vk(kind.view_type()))
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: layers,
                });
            this.view = this.ctx.device.create_image_view(&view_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create view of image '{}': {:?}", desc.name, e))?;

            if kind.has_sampler() {
                this.sampler = Some(this.create_sampler()?);
            }

            engine_trace!("nebula::vulkan", "Image '{}' created ({:?}, {}x{}, {} layer(s))",
                desc.name, kind, desc.width, desc.height, layers);

            Ok(this)
        }
    }

    /// Linear sampler: repeat for textures, clamp for cubemaps
    unsafe fn create_sampler(&self) -> Result<vk::Sampler> {
        let address = match self.desc.kind {
            ImageKind::Cubemap => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            _ => vk::SamplerAddressMode::REPEAT,
        };
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        create_info = match self.ctx.max_anisotropy {
            Some(max) => create_info.anisotropy_enable(true).max_anisotropy(max),
            None => create_info.anisotropy_enable(false).max_anisotropy(1.0),
        };

        self.ctx.device.create_sampler(&create_info, None)
            .map_err(|e| engine_err!("nebula::vulkan", "Failed to create sampler of image '{}': {:?}", self.desc.name, e))
    }
}

impl GpuImage for Image {
    fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    fn memory(&self) -> DeviceMemoryInfo {
        self.memory
    }

    fn has_sampler(&self) -> bool {
        self.sampler.is_some()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                self.ctx.device.destroy_sampler(sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.ctx.device.destroy_image_view(self.view, None);
            }
            self.ctx.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.ctx.free(allocation);
        }
    }
}

/// Descriptor set layouts, pools and sets

use ash::vk;
use nebula_renderer::nebula::gpu::{
    DescriptorPool as GpuDescriptorPool, DescriptorPoolDesc, DescriptorResource,
    DescriptorSet as GpuDescriptorSet, DescriptorSetLayout as GpuDescriptorSetLayout,
    DescriptorSetLayoutDesc, DescriptorType, DescriptorWrite, GpuImage,
};
use nebula_renderer::nebula::gpu::Buffer as GpuBuffer;
use nebula_renderer::nebula::Result;
use nebula_renderer::{engine_bail_warn, engine_debug, engine_err};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::conversion::{descriptor_type_to_vk, stage_flags_to_vk};
use crate::image::Image;

// ===== LAYOUT =====

pub struct DescriptorSetLayout {
    ctx: Arc<GpuContext>,
    pub(crate) layout: vk::DescriptorSetLayout,
    desc: DescriptorSetLayoutDesc,
}

impl DescriptorSetLayout {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &DescriptorSetLayoutDesc) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(descriptor_type_to_vk(binding.descriptor_type))
                    .descriptor_count(binding.count)
                    .stage_flags(stage_flags_to_vk(binding.stages))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            ctx.device.create_descriptor_set_layout(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create descriptor set layout (set {}): {:?}", desc.set, e))?
        };

        Ok(Self { ctx, layout, desc: desc.clone() })
    }
}

impl GpuDescriptorSetLayout for DescriptorSetLayout {
    fn desc(&self) -> &DescriptorSetLayoutDesc {
        &self.desc
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

// ===== POOL =====

pub struct DescriptorPool {
    ctx: Arc<GpuContext>,
    pool: vk::DescriptorPool,
    desc: DescriptorPoolDesc,
}

impl DescriptorPool {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &DescriptorPoolDesc) -> Result<Self> {
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = desc
            .sizes
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(ty, count)| vk::DescriptorPoolSize {
                ty: descriptor_type_to_vk(*ty),
                descriptor_count: *count,
            })
            .collect();
        // Layouts without bindings still need a non-empty size list
        if pool_sizes.is_empty() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            });
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(desc.max_sets.max(1));

        let pool = unsafe {
            ctx.device.create_descriptor_pool(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create descriptor pool ({} sets): {:?}", desc.max_sets, e))?
        };

        Ok(Self { ctx, pool, desc: desc.clone() })
    }
}

impl GpuDescriptorPool for DescriptorPool {
    fn desc(&self) -> &DescriptorPoolDesc {
        &self.desc
    }

    fn allocate(
        &mut self,
        layouts: &[&dyn GpuDescriptorSetLayout],
    ) -> Result<Option<Vec<Box<dyn GpuDescriptorSet>>>> {
        if layouts.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let (vk_layouts, set_indices): (Vec<vk::DescriptorSetLayout>, Vec<u32>) = layouts
            .iter()
            .map(|layout| {
                // Layouts are always created by this backend
                let vk_layout = unsafe {
                    &*(*layout as *const dyn GpuDescriptorSetLayout as *const DescriptorSetLayout)
                };
                (vk_layout.layout, vk_layout.desc.set)
            })
            .unzip();

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&vk_layouts);

        let sets = unsafe {
            match self.ctx.device.allocate_descriptor_sets(&allocate_info) {
                Ok(sets) => sets,
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                    engine_debug!("nebula::vulkan", "Descriptor pool exhausted ({} sets)", self.desc.max_sets);
                    return Ok(None);
                }
                Err(e) => {
                    return Err(engine_err!("nebula::vulkan", "Failed to allocate descriptor sets: {:?}", e));
                }
            }
        };

        Ok(Some(
            sets.into_iter()
                .zip(set_indices)
                .map(|(set, set_index)| {
                    Box::new(DescriptorSet {
                        ctx: Arc::clone(&self.ctx),
                        set,
                        set_index,
                    }) as Box<dyn GpuDescriptorSet>
                })
                .collect(),
        ))
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            // Frees every set allocated from the pool
            self.ctx.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

// ===== SET =====

pub struct DescriptorSet {
    ctx: Arc<GpuContext>,
    pub(crate) set: vk::DescriptorSet,
    set_index: u32,
}

impl GpuDescriptorSet for DescriptorSet {
    fn set_index(&self) -> u32 {
        self.set_index
    }

    fn update(&self, writes: &[DescriptorWrite]) -> Result<()> {
        let mut buffer_infos: Vec<Option<vk::DescriptorBufferInfo>> = Vec::with_capacity(writes.len());
        let mut image_infos: Vec<Option<vk::DescriptorImageInfo>> = Vec::with_capacity(writes.len());

        for write in writes {
            match (&write.resource, write.descriptor_type) {
                (DescriptorResource::Buffer { buffer, offset, range }, ty) if ty.is_buffer() => {
                    let vk_buffer = unsafe { &*(*buffer as *const dyn GpuBuffer as *const Buffer) };
                    buffer_infos.push(Some(vk::DescriptorBufferInfo {
                        buffer: vk_buffer.buffer,
                        offset: *offset,
                        range: *range,
                    }));
                    image_infos.push(None);
                }
                (DescriptorResource::Image { image }, DescriptorType::CombinedImageSampler) => {
                    let vk_image = unsafe { &*(*image as *const dyn GpuImage as *const Image) };
                    let Some(sampler) = vk_image.sampler else {
                        engine_bail_warn!("nebula::vulkan", "Binding {}: image '{}' has no sampler",
                            write.binding, image.desc().name);
                    };
                    buffer_infos.push(None);
                    image_infos.push(Some(vk::DescriptorImageInfo {
                        sampler,
                        image_view: vk_image.view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }));
                }
                (_, ty) => {
                    engine_bail_warn!("nebula::vulkan", "Binding {}: resource does not match descriptor type {:?}",
                        write.binding, ty);
                }
            }
        }

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(descriptor_type_to_vk(write.descriptor_type));
                match (&buffer_infos[i], &image_infos[i]) {
                    (Some(info), _) => vk_write.buffer_info(std::slice::from_ref(info)),
                    (_, Some(info)) => vk_write.image_info(std::slice::from_ref(info)),
                    (None, None) => vk_write,
                }
            })
            .collect();

        unsafe {
            self.ctx.device.update_descriptor_sets(&vk_writes, &[]);
        }
        Ok(())
    }
}

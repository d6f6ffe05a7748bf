/// Material and material instances
///
/// A Material owns everything derived from one vertex/fragment shader pair:
/// the descriptor set layouts (one per reflected set, pooled across both
/// stages), a descriptor pool sized for N instances, and one graphics
/// pipeline. Material instances live inside their material and own one
/// descriptor set per layout plus a name -> resource dependency map.
///
/// Descriptor writes are regenerated from the dependency map: every reflected
/// binding is matched by name. Image bindings without a live dependency are
/// bound to the engine-wide placeholder texture so no set ever holds a null
/// descriptor. Uniform bindings listed in `MaterialDesc::dynamic_uniforms`
/// become dynamic: their offset is chosen per draw by `record_bind`.

use std::sync::Arc;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use crate::error::Result;
use crate::gpu::{
    merge_bindings, merge_push_constants, CommandList, CullMode, DescriptorPool,
    DescriptorPoolDesc, DescriptorResource, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutDesc, DescriptorType, DescriptorWrite, GraphicsDevice, Pipeline,
    PipelineDesc, PrimitiveTopology, PushConstantRange, RenderPassLayout, ShaderStage,
    ShaderStageFlags,
};
use crate::resource::buffer_pool::BufferBinding;
use crate::resource::image::Image;
use crate::resource::shader::Shader;
use crate::{engine_bail, engine_bail_warn, engine_debug, engine_info, engine_warn};

new_key_type! {
    /// Key of a material instance inside its material
    pub struct MaterialInstanceKey;
}

// ===== WRITE SUMMARY =====

/// What a descriptor write bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrittenResource {
    Buffer { offset: u64, range: u64 },
    Image { image: String, placeholder: bool },
}

/// Summary of one descriptor write issued by `update_descriptor_sets`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWriteInfo {
    pub set: u32,
    pub binding: u32,
    pub name: String,
    pub resource: WrittenResource,
}

// ===== MATERIAL INSTANCE =====

/// Per-draw-target descriptor sets with named bindings
pub struct MaterialInstance {
    sets: Vec<Box<dyn DescriptorSet>>,
    buffers: FxHashMap<String, BufferBinding>,
    images: FxHashMap<String, Arc<Image>>,
    last_writes: Vec<DescriptorWriteInfo>,
}

impl MaterialInstance {
    /// Bind a buffer range to the reflected binding called `name`
    pub fn set_buffer_dependency(&mut self, name: &str, binding: BufferBinding) {
        self.buffers.insert(name.to_string(), binding);
    }

    /// Bind an image to the reflected binding called `name`
    pub fn set_image_dependency(&mut self, name: &str, image: Arc<Image>) {
        self.images.insert(name.to_string(), image);
    }

    /// Forget an image binding (it falls back to the placeholder)
    pub fn clear_image_dependency(&mut self, name: &str) -> Option<Arc<Image>> {
        self.images.remove(name)
    }

    pub fn buffer_dependency(&self, name: &str) -> Option<&BufferBinding> {
        self.buffers.get(name)
    }

    pub fn image_dependency(&self, name: &str) -> Option<&Arc<Image>> {
        self.images.get(name)
    }

    /// Descriptor sets in set order
    pub fn descriptor_sets(&self) -> Vec<&dyn DescriptorSet> {
        self.sets.iter().map(|set| set.as_ref()).collect()
    }

    /// Writes issued by the last descriptor update
    pub fn last_writes(&self) -> &[DescriptorWriteInfo] {
        &self.last_writes
    }
}

// ===== MATERIAL =====

/// Parameters for creating a material
pub struct MaterialDesc {
    pub name: String,
    pub vertex_shader: Arc<Shader>,
    pub fragment_shader: Arc<Shader>,
    /// Initial instance capacity of the descriptor pool
    pub max_instances: u32,
    /// Attachment layout the pipeline is built against
    pub render_pass: RenderPassLayout,
    pub cull_mode: CullMode,
    /// Names of uniform bindings bound with a dynamic offset
    pub dynamic_uniforms: Vec<String>,
}

/// Pipeline + descriptor layouts + descriptor pool of a shader pair
pub struct Material {
    name: String,
    device: Arc<dyn GraphicsDevice>,
    vertex_shader: Arc<Shader>,
    fragment_shader: Arc<Shader>,
    layout_descs: Vec<DescriptorSetLayoutDesc>,
    set_layouts: Vec<Arc<dyn DescriptorSetLayout>>,
    push_constants: Vec<PushConstantRange>,
    /// Dynamic descriptors across all sets (one bind-time offset each)
    dynamic_count: usize,
    pool: Box<dyn DescriptorPool>,
    capacity: u32,
    pool_resizes: u32,
    pipeline: Arc<dyn Pipeline>,
    render_pass: RenderPassLayout,
    cull_mode: CullMode,
    placeholder: Arc<Image>,
    instances: SlotMap<MaterialInstanceKey, MaterialInstance>,
}

impl Material {
    /// Build layouts, pool and pipeline
    ///
    /// # Arguments
    ///
    /// * `device` - Device owning every GPU object of the material
    /// * `desc` - Shaders, capacity and render pass layout
    /// * `placeholder` - Texture bound to unresolved image bindings
    pub fn init(device: Arc<dyn GraphicsDevice>, desc: MaterialDesc, placeholder: Arc<Image>) -> Result<Self> {
        if desc.vertex_shader.stage() != ShaderStage::Vertex {
            engine_bail_warn!("nebula::Material", "Material '{}': '{}' is not a vertex shader",
                desc.name, desc.vertex_shader.key());
        }
        if desc.fragment_shader.stage() != ShaderStage::Fragment {
            engine_bail_warn!("nebula::Material", "Material '{}': '{}' is not a fragment shader",
                desc.name, desc.fragment_shader.key());
        }

        let reflections = [desc.vertex_shader.reflection(), desc.fragment_shader.reflection()];
        let mut layout_descs = merge_bindings(&reflections)?;
        let dynamic_count = make_dynamic(&mut layout_descs, &desc.dynamic_uniforms);
        let push_constants = merge_push_constants(&reflections);

        let limit = device.limits().max_push_constants_size;
        if let Some(range) = push_constants.iter().find(|range| range.offset + range.size > limit) {
            engine_bail!("nebula::Material", "Material '{}': push constant range {}..{} exceeds device limit {}",
                desc.name, range.offset, range.offset + range.size, limit);
        }

        let set_layouts = layout_descs
            .iter()
            .map(|layout| device.create_descriptor_set_layout(layout))
            .collect::<Result<Vec<_>>>()?;

        let capacity = desc.max_instances.max(1);
        let pool = device.create_descriptor_pool(&DescriptorPoolDesc::for_instances(&layout_descs, capacity))?;

        let pipeline = build_pipeline(
            device.as_ref(),
            &desc.name,
            &desc.vertex_shader,
            &desc.fragment_shader,
            &set_layouts,
            &push_constants,
            desc.render_pass,
            desc.cull_mode,
        )?;

        engine_debug!("nebula::Material", "Material '{}' ready: {} set layout(s), capacity {} instance(s)",
            desc.name, set_layouts.len(), capacity);

        Ok(Self {
            name: desc.name,
            device,
            vertex_shader: desc.vertex_shader,
            fragment_shader: desc.fragment_shader,
            layout_descs,
            set_layouts,
            push_constants,
            dynamic_count,
            pool,
            capacity,
            pool_resizes: 0,
            pipeline,
            render_pass: desc.render_pass,
            cull_mode: desc.cull_mode,
            placeholder,
            instances: SlotMap::with_key(),
        })
    }

    // ===== INSTANCES =====

    /// Allocate one descriptor set per layout for a new instance
    ///
    /// When the pool is exhausted it is replaced by a pool of twice the
    /// capacity; existing instances get fresh sets and their dependency maps
    /// are written again immediately.
    pub fn make_instance(&mut self) -> Result<MaterialInstanceKey> {
        let sets = match self.allocate_sets()? {
            Some(sets) => sets,
            None => {
                self.grow_pool()?;
                match self.allocate_sets()? {
                    Some(sets) => sets,
                    None => engine_bail!("nebula::Material",
                        "Material '{}': descriptor allocation failed after pool resize", self.name),
                }
            }
        };

        Ok(self.instances.insert(MaterialInstance {
            sets,
            buffers: FxHashMap::default(),
            images: FxHashMap::default(),
            last_writes: Vec::new(),
        }))
    }

    fn allocate_sets(&mut self) -> Result<Option<Vec<Box<dyn DescriptorSet>>>> {
        let layouts: Vec<&dyn DescriptorSetLayout> = self.set_layouts.iter().map(|l| l.as_ref()).collect();
        self.pool.allocate(&layouts)
    }

    fn grow_pool(&mut self) -> Result<()> {
        let capacity = self.capacity.saturating_mul(2).max(self.instances.len() as u32 + 1);
        engine_info!("nebula::Material", "Material '{}': descriptor pool exhausted, growing {} -> {} instances",
            self.name, self.capacity, capacity);

        let new_pool = self
            .device
            .create_descriptor_pool(&DescriptorPoolDesc::for_instances(&self.layout_descs, capacity))?;
        // Old sets must be released before their pool
        for instance in self.instances.values_mut() {
            instance.sets.clear();
        }
        self.pool = new_pool;
        self.capacity = capacity;
        self.pool_resizes += 1;

        let keys: Vec<MaterialInstanceKey> = self.instances.keys().collect();
        for key in keys {
            let sets = match self.allocate_sets()? {
                Some(sets) => sets,
                None => engine_bail!("nebula::Material",
                    "Material '{}': resized pool cannot hold existing instances", self.name),
            };
            if let Some(instance) = self.instances.get_mut(key) {
                instance.sets = sets;
            }
            self.update_descriptor_sets(key)?;
        }
        Ok(())
    }

    /// Remove an instance and release its descriptor sets
    pub fn remove_instance(&mut self, key: MaterialInstanceKey) -> Option<MaterialInstance> {
        self.instances.remove(key)
    }

    pub fn instance(&self, key: MaterialInstanceKey) -> Option<&MaterialInstance> {
        self.instances.get(key)
    }

    pub fn instance_mut(&mut self, key: MaterialInstanceKey) -> Option<&mut MaterialInstance> {
        self.instances.get_mut(key)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance_keys(&self) -> Vec<MaterialInstanceKey> {
        self.instances.keys().collect()
    }

    /// Resolve every reflected binding of an instance and write its sets
    ///
    /// Buffer bindings without a dependency are skipped with a warning; image
    /// bindings without a live dependency get the placeholder texture.
    pub fn update_descriptor_sets(&mut self, key: MaterialInstanceKey) -> Result<Vec<DescriptorWriteInfo>> {
        let instance = match self.instances.get_mut(key) {
            Some(instance) => instance,
            None => engine_bail_warn!("nebula::Material", "Material '{}': unknown instance {:?}", self.name, key),
        };
        let placeholder = self.placeholder.gpu()?.clone();

        let mut summary = Vec::new();
        for (layout, set) in self.layout_descs.iter().zip(instance.sets.iter()) {
            let mut writes = Vec::with_capacity(layout.bindings.len());
            for binding in &layout.bindings {
                match binding.descriptor_type {
                    DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic | DescriptorType::StorageBuffer => {
                        let Some(dependency) = instance.buffers.get(&binding.name) else {
                            engine_warn!("nebula::Material", "Material '{}': no buffer bound to '{}' (set {}, binding {})",
                                self.name, binding.name, layout.set, binding.binding);
                            continue;
                        };
                        writes.push(DescriptorWrite {
                            binding: binding.binding,
                            descriptor_type: binding.descriptor_type,
                            resource: DescriptorResource::Buffer {
                                buffer: dependency.buffer.as_ref(),
                                offset: dependency.offset,
                                range: dependency.range,
                            },
                        });
                        summary.push(DescriptorWriteInfo {
                            set: layout.set,
                            binding: binding.binding,
                            name: binding.name.clone(),
                            resource: WrittenResource::Buffer { offset: dependency.offset, range: dependency.range },
                        });
                    }
                    DescriptorType::CombinedImageSampler => {
                        let resolved = instance
                            .images
                            .get(&binding.name)
                            .and_then(|image| image.gpu().ok().map(|gpu| (image, gpu)));
                        let (image_name, placeholder_used, gpu) = match resolved {
                            Some((image, gpu)) => (image.name().to_string(), image.is_placeholder(), gpu.as_ref()),
                            None => (self.placeholder.name().to_string(), true, placeholder.as_ref()),
                        };
                        writes.push(DescriptorWrite {
                            binding: binding.binding,
                            descriptor_type: binding.descriptor_type,
                            resource: DescriptorResource::Image { image: gpu },
                        });
                        summary.push(DescriptorWriteInfo {
                            set: layout.set,
                            binding: binding.binding,
                            name: binding.name.clone(),
                            resource: WrittenResource::Image { image: image_name, placeholder: placeholder_used },
                        });
                    }
                }
            }
            if !writes.is_empty() {
                set.update(&writes)?;
            }
        }

        instance.last_writes = summary.clone();
        Ok(summary)
    }

    /// Bind the pipeline and the instance's descriptor sets
    ///
    /// `dynamic_offset` is applied to every dynamic uniform binding.
    pub fn record_bind(&self, cmd: &mut dyn CommandList, key: MaterialInstanceKey, dynamic_offset: u32) -> Result<()> {
        let instance = match self.instances.get(key) {
            Some(instance) => instance,
            None => engine_bail_warn!("nebula::Material", "Material '{}': unknown instance {:?}", self.name, key),
        };
        cmd.bind_pipeline(self.pipeline.as_ref())?;
        let sets = instance.descriptor_sets();
        if !sets.is_empty() {
            let offsets = vec![dynamic_offset; self.dynamic_count];
            cmd.bind_descriptor_sets(self.pipeline.as_ref(), 0, &sets, &offsets)?;
        }
        Ok(())
    }

    /// Push `data` into the vertex-stage push constant range at offset 0
    pub fn record_push_constants(&self, cmd: &mut dyn CommandList, data: &[u8]) -> Result<()> {
        let Some(range) = self.push_constants.iter().find(|range| range.offset == 0) else {
            return Ok(());
        };
        if data.len() as u32 > range.size {
            engine_bail_warn!("nebula::Material", "Material '{}': {} bytes pushed into a {}-byte range",
                self.name, data.len(), range.size);
        }
        cmd.push_constants(self.pipeline.as_ref(), range.stages, 0, data)
    }

    // ===== PIPELINE =====

    /// Rebuild only the pipeline for a new attachment layout
    ///
    /// Descriptor layouts, the pool and every instance stay untouched.
    pub fn recreate_pipeline(&mut self, render_pass: RenderPassLayout) -> Result<()> {
        let pipeline = build_pipeline(
            self.device.as_ref(),
            &self.name,
            &self.vertex_shader,
            &self.fragment_shader,
            &self.set_layouts,
            &self.push_constants,
            render_pass,
            self.cull_mode,
        )?;
        self.pipeline = pipeline;
        self.render_pass = render_pass;
        engine_debug!("nebula::Material", "Material '{}': pipeline rebuilt for {:?}", self.name, render_pass);
        Ok(())
    }

    /// Keep the pipeline compatible with the active views' attachment layout
    pub fn on_views_changed(&mut self, render_pass: RenderPassLayout) -> Result<()> {
        if render_pass != self.render_pass {
            self.recreate_pipeline(render_pass)?;
        }
        Ok(())
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    pub fn render_pass_layout(&self) -> RenderPassLayout {
        self.render_pass
    }

    pub fn set_layout_descs(&self) -> &[DescriptorSetLayoutDesc] {
        &self.layout_descs
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    /// Stages of the push constant range at offset 0
    pub fn push_constant_stages(&self) -> ShaderStageFlags {
        self.push_constants
            .iter()
            .find(|range| range.offset == 0)
            .map(|range| range.stages)
            .unwrap_or(ShaderStageFlags::NONE)
    }

    /// Number of dynamic descriptors bound by `record_bind`
    pub fn dynamic_binding_count(&self) -> usize {
        self.dynamic_count
    }

    /// Current instance capacity of the descriptor pool
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of times the descriptor pool was doubled
    pub fn pool_resizes(&self) -> u32 {
        self.pool_resizes
    }

    /// Vertex stride expected by the pipeline
    pub fn vertex_stride(&self) -> u32 {
        self.vertex_shader.vertex_layout().stride
    }

    /// True when some reflected binding is named `name`
    pub fn declares_binding(&self, name: &str) -> bool {
        self.layout_descs
            .iter()
            .any(|layout| layout.bindings.iter().any(|binding| binding.name == name))
    }
}

/// Turn the named uniform bindings dynamic, returning the dynamic descriptor count
fn make_dynamic(layouts: &mut [DescriptorSetLayoutDesc], names: &[String]) -> usize {
    let mut count = 0;
    for binding in layouts.iter_mut().flat_map(|layout| layout.bindings.iter_mut()) {
        if binding.descriptor_type == DescriptorType::UniformBuffer && names.contains(&binding.name) {
            binding.descriptor_type = DescriptorType::UniformBufferDynamic;
        }
        if binding.descriptor_type.is_dynamic() {
            count += binding.count as usize;
        }
    }
    count
}

#[allow(clippy::too_many_arguments)]
fn build_pipeline(
    device: &dyn GraphicsDevice,
    name: &str,
    vertex_shader: &Shader,
    fragment_shader: &Shader,
    set_layouts: &[Arc<dyn DescriptorSetLayout>],
    push_constants: &[PushConstantRange],
    render_pass: RenderPassLayout,
    cull_mode: CullMode,
) -> Result<Arc<dyn Pipeline>> {
    device.create_pipeline(&PipelineDesc {
        name,
        vertex_shader: vertex_shader.module().as_ref(),
        fragment_shader: fragment_shader.module().as_ref(),
        set_layouts: set_layouts.iter().map(|layout| layout.as_ref()).collect(),
        push_constants: push_constants.to_vec(),
        vertex_layout: vertex_shader.vertex_layout().clone(),
        render_pass,
        topology: PrimitiveTopology::TriangleList,
        cull_mode,
        depth_test: true,
    })
}

#[cfg(test)]
#[path = "material_tests.rs"]
mod tests;

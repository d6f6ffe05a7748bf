/// Scene - one loaded model in GPU form
///
/// A Scene owns one geometry sub-buffer (all vertices, then all indices), one
/// material-data sub-buffer (one aligned record per model material), one
/// texture per model image and one material instance per model material.
/// Draw records are grouped per model material and recorded in material-array
/// order, then node-traversal order.
///
/// Textures whose pixels are not available yet stay unbound (the instance
/// samples the placeholder) until `set_texture` provides them.

use std::sync::Arc;

use crate::asset::{Model, ModelImage, ModelMaterial, Vertex};
use crate::error::{Error, Result};
use crate::gpu::{CommandList, GraphicsDevice, ImageKind, IndexType};
use crate::resource::{BufferBinding, BufferPool, Image, Material, MaterialInstanceKey, SubBufferId};
use crate::scene::packing::{pack_geometry, pack_materials, DrawRecord, MaterialData};
use crate::{engine_bail_warn, engine_debug, engine_info, engine_warn};

/// Reflected name of the camera uniform block
pub const CAMERA_BINDING: &str = "camera";
/// Reflected name of the material-data uniform block
pub const MATERIAL_DATA_BINDING: &str = "material";
pub const BASE_COLOR_TEXTURE: &str = "baseColorTexture";
pub const METALLIC_ROUGHNESS_TEXTURE: &str = "metallicRoughnessTexture";
pub const NORMAL_TEXTURE: &str = "normalTexture";
pub const OCCLUSION_TEXTURE: &str = "occlusionTexture";
pub const EMISSIVE_TEXTURE: &str = "emissiveTexture";

/// Texture binding names of a model material with the model image each one uses
type TextureSlots = [(&'static str, Option<usize>); 5];

fn texture_slots(material: &ModelMaterial) -> TextureSlots {
    [
        (BASE_COLOR_TEXTURE, material.base_color_texture),
        (METALLIC_ROUGHNESS_TEXTURE, material.metallic_roughness_texture),
        (NORMAL_TEXTURE, material.normal_texture),
        (OCCLUSION_TEXTURE, material.occlusion_texture),
        (EMISSIVE_TEXTURE, material.emissive_texture),
    ]
}

/// Debug name of a model image
pub fn texture_name(model: &Model, index: usize, image: &ModelImage) -> String {
    if image.uri.is_empty() {
        format!("{}#image{}", model.name, index)
    } else {
        image.uri.clone()
    }
}

/// Global objects a scene is built from
pub struct SceneResources<'a> {
    pub device: &'a Arc<dyn GraphicsDevice>,
    /// Device-local vertex/index pool
    pub geometry: &'a BufferPool,
    /// Uniform pool holding the material-data records
    pub uniforms: &'a BufferPool,
    /// Host-visible transfer pool
    pub staging: &'a BufferPool,
    /// First camera slot; draws select their slot with a dynamic offset
    pub camera: &'a BufferBinding,
    /// Edge length of the checkerboard substituted for invalid pixels
    pub placeholder_size: u32,
}

/// GPU form of one model
pub struct Scene {
    name: String,
    textures: Vec<Option<Arc<Image>>>,
    pending_images: Vec<usize>,
    slots: Vec<TextureSlots>,
    geometry: Option<SubBufferId>,
    index_offset: u64,
    material_data: Option<SubBufferId>,
    instances: Vec<MaterialInstanceKey>,
    draws: Vec<Vec<DrawRecord>>,
    vertex_stride: u32,
}

impl Scene {
    /// Upload a model and create its material instances
    ///
    /// On failure every sub-buffer and instance created so far is released
    /// again before the error is returned.
    pub fn create(resources: &SceneResources, material: &mut Material, model: &Model) -> Result<Self> {
        let mut scene = Self {
            name: model.name.clone(),
            textures: Vec::with_capacity(model.images.len()),
            pending_images: Vec::new(),
            slots: model.materials.iter().map(texture_slots).collect(),
            geometry: None,
            index_offset: 0,
            material_data: None,
            instances: Vec::with_capacity(model.materials.len()),
            draws: Vec::new(),
            vertex_stride: material.vertex_stride(),
        };

        if let Err(e) = scene.populate(resources, material, model) {
            scene.release_parts(material, resources.geometry, resources.uniforms);
            return Err(e);
        }

        engine_info!("nebula::Scene", "Scene '{}' created: {} draw(s), {} material(s), {} texture(s) ({} pending)",
            scene.name, scene.draw_count(), scene.instances.len(), scene.textures.len(), scene.pending_images.len());
        Ok(scene)
    }

    fn populate(&mut self, resources: &SceneResources, material: &mut Material, model: &Model) -> Result<()> {
        // Textures
        for (index, image) in model.images.iter().enumerate() {
            match &image.pixels {
                Some(pixels) => {
                    let texture = Image::texture(
                        resources.device.clone(),
                        resources.staging,
                        &texture_name(model, index, image),
                        ImageKind::Texture,
                        pixels,
                        resources.placeholder_size,
                    )?;
                    self.textures.push(Some(Arc::new(texture)));
                }
                None => {
                    self.textures.push(None);
                    self.pending_images.push(index);
                }
            }
        }

        // Geometry
        let packed = pack_geometry(model);
        if !packed.is_empty() {
            let vertex_size = std::mem::size_of::<Vertex>() as u32;
            if self.vertex_stride != vertex_size {
                return Err(Error::InvalidShader(format!(
                    "material '{}' expects a {}-byte vertex, scene '{}' provides {} bytes",
                    material.name(), self.vertex_stride, self.name, vertex_size
                )));
            }
            let id = resources.geometry.make_buffer(packed.bytes.len() as u64)?;
            self.geometry = Some(id);
            resources.geometry.upload(resources.staging, id, &packed.bytes)?;
            engine_debug!("nebula::Scene", "Scene '{}': {} geometry bytes (indices at {})",
                self.name, packed.bytes.len(), packed.index_offset);
        }
        self.index_offset = packed.index_offset;
        self.draws = packed.draws;

        if model.materials.is_empty() {
            return Ok(());
        }

        // Material data
        let records = pack_materials(&model.materials, resources.uniforms.alignment());
        let id = resources.uniforms.make_buffer(records.bytes.len() as u64)?;
        self.material_data = Some(id);
        resources.uniforms.upload(resources.staging, id, &records.bytes)?;
        let base = resources.uniforms.binding(id)?;

        // One instance per model material
        for (index, slots) in self.slots.iter().enumerate() {
            let key = material.make_instance()?;
            self.instances.push(key);

            let Some(instance) = material.instance_mut(key) else {
                engine_bail_warn!("nebula::Scene", "Scene '{}': instance vanished after creation", self.name);
            };
            instance.set_buffer_dependency(CAMERA_BINDING, resources.camera.clone());
            instance.set_buffer_dependency(MATERIAL_DATA_BINDING, BufferBinding {
                buffer: base.buffer.clone(),
                offset: base.offset + records.offset_of(index),
                range: std::mem::size_of::<MaterialData>() as u64,
            });
            for (binding, texture) in slots {
                if let Some(Some(image)) = (*texture).and_then(|t| self.textures.get(t)) {
                    instance.set_image_dependency(binding, image.clone());
                }
            }
            material.update_descriptor_sets(key)?;
        }
        Ok(())
    }

    /// Provide the texture of a model image that was decoded later
    ///
    /// Every instance whose material uses the image is rebound.
    ///
    /// # Returns
    ///
    /// Number of material instances that were updated.
    pub fn set_texture(&mut self, image_index: usize, image: Arc<Image>, material: &mut Material) -> Result<usize> {
        let Some(slot) = self.textures.get_mut(image_index) else {
            engine_bail_warn!("nebula::Scene", "Scene '{}': image {} does not exist", self.name, image_index);
        };
        *slot = Some(image.clone());
        self.pending_images.retain(|pending| *pending != image_index);

        let mut updated = 0;
        for (slots, key) in self.slots.iter().zip(self.instances.iter()) {
            let mut uses = false;
            for (binding, texture) in slots {
                if *texture == Some(image_index) {
                    if let Some(instance) = material.instance_mut(*key) {
                        instance.set_image_dependency(binding, image.clone());
                        uses = true;
                    }
                }
            }
            if uses {
                material.update_descriptor_sets(*key)?;
                updated += 1;
            }
        }

        engine_debug!("nebula::Scene", "Scene '{}': texture '{}' bound to {} instance(s)",
            self.name, image.name(), updated);
        Ok(updated)
    }

    /// Record every draw of the scene
    ///
    /// Binds the geometry once, then per material the pipeline and instance
    /// sets with the camera block at `camera_offset`, and per draw the world
    /// matrix as push constant.
    ///
    /// # Returns
    ///
    /// Number of draw calls recorded.
    pub fn bind_to_cmd_buffer(
        &self,
        cmd: &mut dyn CommandList,
        material: &Material,
        geometry: &BufferPool,
        camera_offset: u32,
    ) -> Result<u32> {
        let Some(id) = self.geometry else {
            return Ok(0);
        };
        let Some(sub) = geometry.sub_buffer(id) else {
            engine_bail_warn!("nebula::Scene", "Scene '{}': geometry sub-buffer {:?} was freed", self.name, id);
        };

        cmd.bind_vertex_buffer(geometry.backing().as_ref(), sub.offset)?;
        if self.draws.iter().flatten().any(|draw| draw.is_indexed()) {
            cmd.bind_index_buffer(geometry.backing().as_ref(), sub.offset + self.index_offset, IndexType::U32)?;
        }

        let mut draw_calls = 0;
        for (draws, key) in self.draws.iter().zip(self.instances.iter()) {
            if draws.is_empty() {
                continue;
            }
            material.record_bind(cmd, *key, camera_offset)?;
            for draw in draws {
                material.record_push_constants(cmd, bytemuck::bytes_of(&draw.world))?;
                let first_vertex = draw.first_vertex(self.vertex_stride);
                if draw.is_indexed() {
                    cmd.draw_indexed(draw.index_count, draw.first_index(), first_vertex as i32)?;
                } else {
                    cmd.draw(draw.vertex_count, first_vertex)?;
                }
                draw_calls += 1;
            }
        }
        Ok(draw_calls)
    }

    /// Release sub-buffers and material instances
    ///
    /// The caller guarantees the GPU no longer uses the scene.
    pub fn release(mut self, material: &mut Material, geometry: &BufferPool, uniforms: &BufferPool) {
        self.release_parts(material, geometry, uniforms);
        engine_debug!("nebula::Scene", "Scene '{}' released", self.name);
    }

    fn release_parts(&mut self, material: &mut Material, geometry: &BufferPool, uniforms: &BufferPool) {
        for key in self.instances.drain(..) {
            material.remove_instance(key);
        }
        if let Some(id) = self.geometry.take() {
            if let Err(e) = geometry.free_buffer(id) {
                engine_warn!("nebula::Scene", "Scene '{}': {}", self.name, e);
            }
        }
        if let Some(id) = self.material_data.take() {
            if let Err(e) = uniforms.free_buffer(id) {
                engine_warn!("nebula::Scene", "Scene '{}': {}", self.name, e);
            }
        }
        self.textures.clear();
        self.pending_images.clear();
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Draw records per model material
    pub fn draws(&self) -> &[Vec<DrawRecord>] {
        &self.draws
    }

    pub fn draw_count(&self) -> usize {
        self.draws.iter().map(|draws| draws.len()).sum()
    }

    /// Material instances in model-material order
    pub fn instances(&self) -> &[MaterialInstanceKey] {
        &self.instances
    }

    /// Texture of a model image (`None` while its pixels are pending)
    pub fn texture(&self, image_index: usize) -> Option<&Arc<Image>> {
        self.textures.get(image_index).and_then(|texture| texture.as_ref())
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Model images still waiting for pixels
    pub fn pending_images(&self) -> &[usize] {
        &self.pending_images
    }

    pub fn geometry_sub_buffer(&self) -> Option<SubBufferId> {
        self.geometry
    }

    pub fn material_data_sub_buffer(&self) -> Option<SubBufferId> {
        self.material_data
    }

    /// Start of the index region within the geometry sub-buffer
    pub fn index_offset(&self) -> u64 {
        self.index_offset
    }
}

#[cfg(test)]
#[path = "scene_tests.rs"]
mod tests;

/// Renderer - owner of the device-level state and the per-frame tick
///
/// The renderer holds the global buffer pools (staging, uniform, geometry),
/// the placeholder texture, the shader and material registries, the scenes
/// and a bounded array of views. `tick` drives one frame on every view:
///
/// 1. apply finished background jobs (decoded textures)
/// 2. per view: rebuild the swapchain after a resize and skip the view, or
///    acquire, write the camera block, record every scene, submit and present
///
/// Every (view slot, swapchain image) pair owns one camera block in the
/// uniform pool, selected per draw with a dynamic offset. A block is only
/// rewritten after its image's previous frame finished.
///
/// There is no global instance: applications create a renderer from a
/// `GraphicsDevice` and pass it around.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use crate::asset::{DecodedImage, FileImageDecoder, ImageDecoder, Model};
use crate::camera::CameraData;
use crate::config::Config;
use crate::error::Result;
use crate::gpu::{
    align_up, BufferUsage, CullMode, GraphicsDevice, ImageFormat, ImageKind, MemoryPropertyFlags,
    RenderPassLayout, ShaderStage, Surface,
};
use crate::resource::{
    BufferBinding, BufferPool, Image, Material, MaterialDesc, Shader, ShaderSource, SubBufferId,
};
use crate::scene::{texture_name, Scene, SceneResources, CAMERA_BINDING};
use crate::task::{FinishedTask, TaskId, TaskPool};
use crate::view::{PresentOutcome, View, ViewDesc};
use crate::{engine_bail_warn, engine_debug, engine_error, engine_info, engine_trace, engine_warn};

new_key_type! {
    /// Key of a loaded scene
    pub struct SceneKey;
    /// Key of a registered material
    pub struct MaterialKey;
}

/// Name of the material created from the shaders given to `Renderer::new`
pub const DEFAULT_MATERIAL: &str = "default";

/// What one call to `tick` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Views that submitted and presented a frame
    pub views_drawn: u32,
    /// Views that did not draw (resize, zero-sized surface, failed acquire, out-of-date present)
    pub frames_skipped: u32,
    /// Swapchains rebuilt during this tick
    pub swapchain_recreations: u32,
    /// Draw calls recorded across all views
    pub draw_calls: u32,
}

struct SceneEntry {
    scene: Scene,
    material: MaterialKey,
    /// Decode jobs still feeding this scene
    tasks: Vec<TaskId>,
}

/// Objects shared by the frame loop and background-job completions
struct Resources {
    device: Arc<dyn GraphicsDevice>,
    scenes: SlotMap<SceneKey, SceneEntry>,
    materials: SlotMap<MaterialKey, Material>,
    placeholder: Arc<Image>,
    placeholder_size: u32,
    /// All camera slots, `images_per_view` consecutive slots per view
    camera: SubBufferId,
    /// First slot; draws add the slot offset dynamically
    camera_binding: BufferBinding,
    camera_stride: u32,
    images_per_view: u32,
    staging: BufferPool,
    uniforms: BufferPool,
    geometry: BufferPool,
}

impl Resources {
    /// Offset of a camera slot relative to `camera_binding`
    fn camera_slot(&self, view: usize, image_index: u32) -> u32 {
        (view as u32 * self.images_per_view + image_index) * self.camera_stride
    }

    /// Write the camera block of one view image and record every scene into it
    fn record_view(&self, view: &mut View, slot: usize, image_index: u32, camera: &CameraData) -> Result<u32> {
        let camera_offset = self.camera_slot(slot, image_index);
        self.uniforms.write(self.camera, camera_offset as u64, camera.as_bytes())?;

        let cmd = view.begin_command_buffer(image_index)?;
        let mut draw_calls = 0;
        for entry in self.scenes.values() {
            let Some(material) = self.materials.get(entry.material) else {
                continue;
            };
            draw_calls += entry.scene.bind_to_cmd_buffer(cmd, material, &self.geometry, camera_offset)?;
        }
        Ok(draw_calls)
    }

    /// Turn a decoded model image into a texture and rebind the scene
    fn apply_decoded(&mut self, key: SceneKey, image_index: usize, name: &str, decoded: Option<Result<DecodedImage>>) {
        let pixels = match decoded {
            Some(Ok(pixels)) => pixels,
            Some(Err(e)) => {
                engine_warn!("nebula::Renderer", "Texture '{}': {}; keeping placeholder", name, e);
                return;
            }
            None => {
                engine_debug!("nebula::Renderer", "Decode of '{}' did not run", name);
                return;
            }
        };

        let Some(entry) = self.scenes.get_mut(key) else {
            engine_debug!("nebula::Renderer", "Texture '{}' decoded after its scene was unloaded", name);
            return;
        };
        let Some(material) = self.materials.get_mut(entry.material) else {
            return;
        };

        let texture = match Image::texture(
            self.device.clone(),
            &self.staging,
            name,
            ImageKind::Texture,
            &pixels,
            self.placeholder_size,
        ) {
            Ok(texture) => texture,
            Err(e) => {
                engine_warn!("nebula::Renderer", "Texture '{}': {}; keeping placeholder", name, e);
                return;
            }
        };

        if let Err(e) = entry.scene.set_texture(image_index, Arc::new(texture), material) {
            engine_warn!("nebula::Renderer", "Texture '{}' could not be bound: {}", name, e);
        }
    }
}

/// Device-level owner of every rendering object
pub struct Renderer {
    config: Config,
    views: Vec<Option<View>>,
    tasks: TaskPool<Resources>,
    resources: Resources,
    shaders: FxHashMap<String, Arc<Shader>>,
    material_index: FxHashMap<(String, String), MaterialKey>,
    default_material: MaterialKey,
    decoder: Arc<dyn ImageDecoder>,
    camera: CameraData,
    elapsed: f64,
    frame_index: u64,
    exited: bool,
}

impl Renderer {
    /// Create pools, default resources and the default material
    ///
    /// # Arguments
    ///
    /// * `device` - Backend device; queues and command pools already exist
    /// * `config` - Pool capacities, view count, worker count
    /// * `vertex` / `fragment` - Shaders of the default material
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for startup and is returned as is.
    pub fn new(device: Arc<dyn GraphicsDevice>, config: Config, vertex: ShaderSource, fragment: ShaderSource) -> Result<Self> {
        let info = device.info();
        engine_info!("nebula::Renderer", "Initializing renderer on '{}' ({:?})", info.name, info.device_type);

        let host = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;
        let staging = BufferPool::allocate(
            device.clone(),
            "staging",
            host,
            BufferUsage::TRANSFER_SRC,
            config.staging_pool_capacity,
        )?;
        let uniforms = BufferPool::allocate(
            device.clone(),
            "uniform",
            host,
            BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
            config.uniform_pool_capacity,
        )?;
        let geometry = BufferPool::allocate(
            device.clone(),
            "geometry",
            MemoryPropertyFlags::DEVICE_LOCAL,
            BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
            config.geometry_pool_capacity,
        )?;

        let camera_data = CameraData::default();
        let camera_size = std::mem::size_of::<CameraData>() as u64;
        let stride = align_up(camera_size, uniforms.alignment());
        let slots = config.max_views as u64 * config.max_swapchain_images as u64;
        let Ok(camera_stride) = u32::try_from(stride) else {
            engine_bail_warn!("nebula::Renderer", "Camera slot stride {} does not fit a dynamic offset", stride);
        };
        if stride * slots.saturating_sub(1) > u32::MAX as u64 {
            engine_bail_warn!("nebula::Renderer", "{} camera slots of {} bytes exceed the dynamic offset range",
                slots, stride);
        }
        let camera = uniforms.make_buffer(stride * slots.max(1))?;
        for slot in 0..slots {
            uniforms.write(camera, slot * stride, camera_data.as_bytes())?;
        }
        let camera_binding = BufferBinding { range: camera_size, ..uniforms.binding(camera)? };

        let placeholder = Arc::new(Image::placeholder(device.clone(), &staging, config.placeholder_size)?);
        let tasks = TaskPool::new(config.worker_threads)?;

        let mut renderer = Self {
            views: (0..config.max_views).map(|_| None).collect(),
            tasks,
            resources: Resources {
                device,
                scenes: SlotMap::with_key(),
                materials: SlotMap::with_key(),
                placeholder,
                placeholder_size: config.placeholder_size,
                camera,
                camera_binding,
                camera_stride,
                images_per_view: config.max_swapchain_images,
                staging,
                uniforms,
                geometry,
            },
            shaders: FxHashMap::default(),
            material_index: FxHashMap::default(),
            default_material: MaterialKey::default(),
            decoder: Arc::new(FileImageDecoder::new()),
            camera: camera_data,
            elapsed: 0.0,
            frame_index: 0,
            exited: false,
            config,
        };

        renderer.default_material = renderer.register_material(DEFAULT_MATERIAL, &vertex, &fragment)?;
        engine_info!("nebula::Renderer", "Renderer ready: {} view slot(s), {} worker(s)",
            renderer.views.len(), renderer.tasks.worker_count());
        Ok(renderer)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.exited {
            engine_bail_warn!("nebula::Renderer", "Renderer has exited");
        }
        Ok(())
    }

    // ===== FRAME =====

    /// Run one frame on every view
    ///
    /// A view whose surface changed size gets a new swapchain and does not
    /// draw this tick. Out-of-date and suboptimal swapchains are handled
    /// inside the view and never surface as errors.
    pub fn tick(&mut self, delta_time: f32) -> Result<FrameStats> {
        self.ensure_running()?;
        self.elapsed += delta_time as f64;
        self.frame_index += 1;

        let finished = self.tasks.poll();
        self.apply_finished(finished)?;

        let mut stats = FrameStats::default();
        let camera = self.camera;
        let resources = &self.resources;

        for (slot, view) in self.views.iter_mut().enumerate() {
            let Some(view) = view.as_mut() else {
                continue;
            };
            if view.update_extent() {
                if view.recreate_swapchain()? {
                    stats.swapchain_recreations += 1;
                }
                stats.frames_skipped += 1;
                continue;
            }

            let Some(image_index) = view.acquire_next_image_index()? else {
                stats.frames_skipped += 1;
                continue;
            };

            let data = match view.view_matrix() {
                Some(matrix) => camera.with_view(matrix),
                None => camera,
            };
            match resources.record_view(view, slot, image_index, &data) {
                Ok(draw_calls) => stats.draw_calls += draw_calls,
                Err(e) => {
                    if let Err(abort) = view.abort_frame(image_index) {
                        engine_error!("nebula::Renderer", "View '{}': frame could not be abandoned: {}", view.name(), abort);
                    }
                    return Err(e);
                }
            }

            match view.submit_command_buffer(image_index)? {
                PresentOutcome::OutOfDate => stats.frames_skipped += 1,
                PresentOutcome::Presented | PresentOutcome::Suboptimal => stats.views_drawn += 1,
            }
        }

        if stats.swapchain_recreations > 0 {
            self.notify_views_changed()?;
        }

        engine_trace!("nebula::Renderer", "Frame {} ({:.3} ms): {:?}", self.frame_index, delta_time * 1000.0, stats);
        Ok(stats)
    }

    /// Block until every background job finished (or `timeout` elapsed) and apply the results
    ///
    /// # Returns
    ///
    /// Number of jobs applied.
    pub fn finish_pending_tasks(&mut self, timeout: Duration) -> Result<usize> {
        self.ensure_running()?;
        let finished = self.tasks.poll_until_idle(timeout);
        self.apply_finished(finished)
    }

    fn apply_finished(&mut self, finished: Vec<FinishedTask<Resources>>) -> Result<usize> {
        if finished.is_empty() {
            return Ok(0);
        }
        // Completions rewrite descriptor sets that in-flight frames may still read
        self.resources.device.wait_idle()?;
        let count = finished.len();
        for task in finished {
            task.complete(&mut self.resources);
        }
        engine_debug!("nebula::Renderer", "Applied {} finished task(s)", count);
        Ok(count)
    }

    // ===== SCENES =====

    /// Instantiate a model with the default material
    pub fn load_model(&mut self, model: &Model) -> Result<SceneKey> {
        self.load_model_with(model, self.default_material)
    }

    /// Instantiate a model with a registered material
    ///
    /// A model that fails validation is replaced by an empty scene with a
    /// warning. Images without pixels are decoded on the task pool and bound
    /// once decoded; until then they sample the placeholder.
    pub fn load_model_with(&mut self, model: &Model, material: MaterialKey) -> Result<SceneKey> {
        self.ensure_running()?;

        let substitute;
        let model = match model.validate() {
            Ok(()) => model,
            Err(e) => {
                engine_warn!("nebula::Renderer", "Model '{}' rejected: {}; loading an empty scene", model.name, e);
                substitute = Model::empty(&model.name);
                &substitute
            }
        };

        let resources = &mut self.resources;
        let Some(target) = resources.materials.get_mut(material) else {
            engine_bail_warn!("nebula::Renderer", "Model '{}': unknown material {:?}", model.name, material);
        };
        let scene = Scene::create(
            &SceneResources {
                device: &resources.device,
                geometry: &resources.geometry,
                uniforms: &resources.uniforms,
                staging: &resources.staging,
                camera: &resources.camera_binding,
                placeholder_size: resources.placeholder_size,
            },
            target,
            model,
        )?;

        let pending = scene.pending_images().to_vec();
        let key = resources.scenes.insert(SceneEntry { scene, material, tasks: Vec::new() });

        let mut tasks = Vec::with_capacity(pending.len());
        for image_index in pending {
            let image = &model.images[image_index];
            let name = texture_name(model, image_index, image);
            if image.uri.is_empty() {
                engine_warn!("nebula::Renderer", "Image '{}' has neither pixels nor a uri; keeping placeholder", name);
                continue;
            }
            let path = PathBuf::from(&image.uri);
            let decoder = Arc::clone(&self.decoder);
            tasks.push(self.tasks.submit(
                move || decoder.decode(&path),
                move |resources: &mut Resources, decoded: Option<Result<DecodedImage>>| {
                    resources.apply_decoded(key, image_index, &name, decoded)
                },
            ));
        }
        if let Some(entry) = self.resources.scenes.get_mut(key) {
            engine_debug!("nebula::Renderer", "Scene '{}': {} decode job(s) queued", entry.scene.name(), tasks.len());
            entry.tasks = tasks;
        }

        Ok(key)
    }

    /// Release a scene once the device is idle
    pub fn unload_scene(&mut self, key: SceneKey) -> Result<()> {
        self.ensure_running()?;
        if !self.resources.scenes.contains_key(key) {
            engine_bail_warn!("nebula::Renderer", "Unknown scene {:?}", key);
        }
        self.resources.device.wait_idle()?;

        let resources = &mut self.resources;
        let Some(entry) = resources.scenes.remove(key) else {
            engine_bail_warn!("nebula::Renderer", "Unknown scene {:?}", key);
        };
        for id in &entry.tasks {
            self.tasks.abort(*id);
        }
        let name = entry.scene.name().to_string();
        match resources.materials.get_mut(entry.material) {
            Some(material) => entry.scene.release(material, &resources.geometry, &resources.uniforms),
            None => engine_warn!("nebula::Renderer", "Scene '{}': material already gone", name),
        }
        engine_info!("nebula::Renderer", "Scene '{}' unloaded", name);
        Ok(())
    }

    pub fn scene(&self, key: SceneKey) -> Option<&Scene> {
        self.resources.scenes.get(key).map(|entry| &entry.scene)
    }

    pub fn scene_count(&self) -> usize {
        self.resources.scenes.len()
    }

    /// Replace the decoder used for images without pixels
    pub fn set_image_decoder(&mut self, decoder: Arc<dyn ImageDecoder>) {
        self.decoder = decoder;
    }

    /// Background jobs not applied yet
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    // ===== SHADERS / MATERIALS =====

    fn load_shader(&mut self, source: &ShaderSource, stage: ShaderStage) -> Result<Arc<Shader>> {
        let key = source.key();
        if let Some(shader) = self.shaders.get(&key) {
            return Ok(shader.clone());
        }
        let shader = Arc::new(Shader::from_source(self.resources.device.as_ref(), source, stage)?);
        self.shaders.insert(key, shader.clone());
        Ok(shader)
    }

    /// Create (or look up) the material of a shader pair
    ///
    /// One material exists per vertex/fragment pair; registering the same
    /// pair again returns the existing key.
    pub fn register_material(&mut self, name: &str, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<MaterialKey> {
        self.ensure_running()?;
        let pair = (vertex.key(), fragment.key());
        if let Some(key) = self.material_index.get(&pair) {
            return Ok(*key);
        }

        let vertex_shader = self.load_shader(vertex, ShaderStage::Vertex)?;
        let fragment_shader = self.load_shader(fragment, ShaderStage::Fragment)?;
        let material = Material::init(
            self.resources.device.clone(),
            MaterialDesc {
                name: name.to_string(),
                vertex_shader,
                fragment_shader,
                max_instances: self.config.material_instance_capacity,
                render_pass: self.render_pass_layout(),
                cull_mode: CullMode::Back,
                dynamic_uniforms: vec![CAMERA_BINDING.to_string()],
            },
            self.resources.placeholder.clone(),
        )?;

        let key = self.resources.materials.insert(material);
        self.material_index.insert(pair, key);
        engine_info!("nebula::Renderer", "Material '{}' registered", name);
        Ok(key)
    }

    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.resources.materials.get(key)
    }

    pub fn default_material(&self) -> MaterialKey {
        self.default_material
    }

    /// Registered shader by path or name
    pub fn shader(&self, key: &str) -> Option<&Arc<Shader>> {
        self.shaders.get(key)
    }

    pub fn placeholder(&self) -> &Arc<Image> {
        &self.resources.placeholder
    }

    // ===== VIEWS =====

    /// Attachment layout shared by the active views
    pub fn render_pass_layout(&self) -> RenderPassLayout {
        match self.views.iter().flatten().next() {
            Some(view) => view.render_pass_layout(),
            None => RenderPassLayout {
                color_format: ImageFormat::B8G8R8A8_SRGB,
                depth_format: ImageFormat::D32_FLOAT,
                samples: self.config.samples,
            },
        }
    }

    /// Put a surface into the first free view slot
    ///
    /// # Returns
    ///
    /// Index of the slot, valid until `remove_view`.
    pub fn add_view(&mut self, surface: Arc<dyn Surface>) -> Result<usize> {
        self.ensure_running()?;
        let Some(index) = self.views.iter().position(Option::is_none) else {
            engine_bail_warn!("nebula::Renderer", "All {} view slots are in use", self.views.len());
        };

        let view = View::new(
            self.resources.device.clone(),
            &format!("view{}", index),
            surface,
            ViewDesc::from_config(&self.config),
        )?;
        self.views[index] = Some(view);
        self.notify_views_changed()?;

        engine_info!("nebula::Renderer", "View {} added ({} active)", index, self.view_count());
        Ok(index)
    }

    /// Destroy the view in slot `index`; the slot becomes reusable
    pub fn remove_view(&mut self, index: usize) -> Result<()> {
        let Some(mut view) = self.views.get_mut(index).and_then(Option::take) else {
            engine_bail_warn!("nebula::Renderer", "View slot {} is empty", index);
        };
        view.destroy();
        self.notify_views_changed()?;
        engine_info!("nebula::Renderer", "View {} removed ({} active)", index, self.view_count());
        Ok(())
    }

    /// Keep every material pipeline compatible with the active views
    fn notify_views_changed(&mut self) -> Result<()> {
        let layout = self.render_pass_layout();
        let resources = &mut self.resources;
        if resources.materials.values().all(|material| material.render_pass_layout() == layout) {
            return Ok(());
        }
        resources.device.wait_idle()?;
        for material in resources.materials.values_mut() {
            material.on_views_changed(layout)?;
        }
        Ok(())
    }

    pub fn view(&self, index: usize) -> Option<&View> {
        self.views.get(index).and_then(Option::as_ref)
    }

    pub fn view_mut(&mut self, index: usize) -> Option<&mut View> {
        self.views.get_mut(index).and_then(Option::as_mut)
    }

    /// Number of occupied view slots
    pub fn view_count(&self) -> usize {
        self.views.iter().flatten().count()
    }

    pub fn max_views(&self) -> usize {
        self.views.len()
    }

    // ===== CAMERA =====

    /// Camera used by every view without a view-matrix override
    pub fn set_camera_data(&mut self, view: Mat4, proj: Mat4) {
        self.camera = CameraData::new(view, proj);
    }

    pub fn camera_data(&self) -> CameraData {
        self.camera
    }

    /// First camera slot of the uniform pool (range covers one block)
    pub fn camera_buffer(&self) -> &BufferBinding {
        &self.resources.camera_binding
    }

    /// Dynamic offset of the camera block a view uses for one swapchain image
    pub fn camera_slot_offset(&self, view: usize, image_index: u32) -> u32 {
        self.resources.camera_slot(view, image_index)
    }

    // ===== ACCESSORS =====

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.resources.device
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn geometry_pool(&self) -> &BufferPool {
        &self.resources.geometry
    }

    pub fn uniform_pool(&self) -> &BufferPool {
        &self.resources.uniforms
    }

    pub fn staging_pool(&self) -> &BufferPool {
        &self.resources.staging
    }

    /// Seconds accumulated from `tick` deltas
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    // ===== SHUTDOWN =====

    /// Tear everything down once the device is idle
    ///
    /// Order: workers, views, scenes, materials, placeholder, pools. Every
    /// other call fails afterwards.
    pub fn exit(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;

        self.tasks.shutdown();
        // Completions would create textures for scenes about to go away
        drop(self.tasks.poll());

        if let Err(e) = self.resources.device.wait_idle() {
            engine_warn!("nebula::Renderer", "wait_idle failed during exit: {}", e);
        }

        for slot in &mut self.views {
            if let Some(mut view) = slot.take() {
                view.destroy();
            }
        }

        let resources = &mut self.resources;
        let scenes: Vec<SceneEntry> = resources.scenes.drain().map(|(_, entry)| entry).collect();
        for entry in scenes {
            if let Some(material) = resources.materials.get_mut(entry.material) {
                entry.scene.release(material, &resources.geometry, &resources.uniforms);
            }
        }
        resources.materials.clear();
        self.material_index.clear();
        self.shaders.clear();

        if let Err(e) = resources.uniforms.free_buffer(resources.camera) {
            engine_warn!("nebula::Renderer", "Camera buffer release failed: {}", e);
        }
        engine_info!("nebula::Renderer", "Renderer shut down after {} frame(s)", self.frame_index);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;

//! Unit tests for Scene

use std::sync::Arc;
use crate::asset::*;
use crate::config::SampleCount;
use crate::error::Error;
use crate::gpu::mock_device::{MockBuffer, MockDevice};
use crate::gpu::*;
use crate::resource::*;
use crate::scene::packing::{pack_geometry, MaterialData};
use crate::scene::scene::*;

const BLOB: [u8; 4] = [0x03, 0x02, 0x23, 0x07];

struct Fixture {
    mock: Arc<MockDevice>,
    device: Arc<dyn GraphicsDevice>,
    staging: BufferPool,
    uniforms: BufferPool,
    geometry: BufferPool,
    camera: BufferBinding,
    material: Material,
}

impl Fixture {
    fn create(&mut self, model: &Model) -> crate::error::Result<Scene> {
        let resources = SceneResources {
            device: &self.device,
            geometry: &self.geometry,
            uniforms: &self.uniforms,
            staging: &self.staging,
            camera: &self.camera,
            placeholder_size: 8,
        };
        Scene::create(&resources, &mut self.material, model)
    }
}

fn fixture_with(uniform_capacity: u64) -> Fixture {
    let mock = MockDevice::new();
    let device: Arc<dyn GraphicsDevice> = mock.clone();
    let host = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;
    let staging = BufferPool::allocate(device.clone(), "staging", host, BufferUsage::TRANSFER_SRC, 1 << 20).unwrap();
    let uniforms = BufferPool::allocate(
        device.clone(),
        "uniform",
        host,
        BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
        uniform_capacity,
    )
    .unwrap();
    let geometry = BufferPool::allocate(
        device.clone(),
        "geometry",
        MemoryPropertyFlags::DEVICE_LOCAL,
        BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
        1 << 20,
    )
    .unwrap();
    let camera = uniforms.binding(uniforms.make_buffer(208).unwrap()).unwrap();
    let placeholder = Arc::new(Image::placeholder(device.clone(), &staging, 8).unwrap());

    let vertex = Arc::new(Shader::from_bytes(device.as_ref(), "pbr.vert", &BLOB, ShaderStage::Vertex).unwrap());
    let fragment = Arc::new(Shader::from_bytes(device.as_ref(), "pbr.frag", &BLOB, ShaderStage::Fragment).unwrap());
    let material = Material::init(
        device.clone(),
        MaterialDesc {
            name: "pbr".into(),
            vertex_shader: vertex,
            fragment_shader: fragment,
            max_instances: 4,
            render_pass: RenderPassLayout {
                color_format: ImageFormat::B8G8R8A8_SRGB,
                depth_format: ImageFormat::D32_FLOAT,
                samples: SampleCount::S1,
            },
            cull_mode: CullMode::Back,
            dynamic_uniforms: vec![CAMERA_BINDING.to_string()],
        },
        placeholder,
    )
    .unwrap();

    mock.clear_log();
    Fixture { mock, device, staging, uniforms, geometry, camera, material }
}

fn fixture() -> Fixture {
    fixture_with(64 * 1024)
}

fn triangle_model() -> Model {
    Model {
        name: "triangle".into(),
        scenes: vec![ModelScene { name: "root".into(), nodes: vec![0] }],
        default_scene: Some(0),
        nodes: vec![Node { name: "n".into(), children: vec![], mesh: Some(0), transform: NodeTransform::identity() }],
        meshes: vec![Mesh {
            name: "tri".into(),
            primitives: vec![Primitive {
                vertices: vec![Vertex::at([0.0, 0.0, 0.0]), Vertex::at([1.0, 0.0, 0.0]), Vertex::at([0.0, 1.0, 0.0])],
                indices: vec![0, 1, 2],
                material: 0,
            }],
        }],
        materials: vec![ModelMaterial::default()],
        images: vec![],
    }
}

fn textured_model(pixels: Option<DecodedImage>, uri: &str) -> Model {
    let mut model = triangle_model();
    model.materials[0].base_color_texture = Some(0);
    model.images.push(ModelImage { uri: uri.into(), pixels });
    model
}

fn rgba(width: u32, height: u32) -> DecodedImage {
    DecodedImage { width, height, channels: 4, pixels: vec![200; (width * height * 4) as usize] }
}

fn written(fx: &Fixture, scene: &Scene, material_index: usize, name: &str) -> WrittenResource {
    let instance = fx.material.instance(scene.instances()[material_index]).unwrap();
    instance.last_writes().iter().find(|w| w.name == name).unwrap().resource.clone()
}

// ============================================================================
// END TO END
// ============================================================================

#[test]
fn test_single_triangle_end_to_end() {
    let mut fx = fixture();

    let scene = fx.create(&triangle_model()).unwrap();

    assert_eq!(scene.draw_count(), 1);
    let draw = scene.draws()[0][0];
    assert_eq!(draw.vertex_offset, 0);
    assert_eq!(draw.index_offset, 0);
    assert_eq!(draw.index_count, 3);

    assert_eq!(scene.instances().len(), 1);
    let instance = fx.material.instance(scene.instances()[0]).unwrap();
    let buffers: Vec<(&str, WrittenResource)> = instance
        .last_writes()
        .iter()
        .filter(|w| matches!(w.resource, WrittenResource::Buffer { .. }))
        .map(|w| (w.name.as_str(), w.resource.clone()))
        .collect();
    assert_eq!(buffers, vec![
        ("camera", WrittenResource::Buffer { offset: 0, range: 208 }),
        ("material", WrittenResource::Buffer { offset: 256, range: 64 }),
    ]);
}

#[test]
fn test_geometry_uploaded_in_one_copy() {
    let mut fx = fixture();
    let model = triangle_model();

    let scene = fx.create(&model).unwrap();

    assert_eq!(fx.mock.calls_with("cmd:copy_buffer"), vec![
        "cmd:copy_buffer(staging_pool+0 -> geometry_pool+0, 156)".to_string(),
        "cmd:copy_buffer(staging_pool+0 -> uniform_pool+256, 256)".to_string(),
    ]);
    assert_eq!(scene.index_offset(), 144);

    let sub = fx.geometry.sub_buffer(scene.geometry_sub_buffer().unwrap()).unwrap();
    let bytes = MockBuffer::from_dyn(fx.geometry.backing().as_ref()).read(sub.offset, sub.size);
    assert_eq!(bytes, pack_geometry(&model).bytes);
    // staging entries are returned after each upload
    assert_eq!(fx.staging.live_count(), 0);
}

#[test]
fn test_material_record_written_at_aligned_offset() {
    let mut fx = fixture();
    let mut model = triangle_model();
    model.materials[0].metallic_factor = 0.25;

    let _scene = fx.create(&model).unwrap();

    let bytes = MockBuffer::from_dyn(fx.uniforms.backing().as_ref()).read(256, 64);
    let expected = MaterialData::from_material(&model.materials[0]);
    assert_eq!(bytes, bytemuck::bytes_of(&expected).to_vec());
}

#[test]
fn test_bind_to_cmd_buffer_records_draws() {
    let mut fx = fixture();
    let scene = fx.create(&triangle_model()).unwrap();
    let mut cmd = fx.device.create_command_list().unwrap();
    fx.mock.clear_log();

    let draws = scene.bind_to_cmd_buffer(cmd.as_mut(), &fx.material, &fx.geometry, 512).unwrap();

    assert_eq!(draws, 1);
    assert_eq!(fx.mock.calls(), vec![
        "cmd:bind_vertex_buffer(geometry_pool, 0)",
        "cmd:bind_index_buffer(geometry_pool, 144, U32)",
        "cmd:bind_pipeline(pbr)",
        "cmd:bind_descriptor_sets(first=0, count=2, dynamic=[512])",
        "cmd:push_constants(0, 64)",
        "cmd:draw_indexed(3, 0, 0)",
    ]);
}

#[test]
fn test_non_indexed_primitive_draws_vertices() {
    let mut fx = fixture();
    let mut model = triangle_model();
    model.meshes[0].primitives[0].indices.clear();
    let scene = fx.create(&model).unwrap();
    let mut cmd = fx.device.create_command_list().unwrap();
    fx.mock.clear_log();

    scene.bind_to_cmd_buffer(cmd.as_mut(), &fx.material, &fx.geometry, 0).unwrap();

    assert_eq!(fx.mock.count("cmd:bind_index_buffer"), 0);
    assert_eq!(fx.mock.calls_with("cmd:draw"), vec!["cmd:draw(3, 0)".to_string()]);
}

#[test]
fn test_empty_model_records_nothing() {
    let mut fx = fixture();
    let scene = fx.create(&Model::empty("broken")).unwrap();
    let mut cmd = fx.device.create_command_list().unwrap();
    fx.mock.clear_log();

    assert_eq!(scene.bind_to_cmd_buffer(cmd.as_mut(), &fx.material, &fx.geometry, 0).unwrap(), 0);
    assert!(fx.mock.calls().is_empty());
    assert!(scene.instances().is_empty());
    assert_eq!(fx.geometry.live_count(), 0);
}

// ============================================================================
// TEXTURES
// ============================================================================

#[test]
fn test_decoded_texture_is_bound() {
    let mut fx = fixture();

    let scene = fx.create(&textured_model(Some(rgba(2, 2)), "albedo.png")).unwrap();

    assert!(scene.pending_images().is_empty());
    assert_eq!(written(&fx, &scene, 0, BASE_COLOR_TEXTURE),
        WrittenResource::Image { image: "albedo.png".into(), placeholder: false });
    assert_eq!(written(&fx, &scene, 0, NORMAL_TEXTURE),
        WrittenResource::Image { image: "placeholder".into(), placeholder: true });
}

#[test]
fn test_invalid_pixels_fall_back_to_checkerboard() {
    let mut fx = fixture();
    let broken = DecodedImage { width: 4, height: 4, channels: 4, pixels: vec![1, 2, 3] };

    let scene = fx.create(&textured_model(Some(broken), "broken.png")).unwrap();

    assert!(scene.texture(0).unwrap().is_placeholder());
    assert_eq!(written(&fx, &scene, 0, BASE_COLOR_TEXTURE),
        WrittenResource::Image { image: "broken.png".into(), placeholder: true });
}

#[test]
fn test_pending_texture_is_rebound_when_provided() {
    let mut fx = fixture();
    let mut scene = fx.create(&textured_model(None, "late.png")).unwrap();

    assert_eq!(scene.pending_images(), &[0]);
    assert!(scene.texture(0).is_none());
    assert_eq!(written(&fx, &scene, 0, BASE_COLOR_TEXTURE),
        WrittenResource::Image { image: "placeholder".into(), placeholder: true });

    let image = Arc::new(
        Image::texture(fx.device.clone(), &fx.staging, "late.png", ImageKind::Texture, &rgba(1, 1), 8).unwrap(),
    );
    let updated = scene.set_texture(0, image, &mut fx.material).unwrap();

    assert_eq!(updated, 1);
    assert!(scene.pending_images().is_empty());
    assert_eq!(written(&fx, &scene, 0, BASE_COLOR_TEXTURE),
        WrittenResource::Image { image: "late.png".into(), placeholder: false });
}

#[test]
fn test_shared_image_rebinds_every_user() {
    let mut fx = fixture();
    let mut model = textured_model(None, "shared.png");
    model.materials.push(ModelMaterial { emissive_texture: Some(0), ..Default::default() });
    model.materials.push(ModelMaterial::default());
    let mut scene = fx.create(&model).unwrap();

    let image = Arc::new(
        Image::texture(fx.device.clone(), &fx.staging, "shared.png", ImageKind::Texture, &rgba(1, 1), 8).unwrap(),
    );
    let updated = scene.set_texture(0, image, &mut fx.material).unwrap();

    assert_eq!(updated, 2);
    assert_eq!(written(&fx, &scene, 1, EMISSIVE_TEXTURE),
        WrittenResource::Image { image: "shared.png".into(), placeholder: false });
    assert_eq!(written(&fx, &scene, 2, EMISSIVE_TEXTURE),
        WrittenResource::Image { image: "placeholder".into(), placeholder: true });
}

#[test]
fn test_set_texture_rejects_unknown_image() {
    let mut fx = fixture();
    let mut scene = fx.create(&triangle_model()).unwrap();
    let image = Arc::new(
        Image::texture(fx.device.clone(), &fx.staging, "x", ImageKind::Texture, &rgba(1, 1), 8).unwrap(),
    );

    assert!(scene.set_texture(3, image, &mut fx.material).is_err());
}

// ============================================================================
// LIFETIME
// ============================================================================

#[test]
fn test_release_returns_sub_buffers_and_instances() {
    let mut fx = fixture();
    let uniforms_before = fx.uniforms.live_count();
    let scene = fx.create(&triangle_model()).unwrap();
    assert_eq!(fx.geometry.live_count(), 1);
    assert_eq!(fx.uniforms.live_count(), uniforms_before + 1);

    scene.release(&mut fx.material, &fx.geometry, &fx.uniforms);

    assert_eq!(fx.geometry.live_count(), 0);
    assert_eq!(fx.uniforms.live_count(), uniforms_before);
    assert_eq!(fx.material.instance_count(), 0);
}

#[test]
fn test_failed_create_releases_partial_state() {
    // Room for the camera block but not for the material record
    let mut fx = fixture_with(300);

    let result = fx.create(&triangle_model());

    assert!(matches!(result, Err(Error::OutOfSpace { .. })));
    assert_eq!(fx.geometry.live_count(), 0);
    assert_eq!(fx.uniforms.live_count(), 1);
    assert_eq!(fx.material.instance_count(), 0);
}

#[test]
fn test_scenes_share_the_geometry_pool() {
    let mut fx = fixture();
    let first = fx.create(&triangle_model()).unwrap();
    let second = fx.create(&triangle_model()).unwrap();

    let a = fx.geometry.sub_buffer(first.geometry_sub_buffer().unwrap()).unwrap();
    let b = fx.geometry.sub_buffer(second.geometry_sub_buffer().unwrap()).unwrap();
    assert!(a.end() <= b.offset);
    assert_eq!(fx.material.instance_count(), 2);
}

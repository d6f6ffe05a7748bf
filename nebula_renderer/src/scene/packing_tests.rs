//! Unit tests for scene packing

use glam::{Mat4, Quat, Vec3, Vec4};
use crate::asset::*;
use crate::scene::packing::*;

fn tri(material: usize, base: f32) -> Primitive {
    Primitive {
        vertices: vec![
            Vertex::at([base, 0.0, 0.0]),
            Vertex::at([base + 1.0, 0.0, 0.0]),
            Vertex::at([base, 1.0, 0.0]),
        ],
        indices: vec![0, 1, 2],
        material,
    }
}

fn node(mesh: Option<usize>, children: Vec<usize>, transform: NodeTransform) -> Node {
    Node { name: String::new(), children, mesh, transform }
}

fn single_triangle() -> Model {
    Model {
        name: "triangle".into(),
        scenes: vec![ModelScene { name: "s".into(), nodes: vec![0] }],
        default_scene: Some(0),
        nodes: vec![node(Some(0), vec![], NodeTransform::identity())],
        meshes: vec![Mesh { name: "m".into(), primitives: vec![tri(0, 0.0)] }],
        materials: vec![ModelMaterial::default()],
        images: vec![],
    }
}

/// Two materials, three nodes; material 1 is drawn before material 0 in traversal
fn two_materials() -> Model {
    Model {
        name: "two".into(),
        scenes: vec![ModelScene { name: "s".into(), nodes: vec![0] }],
        default_scene: None,
        nodes: vec![
            node(Some(0), vec![1, 2], NodeTransform::identity()),
            node(Some(1), vec![], NodeTransform::Matrix(Mat4::from_translation(Vec3::X))),
            node(Some(2), vec![], NodeTransform::identity()),
        ],
        meshes: vec![
            Mesh { name: "a".into(), primitives: vec![tri(1, 0.0)] },
            Mesh { name: "b".into(), primitives: vec![tri(0, 10.0), tri(1, 20.0)] },
            Mesh {
                name: "c".into(),
                primitives: vec![Primitive { vertices: vec![Vertex::at([5.0; 3]); 6], indices: vec![], material: 0 }],
            },
        ],
        materials: vec![ModelMaterial::default(), ModelMaterial::default()],
        images: vec![],
    }
}

// ============================================================================
// TRANSFORMS
// ============================================================================

#[test]
fn test_transform_chain_accumulates_parent_first() {
    let t1 = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
    let t2 = Mat4::from_quat(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
    let t3 = Mat4::from_scale(Vec3::splat(3.0));
    let model = Model {
        scenes: vec![ModelScene { name: "s".into(), nodes: vec![0] }],
        nodes: vec![
            node(None, vec![1], NodeTransform::Matrix(t1)),
            node(None, vec![2], NodeTransform::Matrix(t2)),
            node(Some(0), vec![], NodeTransform::Matrix(t3)),
        ],
        meshes: vec![Mesh::default()],
        ..Default::default()
    };

    let baked = bake_transforms(&model);

    assert_eq!(baked.len(), 1);
    assert_eq!(baked[0].node, 2);
    assert!(baked[0].world.abs_diff_eq(t1 * t2 * t3, 1e-6));
    // (1,0,0) is scaled, rotated onto +Y, then translated
    let p = baked[0].world.transform_point3(Vec3::X);
    assert!(p.abs_diff_eq(Vec3::new(1.0, 3.0, 0.0), 1e-5));
}

#[test]
fn test_identity_round_trips() {
    let baked = bake_transforms(&single_triangle());
    assert_eq!(baked[0].world, Mat4::IDENTITY);
}

#[test]
fn test_uses_default_scene() {
    let mut model = single_triangle();
    model.nodes.push(node(Some(0), vec![], NodeTransform::Matrix(Mat4::from_scale(Vec3::splat(2.0)))));
    model.scenes.push(ModelScene { name: "other".into(), nodes: vec![1] });
    model.default_scene = Some(1);

    let baked = bake_transforms(&model);
    assert_eq!(baked.len(), 1);
    assert_eq!(baked[0].node, 1);
}

#[test]
fn test_cycle_is_cut() {
    let mut model = single_triangle();
    model.nodes[0].children = vec![0];

    let baked = bake_transforms(&model);
    assert_eq!(baked.len(), 1);
}

#[test]
fn test_model_without_scene_packs_nothing() {
    let packed = pack_geometry(&Model::empty("x"));
    assert!(packed.is_empty());
    assert_eq!(packed.draw_count(), 0);
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[test]
fn test_single_triangle_record() {
    let packed = pack_geometry(&single_triangle());

    assert_eq!(packed.draws.len(), 1);
    assert_eq!(packed.draws[0].len(), 1);
    let draw = packed.draws[0][0];
    assert_eq!(draw.vertex_offset, 0);
    assert_eq!(draw.index_offset, 0);
    assert_eq!(draw.index_count, 3);
    assert_eq!(draw.vertex_count, 3);
    assert_eq!(packed.index_offset, 3 * 48);
    assert_eq!(packed.bytes.len(), 3 * 48 + 3 * 4);
    assert_eq!(&packed.bytes[packed.index_offset as usize..], bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
}

#[test]
fn test_draws_grouped_by_material_in_traversal_order() {
    let packed = pack_geometry(&two_materials());

    // Traversal: node0 (mesh a), node1 (mesh b), node2 (mesh c)
    let material0: Vec<(u64, u32)> = packed.draws[0].iter().map(|d| (d.vertex_offset, d.index_count)).collect();
    let material1: Vec<(u64, u32)> = packed.draws[1].iter().map(|d| (d.vertex_offset, d.index_count)).collect();
    assert_eq!(material0, vec![(144, 3), (432, 0)]);
    assert_eq!(material1, vec![(0, 3), (288, 3)]);

    assert_eq!(packed.draws[0][0].world, Mat4::from_translation(Vec3::X));
    assert_eq!(packed.draws[0][0].first_vertex(48), 3);
    assert_eq!(packed.draws[1][1].first_index(), 6);
    assert!(!packed.draws[0][1].is_indexed());
}

#[test]
fn test_vertices_precede_indices() {
    let packed = pack_geometry(&two_materials());

    let vertex_bytes = (3 + 3 + 3 + 6) * 48;
    assert_eq!(packed.index_offset, vertex_bytes);
    assert_eq!(packed.bytes.len() as u64, vertex_bytes + 9 * 4);
}

#[test]
fn test_shared_mesh_is_stored_once() {
    let mut model = single_triangle();
    model.nodes[0].children = vec![1];
    model.nodes.push(node(Some(0), vec![], NodeTransform::Matrix(Mat4::from_translation(Vec3::Y))));

    let packed = pack_geometry(&model);

    assert_eq!(packed.draws[0].len(), 2);
    assert_eq!(packed.draws[0][0].vertex_offset, packed.draws[0][1].vertex_offset);
    assert_ne!(packed.draws[0][0].world, packed.draws[0][1].world);
    assert_eq!(packed.bytes.len(), 3 * 48 + 3 * 4);
}

#[test]
fn test_packing_is_deterministic() {
    let model = two_materials();
    assert_eq!(pack_geometry(&model), pack_geometry(&model));
}

// ============================================================================
// MATERIAL DATA
// ============================================================================

#[test]
fn test_material_record_layout() {
    assert_eq!(std::mem::size_of::<MaterialData>(), 64);

    let material = ModelMaterial {
        base_color_factor: Vec4::new(0.5, 0.25, 1.0, 1.0),
        metallic_factor: 0.3,
        roughness_factor: 0.7,
        emissive_factor: Vec3::new(1.0, 0.0, 0.0),
        normal_texture: Some(0),
        emissive_texture: Some(1),
        ..Default::default()
    };
    let data = MaterialData::from_material(&material);

    assert_eq!(data.texture_flags, texture_flags::NORMAL | texture_flags::EMISSIVE);
    assert_eq!(data.emissive_factor, Vec4::new(1.0, 0.0, 0.0, 0.0));
    let bytes = bytemuck::bytes_of(&data);
    assert_eq!(&bytes[32..36], &0.3f32.to_ne_bytes());
}

#[test]
fn test_pack_materials_aligns_records() {
    let materials = vec![ModelMaterial::default(), ModelMaterial { metallic_factor: 0.5, ..Default::default() }];

    let packed = pack_materials(&materials, 256);

    assert_eq!(packed.stride, 256);
    assert_eq!(packed.bytes.len(), 512);
    assert_eq!(packed.offset_of(1), 256);
    assert_eq!(&packed.bytes[256 + 32..256 + 36], &0.5f32.to_ne_bytes());
    assert_eq!(pack_materials(&materials, 16).stride, 64);
}

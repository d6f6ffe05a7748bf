/// CPU-side scene packing
///
/// Pure functions turning a model graph into the byte layouts the Scene
/// uploads: baked world transforms, one consolidated vertex+index blob with
/// per-material draw records, and std140 material-data records. Nothing here
/// touches the GPU, so packing is deterministic and testable on its own.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::asset::{Model, ModelMaterial, Vertex};
use crate::gpu::align_up;
use crate::engine_warn;

// ===== TRANSFORMS =====

/// World transform of one mesh-bearing node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BakedNode {
    pub node: usize,
    pub mesh: usize,
    pub world: Mat4,
}

/// Depth-first walk from the root scene accumulating local transforms
///
/// Each child's world matrix is `parent_world * child_local`. Nodes are
/// visited in pre-order, children in declaration order. A node reachable
/// twice through the same path (a cycle) is skipped with a warning.
pub fn bake_transforms(model: &Model) -> Vec<BakedNode> {
    let mut baked = Vec::new();
    let Some(scene) = model.root_scene() else {
        return baked;
    };

    let mut on_path = FxHashSet::default();
    for &root in &scene.nodes {
        visit(model, root, Mat4::IDENTITY, &mut on_path, &mut baked);
    }
    baked
}

fn visit(model: &Model, index: usize, parent: Mat4, on_path: &mut FxHashSet<usize>, baked: &mut Vec<BakedNode>) {
    let Some(node) = model.nodes.get(index) else {
        engine_warn!("nebula::Scene", "Model '{}': node {} does not exist", model.name, index);
        return;
    };
    if !on_path.insert(index) {
        engine_warn!("nebula::Scene", "Model '{}': node {} is its own ancestor, skipped", model.name, index);
        return;
    }

    let world = parent * node.transform.to_mat4();
    if let Some(mesh) = node.mesh {
        baked.push(BakedNode { node: index, mesh, world });
    }
    for &child in &node.children {
        visit(model, child, world, on_path, baked);
    }

    on_path.remove(&index);
}

// ===== GEOMETRY =====

/// One draw of one primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRecord {
    /// Byte offset of the first vertex within the vertex region
    pub vertex_offset: u64,
    pub vertex_count: u32,
    /// Byte offset of the first index within the index region
    pub index_offset: u64,
    /// Zero for non-indexed primitives
    pub index_count: u32,
    pub world: Mat4,
}

impl DrawRecord {
    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }

    /// Index of the first vertex for `vertex_offset` / stride
    pub fn first_vertex(&self, stride: u32) -> u32 {
        (self.vertex_offset / stride as u64) as u32
    }

    /// Index of the first u32 index
    pub fn first_index(&self) -> u32 {
        (self.index_offset / 4) as u32
    }
}

/// Consolidated vertex + index blob of a model
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackedGeometry {
    /// All vertices, then all indices starting at `index_offset`
    pub bytes: Vec<u8>,
    /// Start of the index region in `bytes`
    pub index_offset: u64,
    /// Draw records per model material, in material-array order
    pub draws: Vec<Vec<DrawRecord>>,
}

impl PackedGeometry {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn draw_count(&self) -> usize {
        self.draws.iter().map(|draws| draws.len()).sum()
    }
}

/// Pack every primitive reachable from the root scene
///
/// Vertex and index data of a primitive is stored once even when several
/// nodes reference its mesh. Within a material, records follow node traversal
/// order.
pub fn pack_geometry(model: &Model) -> PackedGeometry {
    let baked = bake_transforms(model);
    let mut draws: Vec<Vec<DrawRecord>> = vec![Vec::new(); model.materials.len()];

    // (mesh, primitive) -> (vertex byte offset, index byte offset)
    let mut placed: FxHashMap<(usize, usize), (u64, u64)> = FxHashMap::default();
    let mut order: Vec<(usize, usize)> = Vec::new();
    let mut vertex_bytes = 0u64;
    let mut index_bytes = 0u64;
    let vertex_size = std::mem::size_of::<Vertex>() as u64;

    for node in &baked {
        let Some(mesh) = model.meshes.get(node.mesh) else {
            engine_warn!("nebula::Scene", "Model '{}': mesh {} does not exist", model.name, node.mesh);
            continue;
        };
        for (primitive_index, primitive) in mesh.primitives.iter().enumerate() {
            if primitive.vertices.is_empty() {
                continue;
            }
            let Some(material_draws) = draws.get_mut(primitive.material) else {
                engine_warn!("nebula::Scene", "Model '{}': mesh '{}' uses missing material {}",
                    model.name, mesh.name, primitive.material);
                continue;
            };

            let key = (node.mesh, primitive_index);
            let (vertex_offset, index_offset) = *placed.entry(key).or_insert_with(|| {
                let offsets = (vertex_bytes, index_bytes);
                vertex_bytes += primitive.vertices.len() as u64 * vertex_size;
                index_bytes += primitive.indices.len() as u64 * 4;
                order.push(key);
                offsets
            });

            material_draws.push(DrawRecord {
                vertex_offset,
                vertex_count: primitive.vertices.len() as u32,
                index_offset,
                index_count: primitive.indices.len() as u32,
                world: node.world,
            });
        }
    }

    let mut bytes = Vec::with_capacity((vertex_bytes + index_bytes) as usize);
    for &(mesh, primitive) in &order {
        bytes.extend_from_slice(bytemuck::cast_slice(&model.meshes[mesh].primitives[primitive].vertices));
    }
    for &(mesh, primitive) in &order {
        bytes.extend_from_slice(bytemuck::cast_slice(&model.meshes[mesh].primitives[primitive].indices));
    }

    PackedGeometry { bytes, index_offset: vertex_bytes, draws }
}

// ===== MATERIAL DATA =====

/// Bits of `MaterialData::texture_flags`
pub mod texture_flags {
    pub const BASE_COLOR: u32 = 1 << 0;
    pub const METALLIC_ROUGHNESS: u32 = 1 << 1;
    pub const NORMAL: u32 = 1 << 2;
    pub const OCCLUSION: u32 = 1 << 3;
    pub const EMISSIVE: u32 = 1 << 4;
}

/// Material uniform block (std140, 64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialData {
    pub base_color_factor: Vec4,
    /// xyz = emissive factor, w unused
    pub emissive_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub texture_flags: u32,
    pub _padding: [u32; 3],
}

impl MaterialData {
    pub fn from_material(material: &ModelMaterial) -> Self {
        let mut flags = 0;
        if material.base_color_texture.is_some() {
            flags |= texture_flags::BASE_COLOR;
        }
        if material.metallic_roughness_texture.is_some() {
            flags |= texture_flags::METALLIC_ROUGHNESS;
        }
        if material.normal_texture.is_some() {
            flags |= texture_flags::NORMAL;
        }
        if material.occlusion_texture.is_some() {
            flags |= texture_flags::OCCLUSION;
        }
        if material.emissive_texture.is_some() {
            flags |= texture_flags::EMISSIVE;
        }

        Self {
            base_color_factor: material.base_color_factor,
            emissive_factor: material.emissive_factor.extend(0.0),
            metallic_factor: material.metallic_factor,
            roughness_factor: material.roughness_factor,
            normal_scale: material.normal_scale,
            occlusion_strength: material.occlusion_strength,
            texture_flags: flags,
            _padding: [0; 3],
        }
    }
}

/// Packed material-data records
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackedMaterials {
    pub bytes: Vec<u8>,
    /// Distance between consecutive records (a multiple of the uniform offset alignment)
    pub stride: u64,
}

impl PackedMaterials {
    /// Byte offset of record `index`
    pub fn offset_of(&self, index: usize) -> u64 {
        index as u64 * self.stride
    }
}

/// Pack one record per material, each at an offset usable as a uniform binding
pub fn pack_materials(materials: &[ModelMaterial], alignment: u64) -> PackedMaterials {
    let record_size = std::mem::size_of::<MaterialData>() as u64;
    let stride = align_up(record_size, alignment);
    let mut bytes = vec![0u8; (stride * materials.len() as u64) as usize];

    for (index, material) in materials.iter().enumerate() {
        let start = (index as u64 * stride) as usize;
        let data = MaterialData::from_material(material);
        bytes[start..start + record_size as usize].copy_from_slice(bytemuck::bytes_of(&data));
    }

    PackedMaterials { bytes, stride }
}

#[cfg(test)]
#[path = "packing_tests.rs"]
mod tests;

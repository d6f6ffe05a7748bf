/// In-memory model graph handed over by the scene-description parser
///
/// Indices between the arrays (node children, node mesh, primitive material,
/// material textures) refer to positions in the owning `Model`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};
use crate::error::{Error, Result};

// ===== VERTEX =====

/// Interleaved vertex as consumed by the default material
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], texcoord: [f32; 2], color: [f32; 4]) -> Self {
        Self { position, normal, texcoord, color }
    }

    /// White vertex with an up-facing normal
    pub fn at(position: [f32; 3]) -> Self {
        Self::new(position, [0.0, 1.0, 0.0], [0.0, 0.0], [1.0, 1.0, 1.0, 1.0])
    }
}

// ===== TRANSFORMS =====

/// Local transform of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeTransform {
    /// Full matrix
    Matrix(Mat4),
    /// Translation, rotation, scale (applied scale first)
    Trs {
        translation: Vec3,
        rotation: Quat,
        scale: Vec3,
    },
}

impl NodeTransform {
    pub fn identity() -> Self {
        NodeTransform::Matrix(Mat4::IDENTITY)
    }

    pub fn to_mat4(&self) -> Mat4 {
        match *self {
            NodeTransform::Matrix(matrix) => matrix,
            NodeTransform::Trs { translation, rotation, scale } => {
                Mat4::from_scale_rotation_translation(scale, rotation, translation)
            }
        }
    }
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self::identity()
    }
}

// ===== GRAPH =====

/// Scene of the model: a list of root nodes
#[derive(Debug, Clone, Default)]
pub struct ModelScene {
    pub name: String,
    pub nodes: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub children: Vec<usize>,
    pub mesh: Option<usize>,
    pub transform: NodeTransform,
}

#[derive(Debug, Clone, Default)]
pub struct Primitive {
    pub vertices: Vec<Vertex>,
    /// Empty for non-indexed primitives
    pub indices: Vec<u32>,
    /// Index into `Model::materials`
    pub material: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
}

/// PBR metallic-roughness material
///
/// Texture fields index into `Model::images`.
#[derive(Debug, Clone)]
pub struct ModelMaterial {
    pub name: String,
    pub base_color_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: Vec3,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub base_color_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub occlusion_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
}

impl Default for ModelMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: Vec4::ONE,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            emissive_factor: Vec3::ZERO,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
        }
    }
}

/// Image referenced by materials
///
/// `pixels` is `None` when the parser left decoding to the renderer; the
/// renderer then decodes `uri` on the task pool.
#[derive(Debug, Clone, Default)]
pub struct ModelImage {
    pub uri: String,
    pub pixels: Option<DecodedImage>,
}

/// Complete model graph
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub name: String,
    pub scenes: Vec<ModelScene>,
    /// Scene to instantiate; the first scene when unset
    pub default_scene: Option<usize>,
    pub nodes: Vec<Node>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<ModelMaterial>,
    pub images: Vec<ModelImage>,
}

impl Model {
    /// Model without any scene (substituted for unreadable assets)
    pub fn empty(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    /// Scene the renderer instantiates
    pub fn root_scene(&self) -> Option<&ModelScene> {
        self.scenes.get(self.default_scene.unwrap_or(0))
    }

    /// Check every cross-reference of the graph
    pub fn validate(&self) -> Result<()> {
        for (index, scene) in self.scenes.iter().enumerate() {
            if let Some(root) = scene.nodes.iter().find(|root| **root >= self.nodes.len()) {
                return Err(Error::AssetLoadFailed(format!(
                    "model '{}': scene {} references missing node {}", self.name, index, root
                )));
            }
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(child) = node.children.iter().find(|child| **child >= self.nodes.len()) {
                return Err(Error::AssetLoadFailed(format!(
                    "model '{}': node {} references missing child {}", self.name, index, child
                )));
            }
            if let Some(mesh) = node.mesh.filter(|mesh| *mesh >= self.meshes.len()) {
                return Err(Error::AssetLoadFailed(format!(
                    "model '{}': node {} references missing mesh {}", self.name, index, mesh
                )));
            }
        }
        for mesh in &self.meshes {
            for primitive in &mesh.primitives {
                if primitive.material >= self.materials.len() {
                    return Err(Error::AssetLoadFailed(format!(
                        "model '{}': mesh '{}' references missing material {}",
                        self.name, mesh.name, primitive.material
                    )));
                }
                if let Some(index) = primitive.indices.iter().find(|i| **i as usize >= primitive.vertices.len()) {
                    return Err(Error::AssetLoadFailed(format!(
                        "model '{}': mesh '{}' index {} out of {} vertices",
                        self.name, mesh.name, index, primitive.vertices.len()
                    )));
                }
            }
        }
        for material in &self.materials {
            let textures = [
                material.base_color_texture,
                material.metallic_roughness_texture,
                material.normal_texture,
                material.occlusion_texture,
                material.emissive_texture,
            ];
            if let Some(texture) = textures.iter().flatten().find(|t| **t >= self.images.len()) {
                return Err(Error::AssetLoadFailed(format!(
                    "model '{}': material '{}' references missing image {}",
                    self.name, material.name, texture
                )));
            }
        }
        Ok(())
    }
}

// ===== DECODED PIXELS =====

/// RGBA8 pixels produced by an image decoder
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Channel count of the source file (pixels are always expanded to RGBA)
    pub channels: u32,
    /// Tightly packed RGBA8 rows, all layers back to back
    pub pixels: Vec<u8>,
}

const MAGENTA: [u8; 4] = [255, 0, 255, 255];
const BLACK: [u8; 4] = [0, 0, 0, 255];

impl DecodedImage {
    /// Magenta/black checkerboard of `size` x `size` pixels (8 x 8 cells)
    pub fn checkerboard(size: u32) -> Self {
        Self::checkerboard_layers(size, 1)
    }

    /// Checkerboard repeated over `layers` layers
    pub fn checkerboard_layers(size: u32, layers: u32) -> Self {
        let size = size.max(1);
        let cell = (size / 8).max(1);
        let mut pixels = Vec::with_capacity((size * size * 4 * layers) as usize);
        for _ in 0..layers {
            for y in 0..size {
                for x in 0..size {
                    let texel = if ((x / cell) + (y / cell)) % 2 == 0 { MAGENTA } else { BLACK };
                    pixels.extend_from_slice(&texel);
                }
            }
        }
        Self { width: size, height: size, channels: 4, pixels }
    }

    /// Expected byte length for `layers` layers
    pub fn expected_len(&self, layers: u32) -> usize {
        self.width as usize * self.height as usize * 4 * layers as usize
    }

    /// Reject empty images and pixel buffers that do not match the extent
    pub fn validate(&self, layers: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::AssetLoadFailed(format!(
                "image has empty extent {}x{}", self.width, self.height
            )));
        }
        if self.pixels.len() != self.expected_len(layers) {
            return Err(Error::AssetLoadFailed(format!(
                "image {}x{} x{} layers expects {} bytes, got {}",
                self.width, self.height, layers, self.expected_len(layers), self.pixels.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;

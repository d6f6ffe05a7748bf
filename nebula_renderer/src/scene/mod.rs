/// Scene module - model packing and GPU scenes

pub mod packing;
pub mod scene;

pub use packing::{bake_transforms, pack_geometry, pack_materials, BakedNode, DrawRecord, MaterialData, PackedGeometry, PackedMaterials};
pub use scene::{texture_name, Scene, SceneResources, CAMERA_BINDING};

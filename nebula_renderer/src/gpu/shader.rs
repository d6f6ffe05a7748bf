/// Shader module trait and reflection metadata
///
/// Backends reflect SPIR-V when the module is created. Nothing in here is
/// hand-authored: bindings, push constants and the vertex input layout all come
/// from the shader binary.

use std::collections::BTreeMap;
use std::ops::BitOr;
use crate::error::{Error, Result};

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Shader stage flags (bitmask of stages a binding or push constant is visible to)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const NONE: Self = Self(0x00);
    pub const VERTEX: Self = Self(0x01);
    pub const FRAGMENT: Self = Self(0x02);
    pub const VERTEX_FRAGMENT: Self = Self(0x03);

    /// Flags for a single stage
    pub fn from_stage(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
        }
    }

    pub fn contains_vertex(&self) -> bool { self.0 & 0x01 != 0 }
    pub fn contains_fragment(&self) -> bool { self.0 & 0x02 != 0 }
    pub fn bits(&self) -> u32 { self.0 }
}

impl BitOr for ShaderStageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Descriptor types the renderer binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    /// Uniform buffer whose offset is supplied when the set is bound
    UniformBufferDynamic,
    StorageBuffer,
    CombinedImageSampler,
}

impl DescriptorType {
    /// Buffer-backed descriptor
    pub fn is_buffer(&self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic | DescriptorType::StorageBuffer
        )
    }

    /// Takes an offset at bind time
    pub fn is_dynamic(&self) -> bool {
        matches!(self, DescriptorType::UniformBufferDynamic)
    }
}

/// One descriptor binding found by reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Variable name in the shader source (used for name-based resolution)
    pub name: String,
    /// Descriptor type
    pub descriptor_type: DescriptorType,
    /// Array element count (1 for non-arrays)
    pub count: u32,
    /// Stages that declare the binding
    pub stages: ShaderStageFlags,
}

/// Push constant range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Stages reading the range
    pub stages: ShaderStageFlags,
    /// Byte offset
    pub offset: u32,
    /// Byte size
    pub size: u32,
}

/// Vertex attribute formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum VertexFormat {
    R32_SFLOAT,
    R32G32_SFLOAT,
    R32G32B32_SFLOAT,
    R32G32B32A32_SFLOAT,
    R32_SINT,
    R32G32_SINT,
    R32G32B32_SINT,
    R32G32B32A32_SINT,
    R32_UINT,
    R32G32_UINT,
    R32G32B32_UINT,
    R32G32B32A32_UINT,
}

impl VertexFormat {
    /// Returns size in bytes for this format
    pub fn size_bytes(&self) -> u32 {
        match self {
            VertexFormat::R32_SFLOAT | VertexFormat::R32_SINT | VertexFormat::R32_UINT => 4,
            VertexFormat::R32G32_SFLOAT | VertexFormat::R32G32_SINT | VertexFormat::R32G32_UINT => 8,
            VertexFormat::R32G32B32_SFLOAT | VertexFormat::R32G32B32_SINT | VertexFormat::R32G32B32_UINT => 12,
            VertexFormat::R32G32B32A32_SFLOAT | VertexFormat::R32G32B32A32_SINT | VertexFormat::R32G32B32A32_UINT => 16,
        }
    }
}

/// Vertex shader input variable found by reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedInput {
    /// Input location
    pub location: u32,
    /// Variable name
    pub name: String,
    /// Attribute format
    pub format: VertexFormat,
}

/// Vertex attribute placed in the interleaved vertex layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Interleaved single-binding vertex layout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexInputLayout {
    /// Bytes between consecutive vertices
    pub stride: u32,
    /// Attributes in location order
    pub attributes: Vec<VertexAttribute>,
}

impl VertexInputLayout {
    /// Build the layout from reflected inputs
    ///
    /// Attributes are ordered by location. Offsets accumulate the byte sizes
    /// of the preceding attributes; the stride is the sum of all sizes.
    pub fn from_inputs(inputs: &[ReflectedInput]) -> Self {
        let mut sorted: Vec<&ReflectedInput> = inputs.iter().collect();
        sorted.sort_by_key(|input| input.location);

        let mut offset = 0u32;
        let attributes = sorted
            .into_iter()
            .map(|input| {
                let attribute = VertexAttribute {
                    location: input.location,
                    format: input.format,
                    offset,
                };
                offset += input.format.size_bytes();
                attribute
            })
            .collect();

        Self { stride: offset, attributes }
    }
}

/// Reflection result for one shader module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub bindings: Vec<ReflectedBinding>,
    pub push_constants: Vec<PushConstantRange>,
    /// Stage inputs (only meaningful for vertex shaders)
    pub inputs: Vec<ReflectedInput>,
}

/// Shader module trait
pub trait ShaderModule: Send + Sync {
    /// Debug name (path or registry key)
    fn name(&self) -> &str;

    /// Stage of the module
    fn stage(&self) -> ShaderStage;

    /// Reflection metadata extracted at creation
    fn reflection(&self) -> &ShaderReflection;
}

/// Bindings of one descriptor set, sorted by binding index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub set: u32,
    pub bindings: Vec<ReflectedBinding>,
}

/// Pool the bindings of several stages into one layout per declared set
///
/// A binding declared by both stages appears once with merged stage flags.
/// The same set/binding declared with different types or names is an error.
pub fn merge_bindings(reflections: &[&ShaderReflection]) -> Result<Vec<DescriptorSetLayoutDesc>> {
    let mut sets: BTreeMap<u32, BTreeMap<u32, ReflectedBinding>> = BTreeMap::new();

    for reflection in reflections {
        for binding in &reflection.bindings {
            let set = sets.entry(binding.set).or_default();
            match set.get_mut(&binding.binding) {
                Some(existing) => {
                    if existing.descriptor_type != binding.descriptor_type {
                        return Err(Error::InvalidShader(format!(
                            "binding (set={}, binding={}) declared as {:?} and {:?}",
                            binding.set, binding.binding, existing.descriptor_type, binding.descriptor_type
                        )));
                    }
                    if existing.name != binding.name {
                        return Err(Error::InvalidShader(format!(
                            "binding (set={}, binding={}) declared as '{}' and '{}'",
                            binding.set, binding.binding, existing.name, binding.name
                        )));
                    }
                    existing.stages = existing.stages | binding.stages;
                    existing.count = existing.count.max(binding.count);
                }
                None => {
                    set.insert(binding.binding, binding.clone());
                }
            }
        }
    }

    // Sets are dense in the pipeline layout: a gap becomes an empty layout
    let max_set = sets.keys().next_back().copied();
    let mut layouts = Vec::new();
    if let Some(max_set) = max_set {
        for set in 0..=max_set {
            let bindings = sets
                .remove(&set)
                .map(|bindings| bindings.into_values().collect())
                .unwrap_or_default();
            layouts.push(DescriptorSetLayoutDesc { set, bindings });
        }
    }
    Ok(layouts)
}

/// Merge push constant ranges of several stages
///
/// Ranges that overlap or share a stage become one range spanning both and
/// visible to every declaring stage, so a stage appears in at most one range
/// and any push into a range names all stages that can read it. The result is
/// sorted by offset.
pub fn merge_push_constants(reflections: &[&ShaderReflection]) -> Vec<PushConstantRange> {
    let mut merged: Vec<PushConstantRange> = Vec::new();
    for reflection in reflections {
        for range in &reflection.push_constants {
            let mut current = *range;
            while let Some(index) = merged.iter().position(|existing| ranges_conflict(existing, &current)) {
                let existing = merged.swap_remove(index);
                let start = existing.offset.min(current.offset);
                let end = (existing.offset + existing.size).max(current.offset + current.size);
                current = PushConstantRange {
                    stages: existing.stages | current.stages,
                    offset: start,
                    size: end - start,
                };
            }
            merged.push(current);
        }
    }
    merged.sort_by_key(|range| range.offset);
    merged
}

fn ranges_conflict(a: &PushConstantRange, b: &PushConstantRange) -> bool {
    let overlap = a.offset < b.offset + b.size && b.offset < a.offset + a.size;
    overlap || a.stages.bits() & b.stages.bits() != 0
}

#[cfg(test)]
#[path = "shader_tests.rs"]
mod tests;

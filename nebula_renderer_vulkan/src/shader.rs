/// Shader module - SPIR-V module creation and spirq reflection

use ash::vk;
use nebula_renderer::nebula::gpu::{
    DescriptorType, PushConstantRange, ReflectedBinding, ReflectedInput, ShaderModule as GpuShaderModule,
    ShaderReflection, ShaderStage, ShaderStageFlags, VertexFormat,
};
use nebula_renderer::nebula::{Error, Result};
use nebula_renderer::{engine_err, engine_trace, engine_warn};
use std::sync::Arc;

use crate::context::GpuContext;

pub struct ShaderModule {
    ctx: Arc<GpuContext>,
    pub(crate) module: vk::ShaderModule,
    name: String,
    stage: ShaderStage,
    reflection: ShaderReflection,
}

impl ShaderModule {
    /// Reflect `code` and create the Vulkan module
    ///
    /// Malformed SPIR-V fails with `Error::InvalidShader` before any Vulkan
    /// object is created.
    pub(crate) fn new(ctx: Arc<GpuContext>, name: &str, code: &[u8], stage: ShaderStage) -> Result<Self> {
        let words = parse_spirv(name, code)?;
        let reflection = reflect(name, &words, stage)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe {
            ctx.device.create_shader_module(&create_info, None)
                .map_err(|e| engine_err!("nebula::vulkan", "Failed to create shader module '{}': {:?}", name, e))?
        };

        engine_trace!("nebula::vulkan", "Shader '{}' reflected: {} binding(s), {} push constant range(s), {} input(s)",
            name, reflection.bindings.len(), reflection.push_constants.len(), reflection.inputs.len());

        Ok(Self {
            ctx,
            module,
            name: name.to_string(),
            stage,
            reflection,
        })
    }
}

impl GpuShaderModule for ShaderModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}

// ===== REFLECTION =====

/// Split a SPIR-V blob into words (handles unaligned input and byte order)
fn parse_spirv(name: &str, code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        return Err(invalid(name, "empty SPIR-V blob".to_string()));
    }
    let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
        .map_err(|e| invalid(name, format!("not a SPIR-V binary ({} bytes): {}", code.len(), e)))?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(invalid(name, format!("bad SPIR-V magic number ({} bytes)", code.len())));
    }
    Ok(words)
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn invalid(name: &str, message: String) -> Error {
    engine_warn!("nebula::vulkan", "Shader '{}': {}", name, message);
    Error::InvalidShader(format!("'{}': {}", name, message))
}

fn reflect(name: &str, words: &[u32], stage: ShaderStage) -> Result<ShaderReflection> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(words)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| invalid(name, format!("SPIR-V reflection failed: {:?}", e)))?;

    let Some(entry_point) = entry_points.first() else {
        return Err(invalid(name, "no entry point".to_string()));
    };
    if entry_points.len() > 1 {
        engine_warn!("nebula::vulkan", "Shader '{}': {} entry points, using '{}'",
            name, entry_points.len(), entry_point.name);
    }

    let stages = ShaderStageFlags::from_stage(stage);
    let mut bindings = Vec::new();
    let mut push_constants = Vec::new();
    let mut inputs = Vec::new();

    for var in entry_point.vars.iter() {
        match var {
            spirq::var::Variable::Descriptor { name: var_name, desc_bind, desc_ty, nbind, .. } => {
                bindings.push(ReflectedBinding {
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    name: var_name.clone().unwrap_or_default(),
                    descriptor_type: descriptor_type(name, desc_ty)?,
                    count: (*nbind).max(1),
                    stages,
                });
            }
            spirq::var::Variable::PushConstant { ty, .. } => {
                let size = ty.nbyte().unwrap_or(0) as u32;
                let offset = match ty {
                    spirq::ty::Type::Struct(st) => st
                        .members
                        .iter()
                        .filter_map(|member| member.offset)
                        .min()
                        .unwrap_or(0) as u32,
                    _ => 0,
                };
                if size > offset {
                    push_constants.push(PushConstantRange { stages, offset, size: size - offset });
                }
            }
            spirq::var::Variable::Input { name: var_name, location, ty, .. } if stage == ShaderStage::Vertex => {
                let Some(format) = vertex_format(ty) else {
                    return Err(invalid(name, format!("unsupported vertex input type at location {}: {:?}",
                        location.loc(), ty)));
                };
                inputs.push(ReflectedInput {
                    location: location.loc(),
                    name: var_name.clone().unwrap_or_default(),
                    format,
                });
            }
            _ => {}
        }
    }

    bindings.sort_by_key(|binding| (binding.set, binding.binding));
    inputs.sort_by_key(|input| input.location);

    Ok(ShaderReflection {
        stage,
        entry_point: entry_point.name.clone(),
        bindings,
        push_constants,
        inputs,
    })
}

fn descriptor_type(name: &str, desc_ty: &spirq::ty::DescriptorType) -> Result<DescriptorType> {
    use spirq::ty::DescriptorType as SpirqDescriptorType;
    match desc_ty {
        SpirqDescriptorType::UniformBuffer() => Ok(DescriptorType::UniformBuffer),
        SpirqDescriptorType::StorageBuffer(..) => Ok(DescriptorType::StorageBuffer),
        SpirqDescriptorType::CombinedImageSampler() => Ok(DescriptorType::CombinedImageSampler),
        other => Err(invalid(name, format!("unsupported descriptor type {:?}", other))),
    }
}

/// Attribute format of a 32-bit scalar or vector input
fn vertex_format(ty: &spirq::ty::Type) -> Option<VertexFormat> {
    use spirq::ty::{ScalarType, Type};
    let (scalar, components) = match ty {
        Type::Scalar(scalar) => (scalar, 1),
        Type::Vector(vector) => (&vector.scalar_ty, vector.nscalar),
        _ => return None,
    };
    let format = match (scalar, components) {
        (ScalarType::Float { bits: 32, .. }, 1) => VertexFormat::R32_SFLOAT,
        (ScalarType::Float { bits: 32, .. }, 2) => VertexFormat::R32G32_SFLOAT,
        (ScalarType::Float { bits: 32, .. }, 3) => VertexFormat::R32G32B32_SFLOAT,
        (ScalarType::Float { bits: 32, .. }, 4) => VertexFormat::R32G32B32A32_SFLOAT,
        (ScalarType::Integer { bits: 32, is_signed: true, .. }, 1) => VertexFormat::R32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true, .. }, 2) => VertexFormat::R32G32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true, .. }, 3) => VertexFormat::R32G32B32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: true, .. }, 4) => VertexFormat::R32G32B32A32_SINT,
        (ScalarType::Integer { bits: 32, is_signed: false, .. }, 1) => VertexFormat::R32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false, .. }, 2) => VertexFormat::R32G32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false, .. }, 3) => VertexFormat::R32G32B32_UINT,
        (ScalarType::Integer { bits: 32, is_signed: false, .. }, 4) => VertexFormat::R32G32B32A32_UINT,
        _ => return None,
    };
    Some(format)
}

#[cfg(test)]
#[path = "shader_tests.rs"]
mod tests;

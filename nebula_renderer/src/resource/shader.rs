/// Shader resource: compiled SPIR-V plus reflection
///
/// Blobs are opaque to the engine. The backend reflects them when the module
/// is created; the shader exposes the result (bindings, push constants and
/// the vertex input layout) to materials.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use crate::error::{Error, Result};
use crate::gpu::{GraphicsDevice, ShaderModule, ShaderReflection, ShaderStage, VertexInputLayout};
use crate::engine_debug;

/// Where a shader blob comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// SPIR-V file on disk; the path is the registry key
    Path(PathBuf),
    /// In-memory SPIR-V registered under `name`
    Bytes { name: String, code: Vec<u8> },
}

impl ShaderSource {
    /// Registry key of the shader
    pub fn key(&self) -> String {
        match self {
            ShaderSource::Path(path) => path.to_string_lossy().into_owned(),
            ShaderSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Immutable shader module with reflection
pub struct Shader {
    key: String,
    module: Arc<dyn ShaderModule>,
    vertex_layout: VertexInputLayout,
}

impl Shader {
    /// Read a SPIR-V file and create the module
    ///
    /// An empty file is an error: no pipeline may be built from it.
    pub fn load(device: &dyn GraphicsDevice, path: &Path, stage: ShaderStage) -> Result<Self> {
        let code = std::fs::read(path).map_err(|e| {
            Error::InvalidShader(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_bytes(device, &path.to_string_lossy(), &code, stage)
    }

    /// Create a shader from an in-memory blob
    pub fn from_bytes(device: &dyn GraphicsDevice, key: &str, code: &[u8], stage: ShaderStage) -> Result<Self> {
        if code.is_empty() {
            return Err(Error::InvalidShader(format!("shader '{}' is empty", key)));
        }
        if code.len() % 4 != 0 {
            return Err(Error::InvalidShader(format!(
                "shader '{}' is not SPIR-V ({} bytes is not a multiple of 4)", key, code.len()
            )));
        }

        let module = device.create_shader_module(key, code, stage)?;
        if module.stage() != stage {
            return Err(Error::InvalidShader(format!(
                "shader '{}' reflects as {:?}, expected {:?}", key, module.stage(), stage
            )));
        }

        let vertex_layout = VertexInputLayout::from_inputs(&module.reflection().inputs);
        engine_debug!("nebula::Shader", "Loaded {:?} shader '{}': {} binding(s), {} push constant range(s), stride {}",
            stage, key, module.reflection().bindings.len(), module.reflection().push_constants.len(),
            vertex_layout.stride);

        Ok(Self { key: key.to_string(), module, vertex_layout })
    }

    /// Create a shader from either source kind
    pub fn from_source(device: &dyn GraphicsDevice, source: &ShaderSource, stage: ShaderStage) -> Result<Self> {
        match source {
            ShaderSource::Path(path) => Self::load(device, path, stage),
            ShaderSource::Bytes { name, code } => Self::from_bytes(device, name, code, stage),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stage(&self) -> ShaderStage {
        self.module.stage()
    }

    pub fn module(&self) -> &Arc<dyn ShaderModule> {
        &self.module
    }

    pub fn reflection(&self) -> &ShaderReflection {
        self.module.reflection()
    }

    /// Interleaved vertex layout derived from the reflected inputs
    pub fn vertex_layout(&self) -> &VertexInputLayout {
        &self.vertex_layout
    }
}

#[cfg(test)]
#[path = "shader_tests.rs"]
mod tests;

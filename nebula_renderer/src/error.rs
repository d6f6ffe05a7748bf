//! Error types for the Nebula renderer
//!
//! This module defines the error type shared by the core crate and its
//! backends: device initialization, GPU resources, buffer pools, shaders and
//! asset loading.

use std::fmt;

/// Result type for Nebula renderer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nebula renderer errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Backend-specific error (Vulkan call failure, lost device, ...)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// A buffer pool has no gap large enough for the requested sub-buffer
    OutOfSpace {
        /// Pool name (e.g. "geometry", "uniform", "staging")
        pool: String,
        /// Requested size in bytes
        requested: u64,
        /// Total pool capacity in bytes
        capacity: u64,
    },

    /// Invalid resource (unknown key, wrong pool kind, misuse of an API)
    InvalidResource(String),

    /// Shader blob is empty or could not be reflected
    InvalidShader(String),

    /// Initialization failed (instance, device, swapchain, pools)
    InitializationFailed(String),

    /// Asset could not be loaded or decoded
    AssetLoadFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::OutOfSpace { pool, requested, capacity } => write!(
                f,
                "Out of space in buffer pool '{}': requested {} bytes (capacity {} bytes)",
                pool, requested, capacity
            ),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InvalidShader(msg) => write!(f, "Invalid shader: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::AssetLoadFailed(msg) => write!(f, "Asset load failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

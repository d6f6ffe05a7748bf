//! Unit tests for error.rs

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkQueueSubmit failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("vkQueueSubmit failed"));
}

#[test]
fn test_out_of_memory_display() {
    assert_eq!(format!("{}", Error::OutOfMemory), "Out of GPU memory");
}

#[test]
fn test_out_of_space_display_names_pool_and_sizes() {
    let err = Error::OutOfSpace {
        pool: "geometry".to_string(),
        requested: 4096,
        capacity: 1024,
    };
    let display = format!("{}", err);
    assert!(display.contains("'geometry'"));
    assert!(display.contains("4096"));
    assert!(display.contains("1024"));
}

#[test]
fn test_invalid_shader_display() {
    let err = Error::InvalidShader("empty blob: pbr.vert.spv".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Invalid shader"));
    assert!(display.contains("pbr.vert.spv"));
}

#[test]
fn test_asset_load_failed_display() {
    let err = Error::AssetLoadFailed("missing.png".to_string());
    assert!(format!("{}", err).contains("missing.png"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_clone_and_eq() {
    let err = Error::InitializationFailed("no GPU".to_string());
    assert_eq!(err.clone(), err);
}

#[test]
fn test_result_question_mark_propagation() {
    fn inner() -> Result<u32> {
        Err(Error::InvalidResource("bad key".to_string()))
    }
    fn outer() -> Result<u32> {
        let value = inner()?;
        Ok(value + 1)
    }
    assert!(matches!(outer(), Err(Error::InvalidResource(_))));
}

/// CPU image decoding
///
/// Decoders run on task-pool workers; they only touch the file system and
/// memory, never the GPU.

use std::path::{Path, PathBuf};
use crate::asset::model::DecodedImage;
use crate::error::{Error, Result};

/// Turns an image file into RGBA8 pixels
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedImage>;
}

/// Decoder reading files with the `image` crate
///
/// Relative paths are resolved against `base_dir` when one is set (the
/// directory of the model file, for URIs found inside it).
#[derive(Debug, Clone, Default)]
pub struct FileImageDecoder {
    base_dir: Option<PathBuf>,
}

impl FileImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: Some(base_dir.into()) }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Decode an in-memory encoded image
    pub fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::AssetLoadFailed(format!("failed to decode image: {}", e)))?;
        let channels = image.color().channel_count() as u32;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedImage { width, height, channels, pixels: rgba.into_raw() })
    }
}

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedImage> {
        let path = self.resolve(path);
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::AssetLoadFailed(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::decode_bytes(&bytes)
            .map_err(|e| Error::AssetLoadFailed(format!("'{}': {}", path.display(), e)))
    }
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod tests;

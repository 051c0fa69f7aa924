//! Error types for resource loading.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// A texture file could not be decoded.
    #[error("Failed to decode texture '{path}': {source}")]
    Decode {
        /// Path to the file that failed to decode.
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// In-memory texture bytes could not be decoded.
    #[error("Failed to decode texture '{name}': {source}")]
    DecodeBytes {
        /// Name the caller gave the bytes, for diagnostics.
        name: String,
        #[source]
        source: image::ImageError,
    },

    /// Pixel data does not match the declared dimensions.
    #[error("Texture '{name}' has {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// IO error during file operations.
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

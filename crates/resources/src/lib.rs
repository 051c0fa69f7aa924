//! Resource loading.
//!
//! This crate decodes external assets into plain CPU-side data the renderer
//! can upload:
//! - [`TextureData`]: any PNG or JPEG, converted to tightly packed RGBA8
//! - Built-in fallback textures (solid colors, the error checkerboard)
//!
//! Failures are reported as [`ResourceError`] with the offending path or name,
//! so the caller can log them and substitute a fallback.

mod error;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use texture::TextureData;

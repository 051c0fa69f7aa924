//! CPU-side texture data.

use std::path::Path;

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Decoded texture in RGBA8, rows top to bottom with no padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Decode an image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ResourceResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let img = image::load_from_memory(&bytes).map_err(|source| ResourceError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        Ok(Self::from_image(img, name))
    }

    /// Decode an encoded image held in memory (for example a GLB-embedded texture).
    pub fn from_bytes(bytes: &[u8], name: &str) -> ResourceResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|source| ResourceError::DecodeBytes {
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    /// Wrap raw RGBA8 pixels, checking the length against the dimensions.
    pub fn from_rgba8(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        name: &str,
    ) -> ResourceResult<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(ResourceError::SizeMismatch {
                name: name.to_string(),
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            name: name.to_string(),
        })
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let pixels = img.to_rgba8().into_raw();
        debug!("Decoded texture '{}' ({}x{})", name, width, height);
        Self {
            width,
            height,
            pixels,
            name: name.to_string(),
        }
    }

    /// A 1x1 texture of one color.
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Pack a linear `[0, 1]` color into RGBA8, rounding to nearest.
    pub fn pack_unorm(color: [f32; 4]) -> [u8; 4] {
        color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    pub fn grey() -> Self {
        Self::solid_color(Self::pack_unorm([0.66, 0.66, 0.66, 1.0]), "grey")
    }

    /// Fully transparent black.
    pub fn black() -> Self {
        Self::solid_color([0, 0, 0, 0], "black")
    }

    /// Per-pixel alternating checkerboard of `a` and `b`, `a` at the origin.
    pub fn checkerboard(size: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(size as usize * size as usize * BYTES_PER_PIXEL);
        for y in 0..size {
            for x in 0..size {
                let color = if (x % 2) ^ (y % 2) == 1 { b } else { a };
                pixels.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
            name: "checkerboard".to_string(),
        }
    }

    /// The 16x16 magenta/black texture substituted for textures that fail to load.
    pub fn error_checkerboard() -> Self {
        let mut texture = Self::checkerboard(16, [0, 0, 0, 0], [255, 0, 255, 255]);
        texture.name = "error_checkerboard".to_string();
        texture
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let slice = self.pixels.get(start..start + BYTES_PER_PIXEL)?;
        Some([slice[0], slice[1], slice[2], slice[3]])
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

//! Tile encoder.
//!
//! Encodes rendered tile pixels into the bytes stored on disk and served to
//! clients.
//!
//! # Design Decisions
//!
//! - **JPEG is always RGB**: alpha is dropped before JPEG encoding since the
//!   codec cannot carry it.
//!
//! - **PNG keeps the source color type**: lossless tiles reproduce the
//!   source pixels exactly at full resolution.
//!
//! - **Quality is clamped, not rejected**: configuration validates the range
//!   up front; the encoder only guards against stray values.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, ImageFormat};

use super::format::TileFormat;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Tile Encoder
// =============================================================================

/// Encodes tile images as JPEG or PNG.
#[derive(Debug, Clone, Default)]
pub struct TileEncoder {}

impl TileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode `tile` in `format`. `quality` only applies to JPEG.
    pub fn encode(
        &self,
        tile: &DynamicImage,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, ImageError> {
        let mut output = Vec::new();
        match format {
            TileFormat::Jpeg => {
                let rgb = tile.to_rgb8();
                let mut encoder =
                    JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
                encoder.encode_image(&rgb)?;
            }
            TileFormat::Png => {
                tile.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
            }
        }
        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================

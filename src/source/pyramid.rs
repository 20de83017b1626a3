//! Deep-zoom pyramid over a single decoded source image.
//!
//! The full-resolution image is decoded once when the handle is opened. Lower
//! levels are produced on demand by downsampling only the source region that
//! covers the requested tile.
//!
//! ```text
//! level max_level  : full resolution            (scale 1)
//! level max_level-1: half resolution            (scale 2)
//! ...
//! level 0          : 1x1 pixel                  (scale 2^max_level)
//! ```

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageError};
use tracing::debug;

use crate::error::{DecodeError, OpenError};
use crate::tile::{TileEncoder, TileFormat};

use super::catalog::ImageIdentity;
use super::handle::{DecoderHandle, HandleFactory};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// PyramidImage
// =============================================================================

/// Decoder handle backed by an in-memory decoded image.
pub struct PyramidImage {
    image: DynamicImage,
    width: u32,
    height: u32,
    tile_size: u32,
    max_level: u32,
    encoder: TileEncoder,
}

impl PyramidImage {
    /// Wrap an already decoded image.
    ///
    /// `tile_size` is clamped to at least 1.
    pub fn new(image: DynamicImage, tile_size: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            image,
            width,
            height,
            tile_size: tile_size.max(1),
            max_level: max_level_for(width.max(height)),
            encoder: TileEncoder::new(),
        }
    }

    /// Full-resolution dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Edge length of a tile in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Downsample factor of a level relative to full resolution.
    fn scale(&self, level: u32) -> u64 {
        1u64 << (self.max_level - level)
    }
}

/// Smallest `n` with `2^n >= dim`.
fn max_level_for(dim: u32) -> u32 {
    (dim as u64).next_power_of_two().trailing_zeros()
}

impl DecoderHandle for PyramidImage {
    fn level_count(&self) -> u32 {
        self.max_level + 1
    }

    fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        if level > self.max_level {
            return None;
        }
        let scale = self.scale(level);
        let width = (self.width as u64).div_ceil(scale).max(1) as u32;
        let height = (self.height as u64).div_ceil(scale).max(1) as u32;
        Some((width, height))
    }

    fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        let (width, height) = self.level_dimensions(level)?;
        let ts = self.tile_size as u64;
        Some((
            (width as u64).div_ceil(ts) as u32,
            (height as u64).div_ceil(ts) as u32,
        ))
    }

    fn render_tile(
        &self,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, DecodeError> {
        let (level_w, level_h) = self
            .level_dimensions(level)
            .ok_or_else(|| DecodeError::new(level, col, row, "level out of range"))?;

        let ts = self.tile_size as u64;
        let x0 = col as u64 * ts;
        let y0 = row as u64 * ts;
        if x0 >= level_w as u64 || y0 >= level_h as u64 {
            return Err(DecodeError::new(level, col, row, "tile outside level"));
        }
        let tile_w = ts.min(level_w as u64 - x0);
        let tile_h = ts.min(level_h as u64 - y0);

        // Source region at full resolution covering this tile.
        let scale = self.scale(level);
        let src_x = x0 * scale;
        let src_y = y0 * scale;
        let src_w = (tile_w * scale).min(self.width as u64 - src_x);
        let src_h = (tile_h * scale).min(self.height as u64 - src_y);

        let region = self
            .image
            .crop_imm(src_x as u32, src_y as u32, src_w as u32, src_h as u32);
        let tile = if scale == 1 {
            region
        } else {
            region.resize_exact(tile_w as u32, tile_h as u32, FilterType::Triangle)
        };

        self.encoder
            .encode(&tile, format, quality)
            .map_err(|e| DecodeError::new(level, col, row, e.to_string()))
    }

    fn close(self) {
        debug!(
            "Closing pyramid image {}x{} ({} levels)",
            self.width,
            self.height,
            self.max_level + 1
        );
    }
}

// =============================================================================
// ImageFileOpener
// =============================================================================

/// Opens source files from disk with the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageFileOpener {
    tile_size: u32,
}

impl ImageFileOpener {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }
}

impl Default for ImageFileOpener {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

#[async_trait]
impl HandleFactory for ImageFileOpener {
    type Handle = PyramidImage;

    async fn open(&self, identity: &ImageIdentity) -> Result<PyramidImage, OpenError> {
        let path = identity.source().to_path_buf();
        let tile_size = self.tile_size;

        debug!("Opening source image {}", path.display());
        tokio::task::spawn_blocking(move || open_pyramid(&path, tile_size))
            .await
            .map_err(|e| OpenError::Task(e.to_string()))?
    }
}

fn open_pyramid(path: &Path, tile_size: u32) -> Result<PyramidImage, OpenError> {
    let image = image::open(path).map_err(|e| match e {
        ImageError::IoError(io) => OpenError::Io {
            path: path.to_path_buf(),
            message: io.to_string(),
        },
        other => OpenError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(OpenError::EmptyImage {
            path: path.to_path_buf(),
        });
    }

    Ok(PyramidImage::new(image, tile_size))
}

// =============================================================================
// Tests
// =============================================================================

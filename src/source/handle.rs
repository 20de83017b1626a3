//! Decoder handle traits.
//!
//! A [`DecoderHandle`] is one open, expensive-to-construct decoder for a source
//! image. Handles are produced by a [`HandleFactory`] and owned by the
//! resource cache, which decides when they are closed.
//!
//! Pyramid levels are numbered from the lowest resolution (0) to the highest
//! (`level_count() - 1`).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DecodeError, OpenError};
use crate::tile::TileFormat;

use super::catalog::ImageIdentity;

// =============================================================================
// Level Information
// =============================================================================

/// Snapshot of one pyramid level's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LevelInfo {
    /// Level index (0 = lowest resolution)
    pub level: u32,

    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Number of tile columns
    pub cols: u32,

    /// Number of tile rows
    pub rows: u32,
}

impl LevelInfo {
    /// Number of tiles in this level.
    pub fn tile_count(&self) -> u64 {
        self.cols as u64 * self.rows as u64
    }
}

// =============================================================================
// DecoderHandle Trait
// =============================================================================

/// One open decoder instance for a multi-resolution source image.
///
/// Implementations must be safe to share between threads: several requests
/// may render tiles from the same handle at once. `render_tile` is blocking
/// and is always called from a blocking thread.
pub trait DecoderHandle: Send + Sync + 'static {
    /// Number of pyramid levels.
    fn level_count(&self) -> u32;

    /// Tile grid `(cols, rows)` of a level, or `None` if the level is out of range.
    fn tile_grid(&self, level: u32) -> Option<(u32, u32)>;

    /// Pixel dimensions of a level, or `None` if the level is out of range.
    fn level_dimensions(&self, level: u32) -> Option<(u32, u32)>;

    /// Total number of tiles across all levels.
    fn total_tile_count(&self) -> u64 {
        (0..self.level_count())
            .filter_map(|level| self.tile_grid(level))
            .map(|(cols, rows)| cols as u64 * rows as u64)
            .sum()
    }

    /// Geometry of a level.
    fn level_info(&self, level: u32) -> Option<LevelInfo> {
        let (width, height) = self.level_dimensions(level)?;
        let (cols, rows) = self.tile_grid(level)?;
        Some(LevelInfo {
            level,
            width,
            height,
            cols,
            rows,
        })
    }

    /// Render and encode one tile.
    fn render_tile(
        &self,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, DecodeError>;

    /// Release the decoder's resources.
    ///
    /// Called exactly once by the cache when the handle is disposed.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

// =============================================================================
// HandleFactory Trait
// =============================================================================

/// Constructs decoder handles for registered images.
///
/// Opening may be slow (reading and parsing a large source file). The cache
/// calls this outside of any table-wide lock, so two callers racing on the
/// same image may both construct a handle; the loser's handle is closed.
#[async_trait]
pub trait HandleFactory: Send + Sync {
    /// The handle type this factory produces.
    type Handle: DecoderHandle;

    /// Open the source image behind `identity`.
    async fn open(&self, identity: &ImageIdentity) -> Result<Self::Handle, OpenError>;
}

//! Tile service facade.
//!
//! The TileService is the entry point the serving layer talks to. It ties the
//! image catalog, the handle cache, the format policy and the disk store
//! together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TileService                          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                      get_tile()                        │  │
//! │  │  1. Resolve image        4. Pick format for level      │  │
//! │  │  2. Acquire handle       5. Disk store hit?            │  │
//! │  │  3. Validate level/tile  6. Render, persist, return    │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │          │                    │                    │         │
//! │          ▼                    ▼                    ▼         │
//! │   ┌──────────────┐  ┌────────────────────┐  ┌───────────┐   │
//! │   │ ImageCatalog │  │ AcquireCoordinator │  │ TileStore │   │
//! │   └──────────────┘  └────────────────────┘  └───────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{AcquireCoordinator, ResourceCache, RetainedHandle};
use crate::error::TileError;
use crate::source::{HandleFactory, ImageCatalog, ImageIdentity, LevelInfo};

use super::format::{select_format, TileFormat, TileFormatConfig};
use super::pipeline::{GenerationOutcome, ProgressSink, TileGenerationPipeline};
use super::store::{CacheStats, StoreLayout, TileKey, TileStore};

// =============================================================================
// Responses
// =============================================================================

/// An encoded tile ready to be served.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded tile bytes
    pub data: Bytes,

    /// Format chosen by the policy for the tile's level
    pub format: TileFormat,

    /// MIME type matching `format`
    pub content_type: &'static str,

    /// Whether the tile came from the disk store
    pub cache_hit: bool,
}

/// Geometry summary of a registered image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub name: String,
    /// Full-resolution `(width, height)`
    pub dimensions: (u32, u32),
    pub level_count: u32,
    pub levels: Vec<LevelInfo>,
    pub total_tiles: u64,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Serves tiles for registered images, backed by a disk store.
///
/// # Type Parameters
///
/// * `F` - The handle factory used to open source images
pub struct TileService<F: HandleFactory> {
    catalog: ImageCatalog,
    coordinator: Arc<AcquireCoordinator<F>>,
    store: Arc<TileStore>,
    formats: TileFormatConfig,
    pipeline: TileGenerationPipeline<F>,
    disk_cache_enabled: bool,
}

impl<F: HandleFactory> TileService<F> {
    /// Create a service with the disk cache enabled.
    ///
    /// A single-image store cannot keep several images apart, so with more
    /// than one registered image the store is switched to the per-image
    /// layout under the same root.
    pub fn new(
        catalog: ImageCatalog,
        coordinator: AcquireCoordinator<F>,
        store: TileStore,
        formats: TileFormatConfig,
    ) -> Self {
        let store = if store.layout() == StoreLayout::SingleImage && catalog.len() > 1 {
            warn!(
                "{} images registered; storing tiles per image under {}",
                catalog.len(),
                store.root().display()
            );
            TileStore::new(store.root(), StoreLayout::PerImage)
        } else {
            store
        };
        let coordinator = Arc::new(coordinator);
        let store = Arc::new(store);
        let pipeline =
            TileGenerationPipeline::new(Arc::clone(&coordinator), Arc::clone(&store), formats);
        Self {
            catalog,
            coordinator,
            store,
            formats,
            pipeline,
            disk_cache_enabled: true,
        }
    }

    /// Enable or disable reading and writing the disk store.
    ///
    /// With the disk cache off every `get_tile` renders from the decoder and
    /// `generate_all` is rejected.
    pub fn with_disk_cache(mut self, enabled: bool) -> Self {
        self.disk_cache_enabled = enabled;
        self
    }

    pub fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<ResourceCache<F::Handle>> {
        self.coordinator.cache()
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn format_config(&self) -> &TileFormatConfig {
        &self.formats
    }

    pub fn disk_cache_enabled(&self) -> bool {
        self.disk_cache_enabled
    }

    async fn acquire(&self, image: &str) -> Result<RetainedHandle<F::Handle>, TileError> {
        let identity = self.catalog.resolve(image)?;
        Ok(self.coordinator.acquire_or_create(identity).await?)
    }

    /// Get one tile, from the disk store when present.
    ///
    /// # Arguments
    ///
    /// * `image` - registered image name
    /// * `level` - pyramid level (0 = lowest resolution)
    /// * `col`, `row` - tile coordinates within the level
    /// * `format_ext` - requested file extension; must name a known format,
    ///   but the served format is always the one the policy picks for `level`
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` for an unknown extension
    /// - `NotFound` for an unregistered image
    /// - `InvalidLevel` / `TileOutOfBounds` for coordinates outside the pyramid
    /// - `Open`, `Decode`, `Storage`, `ContentionExhausted` from the layers below
    pub async fn get_tile(
        &self,
        image: &str,
        level: u32,
        col: u32,
        row: u32,
        format_ext: &str,
    ) -> Result<TileResponse, TileError> {
        if TileFormat::from_extension(format_ext).is_none() {
            return Err(TileError::UnsupportedFormat {
                extension: format_ext.to_string(),
            });
        }

        let handle = self.acquire(image).await?;
        let level_count = handle.level_count();
        let (cols, rows) = handle.tile_grid(level).ok_or(TileError::InvalidLevel {
            level,
            level_count,
        })?;
        if col >= cols || row >= rows {
            return Err(TileError::TileOutOfBounds {
                level,
                col,
                row,
                cols,
                rows,
            });
        }

        let format = select_format(level, level_count, &self.formats);
        let key = TileKey::new(image, level, col, row, format);

        if self.disk_cache_enabled {
            if let Some(data) = self.store.read(&key).await? {
                return Ok(TileResponse {
                    data,
                    format,
                    content_type: format.content_type(),
                    cache_hit: true,
                });
            }
        }

        let data = handle
            .render_tile(level, col, row, format, self.formats.jpeg_quality)
            .await?;
        if self.disk_cache_enabled {
            self.store.write(&key, data.clone()).await?;
            debug!("Stored tile {}/{}/{}_{}.{}", image, level, col, row, format);
        }

        Ok(TileResponse {
            data,
            format,
            content_type: format.content_type(),
            cache_hit: false,
        })
    }

    /// Generate every tile of one image into the disk store.
    ///
    /// See [`TileGenerationPipeline::generate_all`].
    pub async fn generate_all(
        &self,
        image: &str,
        overwrite: bool,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, TileError> {
        if !self.disk_cache_enabled {
            return Err(TileError::DiskCacheDisabled);
        }
        let identity: &ImageIdentity = self.catalog.resolve(image)?;
        self.pipeline
            .generate_all(identity, overwrite, progress, cancel)
            .await
    }

    /// Delete stored tiles of one image, or of every image with `None`.
    pub async fn clear_cache(&self, image: Option<&str>) -> Result<(), TileError> {
        match image {
            Some(name) => {
                self.catalog.resolve(name)?;
                self.store.clear(name).await?;
            }
            None => self.store.clear_all().await?,
        }
        Ok(())
    }

    /// Count stored tiles of one image, or of the whole store with `None`.
    pub async fn get_stats(&self, image: Option<&str>) -> Result<CacheStats, TileError> {
        if let Some(name) = image {
            self.catalog.resolve(name)?;
        }
        Ok(self.store.stats(image).await?)
    }

    /// Pyramid geometry of a registered image.
    pub async fn image_info(&self, image: &str) -> Result<ImageInfo, TileError> {
        let handle = self.acquire(image).await?;
        let levels = handle.levels().to_vec();
        let dimensions = levels
            .last()
            .map(|top| (top.width, top.height))
            .unwrap_or((0, 0));
        Ok(ImageInfo {
            name: image.to_string(),
            dimensions,
            level_count: handle.level_count(),
            total_tiles: handle.total_tile_count(),
            levels,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

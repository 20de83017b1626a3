//! # wsi-tile-cache
//!
//! Tile rendering and caching backend for very large multi-resolution images.
//!
//! Serving a tile means opening an expensive decoder for the source image,
//! picking a lossy or lossless format for the requested level, rendering the
//! tile and persisting it so the next request skips the decoder entirely.
//!
//! ## Features
//!
//! - **Shared decoder handles**: one open handle per image, reference counted,
//!   closed after a sliding idle window and never while in use
//! - **Race-safe acquisition**: concurrent first requests never deadlock and
//!   never leak a handle
//! - **Per-level format policy**: the highest-resolution levels can be
//!   encoded losslessly
//! - **Atomic disk cache**: readers never observe a partially written tile
//! - **Bulk generation**: progress reporting and cooperative cancellation
//!
//! ## Architecture
//!
//! - [`source`] - Decoder traits, image catalog and the `image`-crate decoder
//! - [`cache`] - Handle cache, eviction and get-or-create coordination
//! - [`tile`] - Format policy, encoding, disk store, pipeline and service
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types for each layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_tile_cache::{
//!     AcquireCoordinator, ImageCatalog, ImageFileOpener, ResourceCache, StoreLayout,
//!     TileFormatConfig, TileService, TileStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut catalog = ImageCatalog::new();
//!     catalog.register("sample", "/data/sample.tif");
//!
//!     let cache = Arc::new(ResourceCache::new());
//!     let coordinator = AcquireCoordinator::new(cache, ImageFileOpener::default());
//!     let store = TileStore::new("/var/cache/tiles", StoreLayout::SingleImage);
//!     let service = TileService::new(catalog, coordinator, store, TileFormatConfig::default());
//!
//!     let tile = service.get_tile("sample", 8, 0, 0, "jpg").await.unwrap();
//!     println!("{} bytes of {}", tile.data.len(), tile.content_type);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use cache::{AcquireCoordinator, CacheEntry, ResourceCache, RetainedHandle};
pub use config::{CacheConfig, Cli, Command};
pub use error::{CacheError, DecodeError, EntryDisposed, OpenError, StorageError, TileError};
pub use source::{
    DecoderHandle, HandleFactory, ImageCatalog, ImageFileOpener, ImageIdentity, LevelInfo,
    PyramidImage,
};
pub use tile::{
    normalize_format, select_format, CacheStats, GenerationOutcome, GenerationSummary,
    ProgressEvent, ProgressSink, StoreLayout, TileFormat, TileFormatConfig,
    TileGenerationPipeline, TileKey, TileResponse, TileService, TileStore,
};

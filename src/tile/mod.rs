//! Tile layer.
//!
//! Everything between an open decoder handle and bytes on disk: which format
//! a level is encoded in, how tiles are encoded, where they are stored, and
//! the two ways of producing them (on demand through [`TileService`], in bulk
//! through [`TileGenerationPipeline`]).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Serving layer              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileService               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ Format policy│  │   Generation    │  │
//! │  │ (per level)  │  │    pipeline     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌────────────────────┐  ┌─────────────────┐
//! │ AcquireCoordinator │  │    TileStore    │
//! └────────────────────┘  └─────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: request entry point
//! - [`TileGenerationPipeline`]: bulk pre-generation with progress and cancellation
//! - [`TileStore`]: atomic on-disk tile cache
//! - [`select_format`] / [`TileFormatConfig`]: lossy/lossless choice per level
//! - [`TileEncoder`]: JPEG and PNG encoding

mod encoder;
mod format;
mod pipeline;
mod service;
mod store;

pub use encoder::{
    clamp_quality, is_valid_quality, TileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use format::{normalize_format, select_format, TileFormat, TileFormatConfig};
pub use pipeline::{
    GenerationOutcome, GenerationSummary, NoProgress, ProgressEvent, ProgressSink,
    TileGenerationPipeline,
};
pub use service::{ImageInfo, TileResponse, TileService};
pub use store::{CacheStats, StoreLayout, TileKey, TileStore};

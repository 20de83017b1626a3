//! Source image abstraction layer.
//!
//! This module is the boundary to the decoding collaborator: it defines what
//! the cache needs from an open decoder and ships one concrete decoder built
//! on the `image` crate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        AcquireCoordinator / Cache       │
//! └────────────────────┬────────────────────┘
//!                      │ open(identity)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           HandleFactory Trait           │
//! │   (constructs one handle per image)     │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           DecoderHandle Trait           │
//! │  (levels, tile grids, render_tile)      │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   PyramidImage (image crate backend)    │
//! └─────────────────────────────────────────┘
//! ```

mod catalog;
mod handle;
mod pyramid;

pub use catalog::{is_valid_image_name, ImageCatalog, ImageIdentity, SOURCE_EXTENSIONS};
pub use handle::{DecoderHandle, HandleFactory, LevelInfo};
pub use pyramid::{ImageFileOpener, PyramidImage, DEFAULT_TILE_SIZE};

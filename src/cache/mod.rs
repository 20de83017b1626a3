//! Decoder handle cache.
//!
//! Opening a large source image is expensive, so open handles are kept in a
//! shared table and handed out by reference count. An independent timer
//! sweeps out handles that have not been used for a while.
//!
//! # Components
//!
//! - [`ResourceCache`]: the keyed table plus the sliding-expiration sweep
//! - [`CacheEntry`]: one handle with its refcount and disposal gate
//! - [`AcquireCoordinator`]: race-safe get-or-create on top of the table
//! - [`RetainedHandle`]: RAII reference returned to callers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wsi_tile_cache::cache::{AcquireCoordinator, ResourceCache};
//! use wsi_tile_cache::source::{ImageFileOpener, ImageIdentity};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(ResourceCache::new());
//! let coordinator = AcquireCoordinator::new(Arc::clone(&cache), ImageFileOpener::default());
//!
//! let identity = ImageIdentity::new("sample", "/data/sample.tif");
//! let handle = coordinator.acquire_or_create(&identity).await?;
//! println!("{} levels", handle.level_count());
//! // Dropping `handle` releases the reference.
//! # Ok(())
//! # }
//! ```

mod acquire;
mod entry;
mod resource;

pub use acquire::{AcquireCoordinator, RetainedHandle, DEFAULT_MAX_ACQUIRE_ATTEMPTS};
pub use entry::{CacheCounters, CacheEntry, EntryLifecycle};
pub use resource::{
    EvictionReport, ResourceCache, DEFAULT_SLIDING_EXPIRATION, DEFAULT_SWEEP_INTERVAL,
};

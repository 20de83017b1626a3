//! Get-or-create protocol for decoder handles.
//!
//! ```text
//!          ┌──────────── lookup ────────────┐
//!          │ hit                            │ miss
//!          ▼                                ▼
//!       retain()                      factory.open()
//!     ok │   │ disposed                     │
//!        │   └──────▶ retry ◀─── lost ── insert_if_absent
//!        ▼                                  │ won
//!     return ◀──────────────────────────────┘
//! ```
//!
//! Construction happens outside any lock. Two callers missing at the same
//! time both open a handle; the one whose insert loses closes its candidate
//! and retries against the winner's entry. The loop never waits on another
//! caller and gives up with `ContentionExhausted` after `max_attempts` rounds.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{CacheError, DecodeError, EntryDisposed};
use crate::source::{DecoderHandle, HandleFactory, ImageIdentity, LevelInfo};
use crate::tile::TileFormat;

use super::entry::CacheEntry;
use super::resource::ResourceCache;

/// Default retry ceiling for [`AcquireCoordinator::acquire_or_create`].
pub const DEFAULT_MAX_ACQUIRE_ATTEMPTS: u32 = 8;

// =============================================================================
// RetainedHandle
// =============================================================================

/// A reference to a cached decoder handle.
///
/// The handle cannot be disposed while any `RetainedHandle` for it exists.
/// Cloning takes another reference; dropping releases one.
pub struct RetainedHandle<H: DecoderHandle> {
    entry: Arc<CacheEntry<H>>,
}

impl<H: DecoderHandle> RetainedHandle<H> {
    /// Retain `entry`, failing if it has already been disposed.
    pub fn retain(entry: Arc<CacheEntry<H>>) -> Result<Self, EntryDisposed> {
        entry.retain()?;
        Ok(Self { entry })
    }

    pub fn identity(&self) -> &ImageIdentity {
        self.entry.identity()
    }

    /// When the underlying handle was opened.
    pub fn created_at(&self) -> Instant {
        self.entry.created_at()
    }

    pub fn level_count(&self) -> u32 {
        self.entry.levels().len() as u32
    }

    pub fn level_info(&self, level: u32) -> Option<LevelInfo> {
        self.entry.levels().get(level as usize).copied()
    }

    pub fn levels(&self) -> &[LevelInfo] {
        self.entry.levels()
    }

    /// Tile grid `(cols, rows)` of a level.
    pub fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        self.level_info(level).map(|info| (info.cols, info.rows))
    }

    pub fn total_tile_count(&self) -> u64 {
        self.entry.levels().iter().map(LevelInfo::tile_count).sum()
    }

    /// Whether two retained handles share the same cache entry.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Render a tile on the blocking pool.
    ///
    /// The blocking task holds its own reference, so dropping this future
    /// early never closes the handle under a running render.
    pub async fn render_tile(
        &self,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, DecodeError> {
        let retained = self.clone();
        tokio::task::spawn_blocking(move || {
            retained.render_tile_blocking(level, col, row, format, quality)
        })
        .await
        .map_err(|e| DecodeError::new(level, col, row, e.to_string()))?
    }

    /// Render a tile on the current thread.
    pub fn render_tile_blocking(
        &self,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, DecodeError> {
        self.entry
            .with_handle(|handle| handle.render_tile(level, col, row, format, quality))
            .map_err(|e| DecodeError::new(level, col, row, e.to_string()))?
    }
}

impl<H: DecoderHandle> Clone for RetainedHandle<H> {
    fn clone(&self) -> Self {
        self.entry.add_ref();
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<H: DecoderHandle> Drop for RetainedHandle<H> {
    fn drop(&mut self) {
        self.entry.release();
    }
}

impl<H: DecoderHandle> fmt::Debug for RetainedHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedHandle")
            .field("image", &self.identity().name())
            .field("levels", &self.level_count())
            .finish()
    }
}

// =============================================================================
// AcquireCoordinator
// =============================================================================

/// Hands out retained handles, constructing them through a factory on a miss.
pub struct AcquireCoordinator<F: HandleFactory> {
    cache: Arc<ResourceCache<F::Handle>>,
    factory: F,
    max_attempts: u32,
}

impl<F: HandleFactory> AcquireCoordinator<F> {
    pub fn new(cache: Arc<ResourceCache<F::Handle>>, factory: F) -> Self {
        Self {
            cache,
            factory,
            max_attempts: DEFAULT_MAX_ACQUIRE_ATTEMPTS,
        }
    }

    /// Override the retry ceiling (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ResourceCache<F::Handle>> {
        &self.cache
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Return a retained handle for `identity`, opening it if necessary.
    ///
    /// # Errors
    ///
    /// - `CacheError::Open` if the factory fails; not retried.
    /// - `CacheError::ContentionExhausted` after `max_attempts` rounds
    ///   without obtaining a live entry.
    pub async fn acquire_or_create(
        &self,
        identity: &ImageIdentity,
    ) -> Result<RetainedHandle<F::Handle>, CacheError> {
        for attempt in 1..=self.max_attempts {
            if let Some(entry) = self.cache.lookup(identity) {
                match RetainedHandle::retain(entry) {
                    Ok(retained) => return Ok(retained),
                    Err(EntryDisposed) => {
                        debug!(
                            "Entry for {} disposed before retain (attempt {})",
                            identity.name(),
                            attempt
                        );
                        continue;
                    }
                }
            }

            let handle = self.factory.open(identity).await?;
            self.cache.counters().record_open();
            debug!("Opened decoder handle for {}", identity.name());

            let entry = Arc::new(self.cache.new_entry(identity.clone(), handle));
            // Retain before publishing so a sweep can never dispose the
            // entry between insert and retain.
            let retained = RetainedHandle::retain(Arc::clone(&entry))
                .map_err(|_| self.contention(identity, attempt))?;

            if self.cache.insert_if_absent(identity, Arc::clone(&entry)) {
                return Ok(retained);
            }

            debug!(
                "Lost insert race for {}; discarding candidate handle",
                identity.name()
            );
            drop(retained);
            entry.mark_evicted();
        }

        warn!(
            "Acquire for {} exhausted {} attempts",
            identity.name(),
            self.max_attempts
        );
        Err(self.contention(identity, self.max_attempts))
    }

    fn contention(&self, identity: &ImageIdentity, attempts: u32) -> CacheError {
        CacheError::ContentionExhausted {
            image: identity.name().to_string(),
            attempts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

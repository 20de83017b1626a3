//! Reference-counted wrapper around one decoder handle.
//!
//! # Disposal gate
//!
//! A handle is closed only when both conditions hold at the same time:
//!
//! - the entry has been evicted from the lookup table (`evicted`)
//! - no caller holds a reference (`refcount == 0`)
//!
//! Both conditions, plus the terminal `disposed` flag, live behind one
//! per-entry mutex. Whichever of `mark_evicted` and `release` observes the
//! gate closing performs the disposal; the `disposed` flag makes the second
//! observer a no-op.
//!
//! ```text
//! Active ──evict──▶ PendingDispose ──refcount 0──▶ Disposed
//!   ▲  │
//!   └──┘ retain / release
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::EntryDisposed;
use crate::source::{DecoderHandle, ImageIdentity, LevelInfo};

// =============================================================================
// Counters
// =============================================================================

/// Handle open/close counters shared by a cache and its entries.
#[derive(Debug, Default)]
pub struct CacheCounters {
    opened: AtomicU64,
    disposed: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispose(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    /// Handles constructed so far, including discarded race losers.
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Handles closed so far.
    pub fn disposed(&self) -> u64 {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Handles currently open.
    pub fn live(&self) -> u64 {
        self.opened().saturating_sub(self.disposed())
    }
}

// =============================================================================
// Entry State
// =============================================================================

/// Externally visible lifecycle stage of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryLifecycle {
    /// In the lookup table
    Active,
    /// Evicted, waiting for the last reference to be released
    PendingDispose,
    /// Handle closed; terminal
    Disposed,
}

#[derive(Debug, Default)]
struct EntryState {
    refcount: usize,
    evicted: bool,
    disposed: bool,
}

impl EntryState {
    /// Flip to disposed if the gate is closed. Returns `true` exactly once.
    fn try_begin_dispose(&mut self) -> bool {
        if self.evicted && self.refcount == 0 && !self.disposed {
            self.disposed = true;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// CacheEntry
// =============================================================================

/// One cached decoder handle with its reference count and eviction state.
pub struct CacheEntry<H: DecoderHandle> {
    identity: ImageIdentity,
    handle: RwLock<Option<H>>,
    state: Mutex<EntryState>,
    last_access: Mutex<Instant>,
    created_at: Instant,
    levels: Vec<LevelInfo>,
    counters: Arc<CacheCounters>,
}

impl<H: DecoderHandle> CacheEntry<H> {
    /// Wrap a freshly opened handle. The entry starts idle (refcount 0).
    pub fn new(identity: ImageIdentity, handle: H, counters: Arc<CacheCounters>) -> Self {
        let levels = (0..handle.level_count())
            .filter_map(|level| handle.level_info(level))
            .collect();
        let now = Instant::now();
        Self {
            identity,
            handle: RwLock::new(Some(handle)),
            state: Mutex::new(EntryState::default()),
            last_access: Mutex::new(now),
            created_at: now,
            levels,
            counters,
        }
    }

    pub fn identity(&self) -> &ImageIdentity {
        &self.identity
    }

    /// When the handle was opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Level geometry captured when the handle was opened.
    pub fn levels(&self) -> &[LevelInfo] {
        &self.levels
    }

    /// Take a reference unless the handle has already been disposed.
    ///
    /// The disposed check and the increment happen under the same lock, so a
    /// disposed entry is never brought back.
    pub fn retain(&self) -> Result<(), EntryDisposed> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(EntryDisposed);
        }
        state.refcount += 1;
        drop(state);
        self.touch();
        Ok(())
    }

    /// Take an additional reference on behalf of a caller that already holds one.
    pub(crate) fn add_ref(&self) {
        let mut state = self.state.lock();
        debug_assert!(!state.disposed && state.refcount > 0);
        state.refcount += 1;
    }

    /// Drop a reference. Disposes the handle if this was the last reference
    /// of an evicted entry.
    pub fn release(&self) {
        let dispose = {
            let mut state = self.state.lock();
            debug_assert!(state.refcount > 0, "release without retain");
            state.refcount = state.refcount.saturating_sub(1);
            state.try_begin_dispose()
        };
        if dispose {
            self.dispose_handle();
        }
    }

    /// Mark the entry as removed from the lookup table.
    ///
    /// Returns `true` if the handle was disposed immediately (no references
    /// outstanding); otherwise disposal is left to the final `release`.
    pub fn mark_evicted(&self) -> bool {
        let dispose = {
            let mut state = self.state.lock();
            state.evicted = true;
            state.try_begin_dispose()
        };
        if dispose {
            self.dispose_handle();
        }
        dispose
    }

    pub fn lifecycle(&self) -> EntryLifecycle {
        let state = self.state.lock();
        if state.disposed {
            EntryLifecycle::Disposed
        } else if state.evicted {
            EntryLifecycle::PendingDispose
        } else {
            EntryLifecycle::Active
        }
    }

    pub fn refcount(&self) -> usize {
        self.state.lock().refcount
    }

    /// Reset the sliding-expiration clock.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Time since the last access, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }

    /// Run `f` against the handle, unless it has been disposed.
    pub fn with_handle<R>(&self, f: impl FnOnce(&H) -> R) -> Result<R, EntryDisposed> {
        let guard = self.handle.read();
        guard.as_ref().map(f).ok_or(EntryDisposed)
    }

    fn dispose_handle(&self) {
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            debug!("Disposing decoder handle for {}", self.identity.name());
            handle.close();
            self.counters.record_dispose();
        }
    }
}

impl<H: DecoderHandle> Drop for CacheEntry<H> {
    fn drop(&mut self) {
        // Entries dropped without eviction (cache teardown, lost insert race
        // before discard) still close their handle.
        if let Some(handle) = self.handle.get_mut().take() {
            handle.close();
            self.counters.record_dispose();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

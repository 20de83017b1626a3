//! Keyed table of cached decoder handles with sliding expiration.
//!
//! The table itself is a sharded concurrent map; per-key insertion is the
//! only point where callers synchronize. Expiration is driven by a separate
//! sweep (see [`ResourceCache::spawn_eviction_task`]) rather than by request
//! traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{DecoderHandle, ImageIdentity};

use super::entry::{CacheCounters, CacheEntry};

/// Default idle time after which a handle is evicted.
pub const DEFAULT_SLIDING_EXPIRATION: Duration = Duration::from_secs(600);

/// Default interval between eviction sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Result of one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries removed from the table
    pub evicted: usize,
    /// Of those, entries whose handle was closed during the sweep
    pub disposed: usize,
}

/// Shared table of decoder handles keyed by image identity.
pub struct ResourceCache<H: DecoderHandle> {
    entries: DashMap<ImageIdentity, Arc<CacheEntry<H>>>,
    sliding_expiration: Duration,
    counters: Arc<CacheCounters>,
}

impl<H: DecoderHandle> ResourceCache<H> {
    /// Create a cache with the default sliding expiration (10 minutes).
    pub fn new() -> Self {
        Self::with_expiration(DEFAULT_SLIDING_EXPIRATION)
    }

    pub fn with_expiration(sliding_expiration: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sliding_expiration,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn sliding_expiration(&self) -> Duration {
        self.sliding_expiration
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Wrap a handle in an entry wired to this cache's counters.
    pub fn new_entry(&self, identity: ImageIdentity, handle: H) -> CacheEntry<H> {
        CacheEntry::new(identity, handle, Arc::clone(&self.counters))
    }

    /// Find the entry for `key`, resetting its expiration clock.
    pub fn lookup(&self, key: &ImageIdentity) -> Option<Arc<CacheEntry<H>>> {
        self.entries.get(key).map(|entry| {
            entry.touch();
            Arc::clone(entry.value())
        })
    }

    /// Insert `entry` unless the key is already occupied.
    ///
    /// Returns `false` if another entry won; the caller owns the candidate
    /// and must discard it.
    pub fn insert_if_absent(&self, key: &ImageIdentity, entry: Arc<CacheEntry<H>>) -> bool {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Evict every entry idle for longer than the sliding expiration.
    pub fn evict_stale(&self) -> EvictionReport {
        self.evict_stale_at(Instant::now())
    }

    /// Evict entries idle for longer than the sliding expiration as of `now`.
    pub fn evict_stale_at(&self, now: Instant) -> EvictionReport {
        let window = self.sliding_expiration;
        let stale: Vec<ImageIdentity> = self
            .entries
            .iter()
            .filter(|entry| entry.value().idle_for(now) > window)
            .map(|entry| entry.key().clone())
            .collect();

        let mut report = EvictionReport::default();
        for key in stale {
            // Re-check under the shard lock: the entry may have been touched
            // since the scan.
            let removed = self
                .entries
                .remove_if(&key, |_, entry| entry.idle_for(now) > window);
            if let Some((_, entry)) = removed {
                report.evicted += 1;
                if entry.mark_evicted() {
                    report.disposed += 1;
                }
            }
        }

        if report.evicted > 0 {
            debug!(
                "Eviction sweep: {} evicted, {} disposed, {} deferred",
                report.evicted,
                report.disposed,
                report.evicted - report.disposed
            );
        }
        report
    }

    /// Evict every entry regardless of age.
    ///
    /// Entries still in use are closed when their last reference is released.
    pub fn evict_all(&self) -> EvictionReport {
        let keys: Vec<ImageIdentity> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut report = EvictionReport::default();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                report.evicted += 1;
                if entry.mark_evicted() {
                    report.disposed += 1;
                }
            }
        }
        report
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`evict_stale`](Self::evict_stale) every `interval` until `cancel` fires.
    pub fn spawn_eviction_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.evict_stale();
                    }
                }
            }
            debug!("Eviction task stopped");
        })
    }
}

impl<H: DecoderHandle> Default for ResourceCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

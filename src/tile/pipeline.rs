//! Bulk tile generation.
//!
//! Walks every tile of one image, level by level, and fills the tile store.
//! One handle reference is held for the whole run and released on every exit
//! path, including cancellation and errors.
//!
//! ```text
//! for level in 0..level_count:
//!     format = select_format(level)
//!     for row, col in grid (row-major):
//!         cancelled?           -> Canceled
//!         !overwrite && exists -> skipped
//!         render + write       -> generated
//!         progress(processed, total)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::AcquireCoordinator;
use crate::error::TileError;
use crate::source::{HandleFactory, ImageIdentity};

use super::format::{select_format, TileFormatConfig};
use super::store::{TileKey, TileStore};

// =============================================================================
// Progress
// =============================================================================

/// Emitted after every processed tile, skipped or generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub image: Arc<str>,
    pub level: u32,
    pub col: u32,
    pub row: u32,
    /// Tiles processed so far, including this one
    pub processed: u64,
    /// Tiles in the whole image
    pub total: u64,
}

/// Receiver for generation progress.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

// =============================================================================
// Outcome
// =============================================================================

/// Counts from a run that visited every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSummary {
    pub generated: u64,
    pub skipped: u64,
    pub duration: Duration,
}

/// How a generation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed(GenerationSummary),
    /// The cancellation token fired between tiles
    Canceled {
        generated: u64,
        skipped: u64,
        processed: u64,
    },
}

impl GenerationOutcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, GenerationOutcome::Canceled { .. })
    }

    pub fn generated(&self) -> u64 {
        match self {
            GenerationOutcome::Completed(summary) => summary.generated,
            GenerationOutcome::Canceled { generated, .. } => *generated,
        }
    }

    pub fn skipped(&self) -> u64 {
        match self {
            GenerationOutcome::Completed(summary) => summary.skipped,
            GenerationOutcome::Canceled { skipped, .. } => *skipped,
        }
    }
}

impl fmt::Display for GenerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationOutcome::Completed(s) => write!(
                f,
                "completed: {} generated, {} skipped in {:.2?}",
                s.generated, s.skipped, s.duration
            ),
            GenerationOutcome::Canceled {
                generated,
                skipped,
                processed,
            } => write!(
                f,
                "canceled after {} tiles: {} generated, {} skipped",
                processed, generated, skipped
            ),
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Fills the tile store with every tile of an image.
pub struct TileGenerationPipeline<F: HandleFactory> {
    coordinator: Arc<AcquireCoordinator<F>>,
    store: Arc<TileStore>,
    formats: TileFormatConfig,
}

impl<F: HandleFactory> TileGenerationPipeline<F> {
    pub fn new(
        coordinator: Arc<AcquireCoordinator<F>>,
        store: Arc<TileStore>,
        formats: TileFormatConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            formats,
        }
    }

    /// Generate every tile of `identity`.
    ///
    /// # Arguments
    ///
    /// * `overwrite` - re-render tiles that are already stored
    /// * `progress` - receives one event per processed tile
    /// * `cancel` - checked before each tile; a tile in flight is finished
    ///
    /// # Errors
    ///
    /// Open, decode and storage failures abort the run. Tiles written before
    /// the failure stay in the store.
    pub async fn generate_all(
        &self,
        identity: &ImageIdentity,
        overwrite: bool,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, TileError> {
        let started = Instant::now();
        let handle = self.coordinator.acquire_or_create(identity).await?;

        let image: Arc<str> = Arc::from(identity.name());
        let level_count = handle.level_count();
        let total = handle.total_tile_count();
        info!(
            "Generating {} tiles for {} ({} levels, overwrite={})",
            total, image, level_count, overwrite
        );

        let mut generated = 0u64;
        let mut skipped = 0u64;
        let mut processed = 0u64;

        for info in handle.levels() {
            let format = select_format(info.level, level_count, &self.formats);
            debug!(
                "Level {} of {}: {}x{} tiles as {}",
                info.level, image, info.cols, info.rows, format
            );

            for row in 0..info.rows {
                for col in 0..info.cols {
                    if cancel.is_cancelled() {
                        info!(
                            "Generation for {} canceled after {}/{} tiles",
                            image, processed, total
                        );
                        return Ok(GenerationOutcome::Canceled {
                            generated,
                            skipped,
                            processed,
                        });
                    }

                    let key = TileKey::new(Arc::clone(&image), info.level, col, row, format);
                    if !overwrite && self.store.exists(&key).await? {
                        skipped += 1;
                    } else {
                        let data = handle
                            .render_tile(info.level, col, row, format, self.formats.jpeg_quality)
                            .await
                            .map_err(|e| {
                                warn!("Generation for {} aborted: {}", image, e);
                                e
                            })?;
                        self.store.write(&key, data).await.map_err(|e| {
                            warn!("Generation for {} aborted: {}", image, e);
                            e
                        })?;
                        generated += 1;
                    }

                    processed += 1;
                    progress.report(&ProgressEvent {
                        image: Arc::clone(&image),
                        level: info.level,
                        col,
                        row,
                        processed,
                        total,
                    });
                }
            }
        }

        let summary = GenerationSummary {
            generated,
            skipped,
            duration: started.elapsed(),
        };
        info!(
            "Generation for {} finished: {} generated, {} skipped in {:.2?}",
            image, summary.generated, summary.skipped, summary.duration
        );
        Ok(GenerationOutcome::Completed(summary))
    }
}

// =============================================================================
// Tests
// =============================================================================

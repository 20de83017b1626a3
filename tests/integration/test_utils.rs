//! Test utilities for integration tests.
//!
//! Provides a mock decoder with open/close tracking and helpers that write
//! real source images to a temporary directory.

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use wsi_tile_cache::cache::{AcquireCoordinator, ResourceCache};
use wsi_tile_cache::error::{DecodeError, OpenError};
use wsi_tile_cache::source::{
    DecoderHandle, HandleFactory, ImageCatalog, ImageFileOpener, ImageIdentity,
};
use wsi_tile_cache::tile::{StoreLayout, TileFormat, TileFormatConfig, TileService, TileStore};

// =============================================================================
// Mock Decoder
// =============================================================================

/// Open/close counters shared between a factory and its handles.
#[derive(Debug, Default)]
pub struct HandleTracker {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl HandleTracker {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }
}

/// A decoder with a fixed 3-level pyramid: 1x1, 2x1, 4x2 tiles.
pub struct MockHandle {
    tracker: Arc<HandleTracker>,
    render_delay: Option<Duration>,
}

impl DecoderHandle for MockHandle {
    fn level_count(&self) -> u32 {
        3
    }

    fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        match level {
            0 => Some((1, 1)),
            1 => Some((2, 1)),
            2 => Some((4, 2)),
            _ => None,
        }
    }

    fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        self.tile_grid(level).map(|(cols, rows)| (cols * 16, rows * 16))
    }

    fn render_tile(
        &self,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        _quality: u8,
    ) -> Result<Bytes, DecodeError> {
        if let Some(delay) = self.render_delay {
            std::thread::sleep(delay);
        }
        Ok(Bytes::from(format!("{level}/{col}_{row}.{}", format.extension())))
    }

    fn close(self) {
        self.tracker.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory for [`MockHandle`]s with a configurable open latency.
pub struct MockFactory {
    pub tracker: Arc<HandleTracker>,
    open_delay: Duration,
    render_delay: Option<Duration>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            tracker: Arc::new(HandleTracker::default()),
            open_delay: Duration::from_millis(0),
            render_delay: None,
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }
}

#[async_trait]
impl HandleFactory for MockFactory {
    type Handle = MockHandle;

    async fn open(&self, _identity: &ImageIdentity) -> Result<MockHandle, OpenError> {
        tokio::time::sleep(self.open_delay).await;
        self.tracker.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            tracker: Arc::clone(&self.tracker),
            render_delay: self.render_delay,
        })
    }
}

pub fn mock_identity(name: &str) -> ImageIdentity {
    ImageIdentity::new(name, format!("/mock/{name}.tif"))
}

// =============================================================================
// Real Source Images
// =============================================================================

/// Write an RGB gradient PNG and return its path.
pub fn write_gradient_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let path = dir.join(format!("{name}.png"));
    image.save(&path).unwrap();
    path
}

/// Source directory, cache directory and a service over real decoded images.
pub struct TestSetup {
    pub sources: TempDir,
    pub cache: TempDir,
    pub service: TileService<ImageFileOpener>,
}

/// Build a service over gradient images of the given sizes.
///
/// A single image uses the single-image store layout, like the binary does.
pub fn setup(
    images: &[(&str, u32, u32)],
    tile_size: u32,
    formats: TileFormatConfig,
) -> TestSetup {
    let sources = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();

    let mut catalog = ImageCatalog::new();
    for &(name, width, height) in images {
        let path = write_gradient_png(sources.path(), name, width, height);
        catalog.register(name, path);
    }
    let layout = if images.len() == 1 {
        StoreLayout::SingleImage
    } else {
        StoreLayout::PerImage
    };

    let coordinator = AcquireCoordinator::new(
        Arc::new(ResourceCache::new()),
        ImageFileOpener::new(tile_size),
    );
    let store = TileStore::new(cache.path(), layout);
    let service = TileService::new(catalog, coordinator, store, formats);

    TestSetup {
        sources,
        cache,
        service,
    }
}

// =============================================================================
// Format Checks
// =============================================================================

/// Check that data starts with the JPEG SOI marker and ends with EOI.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4
        && data[0] == 0xFF
        && data[1] == 0xD8
        && data[data.len() - 2] == 0xFF
        && data[data.len() - 1] == 0xD9
}

/// Check the PNG signature.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}

/// Decoded pixel dimensions of an encoded tile.
pub fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(data).unwrap();
    (image.width(), image.height())
}

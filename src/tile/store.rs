//! Disk-backed tile store.
//!
//! Rendered tiles are persisted under the cache root so repeated requests
//! skip the decoder entirely.
//!
//! # Layout
//!
//! ```text
//! root/<image>/<level>/<col>_<row>.<ext>    (multi-image deployments)
//! root/<level>/<col>_<row>.<ext>            (single-image deployments)
//! ```
//!
//! # Atomicity
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the final path. Readers either see the previous complete file
//! or the new complete file, never a partial one. Concurrent writers of the
//! same key do not coordinate; the last rename wins.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::source::is_valid_image_name;

use super::format::TileFormat;

// =============================================================================
// Tile Key
// =============================================================================

/// Identifies one stored tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Image name
    pub image: Arc<str>,

    /// Pyramid level (0 = lowest resolution)
    pub level: u32,

    /// Tile column
    pub col: u32,

    /// Tile row
    pub row: u32,

    /// Encoded format
    pub format: TileFormat,
}

impl TileKey {
    pub fn new(
        image: impl Into<Arc<str>>,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Self {
        Self {
            image: image.into(),
            level,
            col,
            row,
            format,
        }
    }
}

// =============================================================================
// Cache Stats
// =============================================================================

/// File count and total size of stored tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub file_count: u64,
    pub total_bytes: u64,
}

// =============================================================================
// Tile Store
// =============================================================================

/// Whether tiles are grouped into per-image subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLayout {
    /// `root/<image>/...`
    PerImage,
    /// `root/...`; the image name is not part of the path
    SingleImage,
}

/// Persistent tile cache on the local filesystem.
///
/// All operations run on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
    layout: StoreLayout,
}

impl TileStore {
    pub fn new(root: impl Into<PathBuf>, layout: StoreLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    /// Directory holding all tiles of `image`.
    pub fn image_dir(&self, image: &str) -> Result<PathBuf, StorageError> {
        match self.layout {
            StoreLayout::SingleImage => Ok(self.root.clone()),
            StoreLayout::PerImage => {
                validate_image_name(image)?;
                Ok(self.root.join(image))
            }
        }
    }

    /// Full path of a tile file.
    pub fn tile_path(&self, key: &TileKey) -> Result<PathBuf, StorageError> {
        Ok(self
            .image_dir(&key.image)?
            .join(key.level.to_string())
            .join(format!("{}_{}.{}", key.col, key.row, key.format.extension())))
    }

    /// Check whether a tile is stored.
    pub async fn exists(&self, key: &TileKey) -> Result<bool, StorageError> {
        let path = self.tile_path(key)?;
        blocking(move || match std::fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&path, &e)),
        })
        .await
    }

    /// Read a stored tile. `Ok(None)` is a cache miss.
    pub async fn read(&self, key: &TileKey) -> Result<Option<Bytes>, StorageError> {
        let path = self.tile_path(key)?;
        blocking(move || match std::fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, &e)),
        })
        .await
    }

    /// Persist a tile, replacing any previous content atomically.
    pub async fn write(&self, key: &TileKey, data: Bytes) -> Result<(), StorageError> {
        let path = self.tile_path(key)?;
        blocking(move || write_atomic(&path, &data)).await
    }

    /// Delete every stored tile of one image.
    pub async fn clear(&self, image: &str) -> Result<(), StorageError> {
        let dir = self.image_dir(image)?;
        debug!("Clearing tile store at {}", dir.display());
        blocking(move || remove_tree(&dir)).await
    }

    /// Delete every stored tile.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        let root = self.root.clone();
        debug!("Clearing entire tile store at {}", root.display());
        blocking(move || remove_tree(&root)).await
    }

    /// Count stored tiles for one image, or for the whole store with `None`.
    pub async fn stats(&self, image: Option<&str>) -> Result<CacheStats, StorageError> {
        let dir = match image {
            Some(name) => self.image_dir(name)?,
            None => self.root.clone(),
        };
        blocking(move || scan(&dir)).await
    }
}

// =============================================================================
// Filesystem helpers
// =============================================================================

async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

fn validate_image_name(image: &str) -> Result<(), StorageError> {
    if is_valid_image_name(image) {
        Ok(())
    } else {
        Err(StorageError::InvalidImageName(image.to_string()))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidImageName(path.display().to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, &e))?;

    // The `.tmp` suffix keeps in-flight files out of `scan`.
    let mut tmp = tempfile::Builder::new()
        .prefix(".tile-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| StorageError::io(parent, &e))?;
    tmp.write_all(data)
        .map_err(|e| StorageError::io(tmp.path(), &e))?;
    tmp.persist(path).map_err(|e| {
        warn!("Failed to persist tile {}: {}", path.display(), e.error);
        StorageError::io(path, &e.error)
    })?;
    Ok(())
}

fn remove_tree(dir: &Path) -> Result<(), StorageError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(dir, &e)),
    }
}

fn is_tile_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TileFormat::ALL.iter().any(|f| f.extension() == e))
        .unwrap_or(false)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}

fn walk_error(dir: &Path, err: walkdir::Error) -> StorageError {
    let path = err.path().unwrap_or(dir).to_path_buf();
    StorageError::Io {
        path,
        message: err.to_string(),
    }
}

fn scan(dir: &Path) -> Result<CacheStats, StorageError> {
    let mut stats = CacheStats::default();

    // Entries may vanish under a concurrent clear; skip them.
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_not_found(&e) => continue,
            Err(e) => return Err(walk_error(dir, e)),
        };
        if !entry.file_type().is_file() || !is_tile_file(entry.path()) {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => {
                stats.file_count += 1;
                stats.total_bytes += metadata.len();
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(walk_error(dir, e)),
        }
    }
    Ok(stats)
}

// =============================================================================
// Tests
// =============================================================================

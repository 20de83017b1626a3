use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening a source image into a decoder handle.
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    /// The source file could not be read
    #[error("Cannot read source {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The source bytes could not be decoded into an image
    #[error("Cannot decode source {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// The decoded image has no pixels
    #[error("Source {path} is empty")]
    EmptyImage { path: PathBuf },

    /// The blocking decode task was cancelled or panicked
    #[error("Open task failed: {0}")]
    Task(String),
}

/// Failure to render a single tile from an open handle.
#[derive(Debug, Clone, Error)]
#[error("Failed to render tile {level}/{col}_{row}: {message}")]
pub struct DecodeError {
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub message: String,
}

impl DecodeError {
    pub fn new(level: u32, col: u32, row: u32, message: impl Into<String>) -> Self {
        Self {
            level,
            col,
            row,
            message: message.into(),
        }
    }
}

/// Errors from the on-disk tile store.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("Storage I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Image name cannot be mapped to a directory inside the cache root
    #[error("Invalid image name for tile store: {0:?}")]
    InvalidImageName(String),

    /// The blocking I/O task was cancelled or panicked
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Returned by `CacheEntry::retain` once the entry's handle is gone.
///
/// The acquire loop absorbs this and retries; it never reaches callers of
/// `acquire_or_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cache entry already disposed")]
pub struct EntryDisposed;

/// Errors from acquiring a decoder handle.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The acquire loop hit its retry ceiling
    #[error("Gave up acquiring handle for {image} after {attempts} attempts")]
    ContentionExhausted { image: String, attempts: u32 },

    /// The factory failed to construct a handle
    #[error(transparent)]
    Open(#[from] OpenError),
}

/// Errors surfaced by the tile service and the generation pipeline.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// No image registered under this name
    #[error("Image not found: {name}")]
    NotFound { name: String },

    /// The decoder failed to open the source image
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    /// Tile rendering failed
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Disk cache read or write failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Acquire retry ceiling exceeded (internal fault)
    #[error("Handle contention exhausted for {image} after {attempts} attempts")]
    ContentionExhausted { image: String, attempts: u32 },

    /// Requested level does not exist
    #[error("Invalid level {level}: image has {level_count} levels")]
    InvalidLevel { level: u32, level_count: u32 },

    /// Requested tile coordinates are outside the level grid
    #[error("Tile ({col}, {row}) out of bounds for level {level} (grid {cols}x{rows})")]
    TileOutOfBounds {
        level: u32,
        col: u32,
        row: u32,
        cols: u32,
        rows: u32,
    },

    /// Requested file extension is not a known tile format
    #[error("Unsupported tile format: {extension}")]
    UnsupportedFormat { extension: String },

    /// Bulk generation requested while the disk cache is turned off
    #[error("Disk cache is disabled")]
    DiskCacheDisabled,
}

impl From<CacheError> for TileError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Open(open) => TileError::Open(open),
            CacheError::ContentionExhausted { image, attempts } => {
                TileError::ContentionExhausted { image, attempts }
            }
        }
    }
}

//! Registry of known source images.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{OpenError, TileError};

/// Source file extensions picked up when scanning a directory.
pub const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

/// Name and source location of one image.
///
/// Cloning is cheap; both fields are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageIdentity {
    name: Arc<str>,
    source: Arc<Path>,
}

impl ImageIdentity {
    pub fn new(name: impl Into<Arc<str>>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: Arc::from(source.into().into_boxed_path()),
        }
    }

    /// Image name used in tile keys and store paths.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the source file.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Immutable-after-registration set of images, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    images: BTreeMap<String, ImageIdentity>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image. Returns `false` if the name is already taken or is
    /// not a valid image name; an existing registration is kept.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<PathBuf>) -> bool {
        let name = name.into();
        if !is_valid_image_name(&name) || self.images.contains_key(&name) {
            return false;
        }
        let identity = ImageIdentity::new(name.as_str(), source);
        self.images.insert(name, identity);
        true
    }

    /// Build a catalog from every supported image file directly inside `dir`.
    ///
    /// Images are named after their file stem.
    pub fn from_directory(dir: &Path) -> Result<Self, OpenError> {
        let read_dir = std::fs::read_dir(dir).map_err(|e| OpenError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut catalog = Self::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            if !path.is_file() || !has_source_extension(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !catalog.register(stem, path.clone()) {
                debug!(
                    "Skipping {}: name {} is invalid or already registered",
                    path.display(),
                    stem
                );
            }
        }
        Ok(catalog)
    }

    /// Look up an image by name.
    pub fn get(&self, name: &str) -> Option<&ImageIdentity> {
        self.images.get(name)
    }

    /// Look up an image by name, failing with `NotFound`.
    pub fn resolve(&self, name: &str) -> Result<&ImageIdentity, TileError> {
        self.get(name).ok_or_else(|| TileError::NotFound {
            name: name.to_string(),
        })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Whether `name` can name an image: exactly one plain path segment, so every
/// image owns a directory that no other image's directory sits inside.
pub fn is_valid_image_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SOURCE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

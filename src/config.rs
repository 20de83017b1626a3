//! Configuration management for the tile cache.
//!
//! Settings come from command-line arguments via clap, with every option
//! also readable from an environment variable with the `TILECACHE_` prefix.
//!
//! # Environment Variables
//!
//! - `TILECACHE_CACHE_DIR` - Root directory of the disk tile cache (default: tile-cache)
//! - `TILECACHE_NO_DISK_CACHE` - Render every tile without touching the disk cache
//! - `TILECACHE_IMAGES` - Comma-separated `name=path` image sources
//! - `TILECACHE_IMAGES_DIR` - Directory scanned for source images
//! - `TILECACHE_TILE_SIZE` - Tile edge length in pixels (default: 256)
//! - `TILECACHE_DEFAULT_FORMAT` - Format outside the lossless tier (default: jpeg)
//! - `TILECACHE_LOSSLESS_FORMAT` - Format of the lossless tier (default: png)
//! - `TILECACHE_LOSSLESS_LEVELS` - Size of the lossless tier, -1 for all levels (default: 0)
//! - `TILECACHE_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `TILECACHE_HANDLE_EXPIRY` - Idle seconds before a decoder handle is closed (default: 600)
//! - `TILECACHE_SWEEP_INTERVAL` - Seconds between eviction sweeps (default: 60)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{DEFAULT_SLIDING_EXPIRATION, DEFAULT_SWEEP_INTERVAL};
use crate::source::{is_valid_image_name, ImageCatalog, DEFAULT_TILE_SIZE};
use crate::tile::{
    normalize_format, StoreLayout, TileFormat, TileFormatConfig, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default root directory of the disk cache.
pub const DEFAULT_CACHE_DIR: &str = "tile-cache";

/// Largest accepted tile edge length.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI Arguments
// =============================================================================

/// wsi-tile-cache - Tile rendering and disk caching for large images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tile-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Pre-generate every tile of one image, or of all images.
    Generate(GenerateArgs),

    /// Fetch a single tile through the cache.
    Tile(TileArgs),

    /// Delete cached tiles.
    Clear(ClearArgs),

    /// Show cached tile counts and sizes.
    Stats(StatsArgs),

    /// Show pyramid geometry of an image.
    Info(InfoArgs),
}

impl Command {
    /// Shared cache settings of any subcommand.
    pub fn config(&self) -> &CacheConfig {
        match self {
            Command::Generate(args) => &args.config,
            Command::Tile(args) => &args.config,
            Command::Clear(args) => &args.config,
            Command::Stats(args) => &args.config,
            Command::Info(args) => &args.config,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Image to generate; all registered images when omitted.
    pub name: Option<String>,

    /// Re-render tiles that are already cached.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    #[command(flatten)]
    pub config: CacheConfig,
}

#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    pub name: String,
    pub level: u32,
    pub col: u32,
    pub row: u32,

    /// Requested extension (jpg or png).
    #[arg(long, default_value = "jpg")]
    pub ext: String,

    /// Write the tile to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub config: CacheConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Image to clear; the whole cache when omitted.
    pub name: Option<String>,

    #[command(flatten)]
    pub config: CacheConfig,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Image to inspect; the whole cache when omitted.
    pub name: Option<String>,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub config: CacheConfig,
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    pub name: String,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub config: CacheConfig,
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    // =========================================================================
    // Disk Cache
    // =========================================================================
    /// Root directory of the disk tile cache.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "TILECACHE_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Render every tile without reading or writing the disk cache.
    #[arg(long, default_value_t = false, env = "TILECACHE_NO_DISK_CACHE")]
    pub no_disk_cache: bool,

    // =========================================================================
    // Image Sources
    // =========================================================================
    /// Image source as `name=path`. Repeatable.
    #[arg(long = "image", env = "TILECACHE_IMAGES", value_delimiter = ',')]
    pub images: Vec<String>,

    /// Directory scanned for .jpg/.jpeg/.png/.tif/.tiff files (name = file stem).
    #[arg(long, env = "TILECACHE_IMAGES_DIR")]
    pub images_dir: Option<PathBuf>,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILECACHE_TILE_SIZE")]
    pub tile_size: u32,

    /// Format for levels outside the lossless tier (jpeg, png, lossy, lossless, ...).
    #[arg(long, default_value = "jpeg", env = "TILECACHE_DEFAULT_FORMAT")]
    pub default_format: String,

    /// Format for the lossless tier; empty or "none" disables the tier.
    #[arg(long, default_value = "png", env = "TILECACHE_LOSSLESS_FORMAT")]
    pub lossless_format: String,

    /// Number of highest-resolution levels encoded losslessly; -1 for every level.
    #[arg(
        long,
        default_value_t = 0,
        allow_hyphen_values = true,
        env = "TILECACHE_LOSSLESS_LEVELS"
    )]
    pub lossless_levels: i32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILECACHE_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Handle Cache
    // =========================================================================
    /// Idle seconds before an open decoder handle is closed.
    #[arg(long, default_value_t = DEFAULT_SLIDING_EXPIRATION.as_secs(), env = "TILECACHE_HANDLE_EXPIRY")]
    pub handle_expiry: u64,

    /// Seconds between eviction sweeps.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs(), env = "TILECACHE_SWEEP_INTERVAL")]
    pub sweep_interval: u64,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.jpeg_quality < MIN_JPEG_QUALITY || self.jpeg_quality > MAX_JPEG_QUALITY {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.lossless_levels < -1 {
            return Err("lossless_levels must be -1 (all levels) or a non-negative count".to_string());
        }

        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if self.handle_expiry == 0 {
            return Err("handle_expiry must be greater than 0".to_string());
        }
        if self.sweep_interval == 0 {
            return Err("sweep_interval must be greater than 0".to_string());
        }

        if self.images.is_empty() && self.images_dir.is_none() {
            return Err(
                "No image sources. Set --image name=path (or TILECACHE_IMAGES) \
                 or --images-dir (or TILECACHE_IMAGES_DIR)"
                    .to_string(),
            );
        }
        for spec in &self.images {
            parse_image_spec(spec)?;
        }

        Ok(())
    }

    /// Normalize the textual format settings.
    pub fn format_config(&self) -> TileFormatConfig {
        TileFormatConfig {
            default_format: normalize_format(&self.default_format),
            lossless_format: lossless_format(&self.lossless_format),
            lossless_level_count: self.lossless_levels,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Build the image catalog from `--images-dir` and every `--image`.
    pub fn catalog(&self) -> Result<ImageCatalog, String> {
        let mut catalog = match &self.images_dir {
            Some(dir) => ImageCatalog::from_directory(dir).map_err(|e| e.to_string())?,
            None => ImageCatalog::new(),
        };
        for spec in &self.images {
            let (name, path) = parse_image_spec(spec)?;
            if !catalog.register(name.clone(), path) {
                return Err(format!("Image name '{}' registered twice", name));
            }
        }
        if catalog.is_empty() {
            return Err("No images found in the configured sources".to_string());
        }
        Ok(catalog)
    }

    /// Store layout for a catalog of `image_count` images.
    pub fn layout(&self, image_count: usize) -> StoreLayout {
        if image_count == 1 {
            StoreLayout::SingleImage
        } else {
            StoreLayout::PerImage
        }
    }

    pub fn handle_expiry(&self) -> Duration {
        Duration::from_secs(self.handle_expiry)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

fn lossless_format(value: &str) -> Option<TileFormat> {
    let value = value.trim();
    if value.is_empty() || ["none", "off"].iter().any(|v| value.eq_ignore_ascii_case(v)) {
        None
    } else {
        Some(normalize_format(value))
    }
}

/// Split a `name=path` image source.
pub fn parse_image_spec(spec: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = spec
        .split_once('=')
        .ok_or_else(|| format!("Invalid image source '{}': expected name=path", spec))?;
    let name = name.trim();
    let path = path.trim();
    if name.is_empty() || path.is_empty() {
        return Err(format!("Invalid image source '{}': expected name=path", spec));
    }
    if !is_valid_image_name(name) {
        return Err(format!(
            "Invalid image name '{}': must be a single path segment",
            name
        ));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

// =============================================================================
// Tests
// =============================================================================

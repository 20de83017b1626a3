//! Tile output formats and the per-level format policy.
//!
//! Tiles are encoded either as JPEG (lossy, small) or PNG (lossless). The
//! policy lets the highest-resolution levels of the pyramid be served
//! losslessly while the overview levels stay lossy.
//!
//! Textual format settings are normalized once when configuration is loaded;
//! everything downstream works with the closed [`TileFormat`] enum.

use std::fmt;

use serde::Serialize;

use super::encoder::DEFAULT_JPEG_QUALITY;

// =============================================================================
// TileFormat
// =============================================================================

/// Encoded tile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    /// Lossy JPEG
    Jpeg,
    /// Lossless PNG
    Png,
}

impl TileFormat {
    /// All formats, used when scanning the store.
    pub const ALL: [TileFormat; 2] = [TileFormat::Jpeg, TileFormat::Png];

    /// File extension used in the tile store (without dot).
    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }

    /// MIME type for HTTP responses.
    pub fn content_type(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, TileFormat::Png)
    }

    /// Strictly parse a file extension; `None` if it is not a tile format.
    ///
    /// Used for request paths, where an unknown extension is an error rather
    /// than a silent fallback.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            "png" => Some(TileFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Map a configured format name to a [`TileFormat`].
///
/// Accepts extensions, MIME types and the words `lossy`/`lossless`, ignoring
/// case, surrounding whitespace and a leading dot. Anything else is JPEG.
pub fn normalize_format(text: &str) -> TileFormat {
    let normalized = text.trim().trim_start_matches('.').to_ascii_lowercase();
    match normalized.as_str() {
        "png" | "image/png" | "lossless" => TileFormat::Png,
        _ => TileFormat::Jpeg,
    }
}

// =============================================================================
// TileFormatConfig
// =============================================================================

/// Normalized format settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFormatConfig {
    /// Format for levels outside the lossless tier
    pub default_format: TileFormat,

    /// Format for the lossless tier; `None` disables the tier
    pub lossless_format: Option<TileFormat>,

    /// Size of the lossless tier counted from the highest-resolution level.
    /// `0` disables it, `-1` makes every level lossless.
    pub lossless_level_count: i32,

    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl TileFormatConfig {
    /// Configuration with a lossless tier of `levels` levels.
    pub fn with_lossless_levels(levels: i32) -> Self {
        Self {
            lossless_format: Some(TileFormat::Png),
            lossless_level_count: levels,
            ..Self::default()
        }
    }
}

impl Default for TileFormatConfig {
    fn default() -> Self {
        Self {
            default_format: TileFormat::Jpeg,
            lossless_format: None,
            lossless_level_count: 0,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Pick the output format for a pyramid level.
///
/// Levels are numbered from the lowest resolution (0) to the highest
/// (`total_levels - 1`).
pub fn select_format(level: u32, total_levels: u32, config: &TileFormatConfig) -> TileFormat {
    let Some(lossless) = config.lossless_format else {
        return config.default_format;
    };

    match config.lossless_level_count {
        0 => config.default_format,
        n if n < 0 => lossless,
        n => {
            let first_lossless = total_levels.saturating_sub(n as u32);
            if level >= first_lossless {
                lossless
            } else {
                config.default_format
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

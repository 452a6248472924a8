use serde::{Deserialize, Serialize};

use crate::epub::DEFAULT_MAX_ENTRY_BYTES;
use crate::queue::{CollisionPolicy, DestinationPolicy};
use crate::render::{FontSource, PageSize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default = "default_true")]
    pub title_page: bool,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            worker_count: default_worker_count(),
            output: OutputConfig::default(),
            page: PageConfig::default(),
            images: ImagesConfig::default(),
            title_page: true,
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logical CPUs, kept between 2 and 4: rendering is memory hungry and a
/// desktop machine stays responsive.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(2, 4)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub destination: DestinationPolicy,
    #[serde(default)]
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default)]
    pub size: PageSize,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_line_height")]
    pub line_height: f32,
    /// Font for text outside WinAnsi.
    #[serde(default)]
    pub fallback_font: FontSource,
}

fn default_font_size() -> f32 {
    11.0
}

fn default_line_height() -> f32 {
    1.6
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            size: PageSize::default(),
            font_size: default_font_size(),
            line_height: default_line_height(),
            fallback_font: FontSource::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_max_width() -> u32 {
    1200
}

fn default_jpeg_quality() -> u8 {
    85
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest decompressed size accepted for a single archive entry.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

fn default_max_entry_bytes() -> u64 {
    DEFAULT_MAX_ENTRY_BYTES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `info` or `epubpress=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

//! Configuration loading for photoid
//!
//! Provides TOML-backed configuration with the following resolution order for
//! the config file path:
//! 1. Explicit path (highest priority)
//! 2. `PHOTOID_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/photoid/photoid.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is never fatal: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PHOTOID_CONFIG";

/// Environment variable carrying the vision service API key
pub const API_KEY_ENV: &str = "PHOTOID_API_KEY";

/// Default OpenAI-compatible endpoint
pub const DEFAULT_VISION_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision-capable model
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";

/// Top-level TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// External vision service configuration
    pub vision: VisionConfig,
    /// Default per-run pipeline tunables
    pub pipeline: PipelineDefaults,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error) or a full filter directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// External vision service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Base URL of the chat-completions API
    pub base_url: String,
    /// API key (prefer the PHOTOID_API_KEY environment variable)
    pub api_key: Option<String>,
    /// Model name used for detection, identification and validation
    pub model: String,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    /// Minimum spacing between consecutive requests, in milliseconds (0 = none)
    pub min_request_interval_ms: u64,
    /// Image detail level sent with each image ("low", "high", "auto")
    pub image_detail: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_VISION_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_VISION_MODEL.to_string(),
            request_timeout_secs: 30,
            min_request_interval_ms: 0,
            image_detail: "high".to_string(),
        }
    }
}

/// Default pipeline tunables
///
/// Every field is optional; unset fields fall back to the pipeline's
/// compiled defaults when the caller builds its per-run options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    pub category_hint: Option<String>,
    pub max_items: Option<usize>,
    pub concurrency: Option<usize>,
    pub identify_timeout_ms: Option<u64>,
    pub validate_timeout_ms: Option<u64>,
    pub run_timeout_ms: Option<u64>,
    pub retain_crops: Option<bool>,
    pub iou_threshold: Option<f32>,
    pub crop_padding: Option<f32>,
    pub identify_retries: Option<u32>,
}

/// Resolve the config file path
///
/// Returns `None` when no candidate file exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: explicit path
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    dirs::config_dir()
        .map(|d| d.join("photoid").join("photoid.toml"))
        .filter(|p| p.exists())
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

/// Load configuration with graceful degradation
///
/// Missing or unreadable files produce a warning and compiled defaults.
/// A file that exists but fails to parse is an error: silently ignoring a
/// malformed config hides typos in production settings.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(explicit) else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using compiled defaults");
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(&path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Resolve the vision API key
///
/// **Priority:** ENV → TOML
pub fn resolve_api_key(vision: &VisionConfig) -> Result<String> {
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = vision.api_key.as_ref().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "Vision API key found in both {} and TOML config. Using environment (highest priority).",
            API_KEY_ENV
        );
    }

    if let Some(key) = env_key {
        info!("Vision API key loaded from environment variable");
        return Ok(key);
    }

    if let Some(key) = toml_key {
        info!("Vision API key loaded from TOML config");
        return Ok(key.clone());
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Set {} or add api_key under [vision] in photoid.toml",
        API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

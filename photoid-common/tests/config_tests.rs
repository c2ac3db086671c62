//! Unit tests for configuration loading and graceful degradation
//!
//! Covers:
//! - Missing TOML files fall back to compiled defaults
//! - Config path priority (explicit → PHOTOID_CONFIG → platform dir)
//! - API key priority (ENV → TOML)
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate PHOTOID_CONFIG or PHOTOID_API_KEY are marked with
//! #[serial] so they run sequentially.

use photoid_common::config::{
    load_config, resolve_api_key, resolve_config_path, LogFormat, TomlConfig, VisionConfig,
    API_KEY_ENV, CONFIG_PATH_ENV,
};
use photoid_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("photoid.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_missing_explicit_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let config = load_config(Some(&missing)).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_explicit_path_wins_over_env() {
    let temp_dir = TempDir::new().unwrap();
    let explicit = write_config(&temp_dir, "[logging]\nlevel = \"debug\"\n");
    env::set_var(CONFIG_PATH_ENV, "/tmp/photoid-other.toml");

    let resolved = resolve_config_path(Some(&explicit));
    env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(resolved, Some(explicit));
}

#[test]
#[serial]
fn test_env_path_used_when_no_explicit_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
        [logging]
        level = "warn"
        format = "json"

        [pipeline]
        max_items = 5
        iou_threshold = 0.5
        "#,
    );
    env::set_var(CONFIG_PATH_ENV, &path);

    let config = load_config(None);
    env::remove_var(CONFIG_PATH_ENV);

    let config = config.unwrap();
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.pipeline.max_items, Some(5));
    assert_eq!(config.pipeline.iou_threshold, Some(0.5));
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "[vision\nmodel = ");

    let result = load_config(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_api_key_env_takes_priority() {
    env::set_var(API_KEY_ENV, "env-key");
    let vision = VisionConfig {
        api_key: Some("toml-key".to_string()),
        ..VisionConfig::default()
    };

    let key = resolve_api_key(&vision);
    env::remove_var(API_KEY_ENV);

    assert_eq!(key.unwrap(), "env-key");
}

#[test]
#[serial]
fn test_api_key_falls_back_to_toml() {
    env::remove_var(API_KEY_ENV);
    let vision = VisionConfig {
        api_key: Some("toml-key".to_string()),
        ..VisionConfig::default()
    };

    assert_eq!(resolve_api_key(&vision).unwrap(), "toml-key");
}

#[test]
#[serial]
fn test_missing_api_key_is_config_error() {
    env::set_var(API_KEY_ENV, "   ");
    let vision = VisionConfig {
        api_key: Some(String::new()),
        ..VisionConfig::default()
    };

    let result = resolve_api_key(&vision);
    env::remove_var(API_KEY_ENV);

    assert!(matches!(result, Err(Error::Config(_))));
}

//! Config file loading against real files.

use std::fs;

use tempfile::TempDir;
use tlx_config::resolve::read_config_file;
use tlx_config::{load_config, validate, ConfigError, ConfigSource};

#[test]
fn test_load_explicit_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exporter.json");
    fs::write(
        &path,
        r#"{
            "endpoint": "http://127.0.0.1:9000/v2/track",
            "max_batch_items": 2000,
            "flush_interval_secs": 10,
            "throttling_enabled": false
        }"#,
    )
    .unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.source, ConfigSource::CliArgument);
    assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
    // clamped to the upper limit
    assert_eq!(loaded.config.max_batch_items, 1000);
    assert_eq!(loaded.config.flush_interval_secs, 10);
    assert!(!loaded.config.throttling_enabled);
}

#[test]
fn test_missing_explicit_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert_eq!(err.code(), 60);
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exporter.json");
    fs::write(&path, "{ not json").unwrap();

    let err = read_config_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(err.code(), 61);
}

#[test]
fn test_wrong_type_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exporter.json");
    fs::write(&path, r#"{"max_batch_items": "many"}"#).unwrap();

    assert!(matches!(
        read_config_file(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_invalid_endpoint_rejected_after_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exporter.json");
    fs::write(&path, r#"{"endpoint": "udp://collector:4000"}"#).unwrap();

    let cfg = read_config_file(&path).unwrap();
    let err = validate(&cfg).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert_eq!(err.code(), 13);
}

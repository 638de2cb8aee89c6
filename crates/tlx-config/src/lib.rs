//! tlx exporter configuration.
//!
//! This crate provides:
//! - The typed `ExporterConfig` with built-in defaults
//! - Config file resolution (CLI → env → XDG → defaults)
//! - Environment overrides for individual settings
//! - Limits enforcement and validation

pub mod config;
pub mod resolve;
pub mod validate;

pub use config::ExporterConfig;
pub use resolve::{load_config, resolve_config_path, ConfigSource, LoadedConfig};
pub use validate::{validate, ConfigError, ConfigResult};

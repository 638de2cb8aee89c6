//! Configuration resolution and loading.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! defaults. Individual settings can then be overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};

use crate::config::{ExporterConfig, APP_NAME};
use crate::validate::{validate, ConfigError, ConfigResult};

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// A validated configuration together with its origin.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ExporterConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

const ENV_CONFIG_PATH: &str = "TLX_CONFIG";
const ENV_CONFIG_DIR: &str = "TLX_CONFIG_DIR";
const CONFIG_FILENAME: &str = "exporter.json";

/// Locate the configuration file.
///
/// 1. Explicit CLI path (used even if missing, so the read error surfaces)
/// 2. `TLX_CONFIG`
/// 3. `TLX_CONFIG_DIR` + `exporter.json`
/// 4. XDG config directory (`~/.config/tlx/exporter.json`)
/// 5. Built-in defaults (None)
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(xdg_config) = dirs::config_dir() {
        let path = xdg_config.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Resolve, read, apply environment overrides and validate.
pub fn load_config(cli_path: Option<&Path>) -> ConfigResult<LoadedConfig> {
    let (path, source) = resolve_config_path(cli_path);
    let mut config = match &path {
        Some(p) => read_config_file(p)?,
        None => ExporterConfig::default(),
    };
    apply_env_overrides(&mut config);
    let config = validate(&config)?;

    debug!(
        source = %source,
        path = ?path,
        endpoint = %config.endpoint,
        "exporter config loaded"
    );
    Ok(LoadedConfig {
        config,
        path,
        source,
    })
}

/// Parse a JSON config file. No validation is applied.
pub fn read_config_file(path: &Path) -> ConfigResult<ExporterConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse configuration JSON text.
pub fn parse_config(content: &str) -> Result<ExporterConfig, String> {
    serde_json::from_str(content).map_err(|e| e.to_string())
}

/// Apply `TLX_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut ExporterConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_from<F>(config: &mut ExporterConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TLX_ENDPOINT") {
        config.endpoint = v;
    }
    override_parsed(&lookup, "TLX_MAX_BATCH_ITEMS", &mut config.max_batch_items);
    override_parsed(
        &lookup,
        "TLX_FLUSH_INTERVAL_SECS",
        &mut config.flush_interval_secs,
    );
    override_parsed(
        &lookup,
        "TLX_MAX_INSTANT_RETRIES",
        &mut config.max_instant_retries,
    );
    override_bool(&lookup, "TLX_THROTTLING", &mut config.throttling_enabled);
    if let Some(v) = lookup("TLX_STORAGE_DIR") {
        if !v.is_empty() {
            config.storage_dir = Some(PathBuf::from(v));
        }
    }
    override_parsed(
        &lookup,
        "TLX_STORAGE_CAPACITY_MB",
        &mut config.storage_capacity_mb,
    );
    override_bool(&lookup, "TLX_DEVELOPER_MODE", &mut config.developer_mode);
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(var = key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn override_bool<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        _ => warn!(var = key, value = %raw, "ignoring unparseable environment override"),
    }
}

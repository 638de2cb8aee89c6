//! Configuration errors and limits enforcement.

use std::path::PathBuf;

use thiserror::Error;
use tlx_common::ConfigurationError;
use tracing::warn;

use crate::config::*;

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

impl ConfigError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ConfigError::Io { .. } => 60,
            ConfigError::Parse { .. } => 61,
            ConfigError::Invalid(inner) => inner.code(),
        }
    }
}

/// Validate a configuration and return it with every bounded setting
/// moved into range.
///
/// Zero batch size, zero flush interval and a malformed endpoint are hard
/// errors. Every other out-of-range value is replaced by its closest limit
/// and logged.
pub fn validate(config: &ExporterConfig) -> ConfigResult<ExporterConfig> {
    let mut cfg = config.clone();

    validate_endpoint(&cfg.endpoint)?;

    if cfg.max_batch_items == 0 {
        return Err(ConfigurationError::ZeroCapacity.into());
    }
    if cfg.flush_interval_secs == 0 {
        return Err(ConfigurationError::ZeroTimeout.into());
    }

    cfg.max_batch_items = clamp("max_batch_items", cfg.max_batch_items, MAX_BATCH_ITEMS_LIMITS);
    cfg.flush_interval_secs = clamp(
        "flush_interval_secs",
        cfg.flush_interval_secs,
        FLUSH_INTERVAL_SECS_LIMITS,
    );
    cfg.max_instant_retries = clamp(
        "max_instant_retries",
        cfg.max_instant_retries,
        MAX_INSTANT_RETRIES_LIMITS,
    );
    cfg.storage_capacity_mb = clamp(
        "storage_capacity_mb",
        cfg.storage_capacity_mb,
        STORAGE_CAPACITY_MB_LIMITS,
    );
    cfg.request_timeout_secs = clamp(
        "request_timeout_secs",
        cfg.request_timeout_secs,
        REQUEST_TIMEOUT_SECS_LIMITS,
    );
    cfg.network_workers = clamp("network_workers", cfg.network_workers, NETWORK_WORKERS_LIMITS);
    cfg.replay_interval_ms = clamp(
        "replay_interval_ms",
        cfg.replay_interval_ms,
        REPLAY_INTERVAL_MS_LIMITS,
    );
    cfg.max_replays_in_flight = clamp(
        "max_replays_in_flight",
        cfg.max_replays_in_flight,
        MAX_REPLAYS_IN_FLIGHT_LIMITS,
    );

    Ok(cfg)
}

/// Check that the endpoint is an absolute http(s) URL with a host.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| invalid("scheme must be http or https"))?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if host.chars().any(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }
    Ok(())
}

fn clamp<T>(field: &str, value: T, (min, max): (T, T)) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        return value;
    };
    warn!(
        field,
        value = %value,
        clamped = %clamped,
        "config value out of range, using closest limit"
    );
    clamped
}

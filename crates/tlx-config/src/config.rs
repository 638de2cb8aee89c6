//! Typed exporter configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application name used for XDG and data directories.
pub const APP_NAME: &str = "tlx";

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/v2/track";
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_INSTANT_RETRIES: u32 = 3;
pub const DEFAULT_STORAGE_CAPACITY_MB: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_NETWORK_WORKERS: usize = 2;
pub const DEFAULT_REPLAY_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_REPLAYS_IN_FLIGHT: usize = 4;

/// Inclusive `(min, max)` limits. Out-of-range values are moved to the
/// closest limit during validation.
pub const MAX_BATCH_ITEMS_LIMITS: (usize, usize) = (1, 1000);
pub const FLUSH_INTERVAL_SECS_LIMITS: (u64, u64) = (1, 300);
pub const MAX_INSTANT_RETRIES_LIMITS: (u32, u32) = (0, 9);
pub const STORAGE_CAPACITY_MB_LIMITS: (u64, u64) = (1, 1000);
pub const REQUEST_TIMEOUT_SECS_LIMITS: (u64, u64) = (1, 600);
pub const NETWORK_WORKERS_LIMITS: (usize, usize) = (1, 16);
pub const REPLAY_INTERVAL_MS_LIMITS: (u64, u64) = (50, 60_000);
pub const MAX_REPLAYS_IN_FLIGHT_LIMITS: (usize, usize) = (1, 9);

/// Exporter configuration. Every field has a default, so an empty JSON
/// object is a valid config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Ingestion endpoint (http or https).
    pub endpoint: String,

    /// Records per batch before an immediate flush.
    pub max_batch_items: usize,

    /// Seconds a non-empty batch may wait before it is flushed.
    pub flush_interval_secs: u64,

    /// Immediate in-process retries before entering backoff.
    pub max_instant_retries: u32,

    /// Honor server throttling and backoff suspensions.
    pub throttling_enabled: bool,

    /// Overflow store directory. `None` means the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// Overflow store capacity in megabytes.
    pub storage_capacity_mb: u64,

    /// Connect/read timeout for a single request.
    pub request_timeout_secs: u64,

    /// Network output worker threads.
    pub network_workers: usize,

    /// How often the loader rescans the store.
    pub replay_interval_ms: u64,

    /// Replays allowed in flight at once.
    pub max_replays_in_flight: usize,

    /// Send every record on its own and echo it to the log.
    pub developer_mode: bool,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_batch_items: DEFAULT_MAX_BATCH_ITEMS,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            max_instant_retries: DEFAULT_MAX_INSTANT_RETRIES,
            throttling_enabled: true,
            storage_dir: None,
            storage_capacity_mb: DEFAULT_STORAGE_CAPACITY_MB,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            network_workers: DEFAULT_NETWORK_WORKERS,
            replay_interval_ms: DEFAULT_REPLAY_INTERVAL_MS,
            max_replays_in_flight: DEFAULT_MAX_REPLAYS_IN_FLIGHT,
            developer_mode: false,
        }
    }
}

impl ExporterConfig {
    /// Batch size actually used by the buffer. Developer mode sends every
    /// record immediately.
    pub fn effective_batch_items(&self) -> usize {
        if self.developer_mode {
            1
        } else {
            self.max_batch_items
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    pub fn storage_capacity_bytes(&self) -> u64 {
        self.storage_capacity_mb.saturating_mul(1024 * 1024)
    }

    /// Overflow store directory, falling back to
    /// `<data_local_dir>/tlx/transmissions` (or the temp dir when the
    /// platform has no data directory).
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
        .join("transmissions")
}

//! Producer-facing channel: a buffer in front of a transmitter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tlx_common::{ConfigurationError, TelemetryRecord};
use tlx_config::{ConfigError, ExporterConfig};
use tlx_store::{DiskStore, StoreError, StoreStats};
use tracing::{info, trace};

use crate::buffer::TelemetryBuffer;
use crate::loader::LoaderSettings;
use crate::output::{HttpOutput, TransmissionOutput};
use crate::policy::{BackoffSchedule, PolicySettings, PolicyState};
use crate::transmitter::{Transmitter, TransmitterSettings};

/// Log the running total every this many records.
pub const PROGRESS_EVERY: u64 = 10_000;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("overflow store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to start background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ChannelError {
    pub fn code(&self) -> u32 {
        match self {
            ChannelError::Configuration(e) => e.code(),
            ChannelError::Config(e) => e.code(),
            ChannelError::Store(e) => e.code(),
            ChannelError::Spawn(_) => 80,
        }
    }
}

/// Accepts records from any number of threads and ships them in the
/// background. `send` never blocks on I/O.
pub struct TelemetryChannel<T = TelemetryRecord> {
    buffer: TelemetryBuffer<T>,
    transmitter: Arc<Transmitter<T>>,
    developer_mode: bool,
    sent: AtomicU64,
    stopped: AtomicBool,
}

impl<T: Serialize + Send + 'static> TelemetryChannel<T> {
    /// Build a channel that posts to the configured endpoint.
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ChannelError> {
        let config = tlx_config::validate(config)?;
        let store = Arc::new(DiskStore::open(
            config.storage_dir(),
            config.storage_capacity_bytes(),
        )?);
        let output = Arc::new(HttpOutput::new(config.endpoint.clone(), config.request_timeout()));
        Self::assemble(&config, output, store)
    }

    /// Build a channel around an arbitrary network output and store.
    pub fn with_output(
        config: &ExporterConfig,
        output: Arc<dyn TransmissionOutput>,
        store: Arc<DiskStore>,
    ) -> Result<Self, ChannelError> {
        let config = tlx_config::validate(config)?;
        Self::assemble(&config, output, store)
    }

    fn assemble(
        config: &ExporterConfig,
        output: Arc<dyn TransmissionOutput>,
        store: Arc<DiskStore>,
    ) -> Result<Self, ChannelError> {
        let transmitter = Arc::new(Transmitter::start(output, store, settings_for(config))?);
        let buffer = TelemetryBuffer::builder()
            .with_max_items(config.effective_batch_items())
            .with_timeout(config.flush_interval())
            .with_target(transmitter.clone())
            .build()?;

        info!(
            endpoint = %config.endpoint,
            max_batch_items = config.effective_batch_items(),
            flush_interval_secs = config.flush_interval_secs,
            developer_mode = config.developer_mode,
            "telemetry channel ready"
        );

        Ok(TelemetryChannel {
            buffer,
            transmitter,
            developer_mode: config.developer_mode,
            sent: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    /// Queue a record. Ignored once the channel is stopped.
    pub fn send(&self, record: T) {
        if self.stopped.load(Ordering::SeqCst) {
            trace!("channel stopped, record ignored");
            return;
        }
        if self.developer_mode {
            if let Ok(line) = serde_json::to_string(&record) {
                trace!(record = %line, "record queued");
            }
        }
        self.buffer.add(record);

        let total = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if total % PROGRESS_EVERY == 0 {
            info!(total, "records queued");
        }
    }

    /// Hand the current batch to the transmitter without waiting for the
    /// flush interval.
    pub fn flush(&self) {
        self.buffer.flush();
    }

    /// Flush and shut down within `timeout`. Later calls return true
    /// without doing anything.
    pub fn stop(&self, timeout: Duration) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.buffer.flush();
        let settled = self.transmitter.stop(timeout);
        info!(total = self.sent.load(Ordering::Relaxed), settled, "telemetry channel stopped");
        settled
    }

    /// Records accepted so far.
    pub fn records_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn policy_state(&self) -> PolicyState {
        self.transmitter.policy_state()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.transmitter.store_stats()
    }
}

fn settings_for(config: &ExporterConfig) -> TransmitterSettings {
    TransmitterSettings {
        policy: PolicySettings {
            max_instant_retries: config.max_instant_retries,
            throttling_enabled: config.throttling_enabled,
            backoff: BackoffSchedule::default(),
        },
        loader: LoaderSettings {
            interval: config.replay_interval(),
            max_in_flight: config.max_replays_in_flight,
        },
        network_workers: config.network_workers,
        ..TransmitterSettings::default()
    }
}

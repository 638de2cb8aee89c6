//! Transmitter: owns the background machinery behind a buffer.
//!
//! Deferred flushes run on the [`Scheduler`]; batches are serialized on a
//! small send stage and handed to the [`PolicyDispatcher`]; the
//! [`DiskLoader`] replays whatever had to be persisted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tlx_store::{DiskStore, StoreStats};
use tracing::{debug, info, warn};

use crate::dispatcher::{PolicyDispatcher, TransmissionDispatcher};
use crate::loader::{DiskLoader, LoaderSettings};
use crate::output::active::{DISK_QUEUE_CAPACITY, NETWORK_QUEUE_CAPACITY};
use crate::output::{ActiveDiskOutput, ActiveNetworkOutput, DiskOutput, TransmissionOutput};
use crate::policy::{PolicyManager, PolicySettings, PolicyState, PolicyView};
use crate::scheduler::{instant_after, Scheduler};
use crate::serializer::{GzipSerializer, TelemetrySerializer};
use crate::worker::{WorkerContext, WorkerPool};

/// Deferred batch pull handed to [`TelemetriesTransmitter::schedule_send`].
pub type Fetcher<T> = Box<dyn FnOnce() -> Vec<T> + Send>;

/// What a buffer needs from whoever sends its batches.
pub trait TelemetriesTransmitter<T>: Send + Sync {
    /// Run `fetch` once after `delay` and send whatever it returns.
    /// Returns false if the request could not be accepted.
    fn schedule_send(&self, fetch: Fetcher<T>, delay: Duration) -> bool;

    /// Accept a batch for asynchronous sending. Returns false if it was
    /// refused; true is not a delivery confirmation.
    fn send_now(&self, batch: Vec<T>) -> bool;
}

pub const SEND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TransmitterSettings {
    pub policy: PolicySettings,
    pub loader: LoaderSettings,
    pub network_workers: usize,
    pub network_queue: usize,
    pub disk_queue: usize,
    pub send_queue: usize,
}

impl Default for TransmitterSettings {
    fn default() -> Self {
        TransmitterSettings {
            policy: PolicySettings::default(),
            loader: LoaderSettings::default(),
            network_workers: 2,
            network_queue: NETWORK_QUEUE_CAPACITY,
            disk_queue: DISK_QUEUE_CAPACITY,
            send_queue: SEND_QUEUE_CAPACITY,
        }
    }
}

struct Pipeline<T> {
    serializer: Box<dyn TelemetrySerializer<T>>,
    dispatcher: Arc<PolicyDispatcher>,
}

impl<T> Pipeline<T> {
    fn process(&self, batch: Vec<T>) {
        let items = batch.len();
        match self.serializer.serialize(&batch) {
            Some(transmission) => {
                debug!(
                    items,
                    bytes = transmission.len(),
                    transmission_id = %transmission.id().short(),
                    "batch serialized"
                );
                self.dispatcher.dispatch(transmission);
            }
            None => warn!(items, "batch produced no payload"),
        }
    }
}

/// Queue a batch on the send stage, serializing on the caller's thread
/// when the stage is saturated.
fn enqueue<T: Send + 'static>(stage: &WorkerPool<Vec<T>>, pipeline: &Pipeline<T>, batch: Vec<T>) -> bool {
    match stage.submit(batch) {
        Ok(()) => true,
        Err(batch) if !stage.is_closed() => {
            debug!(items = batch.len(), "send stage saturated, serializing inline");
            pipeline.process(batch);
            true
        }
        Err(batch) => {
            warn!(items = batch.len(), "send stage closed, batch refused");
            false
        }
    }
}

pub struct Transmitter<T> {
    scheduler: Scheduler,
    stage: Arc<WorkerPool<Vec<T>>>,
    pipeline: Arc<Pipeline<T>>,
    loader: DiskLoader,
    policy: PolicyView,
    store: Arc<DiskStore>,
    stopped: AtomicBool,
}

impl<T: Serialize + Send + 'static> Transmitter<T> {
    /// Start a transmitter that gzips batches as JSON lines.
    pub fn start(
        output: Arc<dyn TransmissionOutput>,
        store: Arc<DiskStore>,
        settings: TransmitterSettings,
    ) -> std::io::Result<Self> {
        Self::start_with(output, store, settings, Box::new(GzipSerializer))
    }
}

impl<T: Send + 'static> Transmitter<T> {
    pub fn start_with(
        output: Arc<dyn TransmissionOutput>,
        store: Arc<DiskStore>,
        settings: TransmitterSettings,
        serializer: Box<dyn TelemetrySerializer<T>>,
    ) -> std::io::Result<Self> {
        let policy = Arc::new(PolicyManager::new(settings.policy));
        let view = policy.view();

        let disk = ActiveDiskOutput::spawn(DiskOutput::new(store.clone()), settings.disk_queue)?;
        let network = ActiveNetworkOutput::spawn(
            output,
            policy,
            disk.clone(),
            settings.network_workers.max(1),
            settings.network_queue,
        )?;
        let dispatcher = Arc::new(PolicyDispatcher::new(view.clone(), network, disk));

        let pipeline = Arc::new(Pipeline {
            serializer,
            dispatcher: dispatcher.clone(),
        });
        let stage = {
            let pipeline = pipeline.clone();
            WorkerPool::spawn(
                "tlx-send",
                1,
                settings.send_queue,
                move |batch: Vec<T>, _ctx: &WorkerContext| pipeline.process(batch),
            )?
        };

        let loader = DiskLoader::start(store.clone(), dispatcher, view.clone(), settings.loader)?;
        let scheduler = Scheduler::start("tlx-scheduler")?;

        info!(
            network_workers = settings.network_workers.max(1),
            max_instant_retries = settings.policy.max_instant_retries,
            throttling_enabled = settings.policy.throttling_enabled,
            "transmitter started"
        );

        Ok(Transmitter {
            scheduler,
            stage: Arc::new(stage),
            pipeline,
            loader,
            policy: view,
            store,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn policy(&self) -> &PolicyView {
        &self.policy
    }

    pub fn policy_state(&self) -> PolicyState {
        self.policy.current()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Shut down within `timeout`.
    ///
    /// Pending deferred flushes run first, then the send stage and outputs
    /// drain until the deadline. Returns true if everything settled in
    /// time; otherwise unsettled work is abandoned.
    pub fn stop(&self, timeout: Duration) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return true;
        }
        let deadline = instant_after(Instant::now(), timeout);
        info!(?timeout, "stopping transmitter");

        self.scheduler.shutdown();
        let stage = self.stage.shutdown(deadline);
        let outputs = self.pipeline.dispatcher.shutdown(deadline);
        self.loader.stop();

        let settled = stage && outputs;
        let stats = self.store.stats();
        if settled {
            info!(stored = stats.entries, "transmitter stopped");
        } else {
            warn!(stored = stats.entries, "transmitter stopped before all work settled");
        }
        settled
    }
}

impl<T: Send + 'static> TelemetriesTransmitter<T> for Transmitter<T> {
    fn schedule_send(&self, fetch: Fetcher<T>, delay: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        let stage = self.stage.clone();
        let pipeline = self.pipeline.clone();
        self.scheduler.schedule(
            Box::new(move || {
                let batch = fetch();
                if !batch.is_empty() {
                    enqueue(&stage, &pipeline, batch);
                }
            }),
            delay,
        )
    }

    fn send_now(&self, batch: Vec<T>) -> bool {
        if batch.is_empty() || self.is_stopped() {
            return false;
        }
        enqueue(&self.stage, &self.pipeline, batch)
    }
}

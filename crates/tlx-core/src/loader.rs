//! Replays persisted transmissions once the network may be used again.
//!
//! A single loader thread claims the oldest entries from the store, hands
//! them to the dispatcher with a receipt, and keeps each entry on disk
//! until the receipt reports it delivered or permanently rejected. Claimed
//! entries are never handed out twice.

use std::collections::HashSet;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tlx_store::{DiskStore, EntryId, StoreError};
use tracing::{debug, info, warn};

use crate::delivery::{Delivery, DeliveryOutcome, Receipt};
use crate::dispatcher::TransmissionDispatcher;
use crate::policy::PolicyView;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct LoaderSettings {
    /// Pause between replay passes.
    pub interval: Duration,
    /// Upper bound on replayed entries awaiting an outcome.
    pub max_in_flight: usize,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        LoaderSettings {
            interval: Duration::from_millis(2000),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

enum Signal {
    Wake,
    Settled(EntryId, DeliveryOutcome),
    Stop,
}

pub struct DiskLoader {
    signals: Sender<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiskLoader {
    pub fn start(
        store: Arc<DiskStore>,
        dispatcher: Arc<dyn TransmissionDispatcher>,
        policy: PolicyView,
        settings: LoaderSettings,
    ) -> std::io::Result<Self> {
        let (signals, inbox) = mpsc::channel();

        let wake = signals.clone();
        policy.subscribe(move |state| {
            if state.permits_network() {
                let _ = wake.send(Signal::Wake);
            }
        });

        let mut replay = Replay {
            store,
            dispatcher,
            policy,
            max_in_flight: settings.max_in_flight.max(1),
            signals: signals.clone(),
            in_flight: HashSet::new(),
        };
        let interval = settings.interval;
        let handle = thread::Builder::new()
            .name("tlx-loader".to_string())
            .spawn(move || {
                debug!(?interval, "disk loader started");
                replay.pass();
                loop {
                    match inbox.recv_timeout(interval) {
                        Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(Signal::Settled(entry, outcome)) => {
                            if replay.settle(entry, outcome) {
                                replay.pass();
                            }
                        }
                        Ok(Signal::Wake) | Err(RecvTimeoutError::Timeout) => replay.pass(),
                    }
                }
                debug!(in_flight = replay.in_flight.len(), "disk loader stopped");
            })?;

        Ok(DiskLoader {
            signals,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run a replay pass now instead of waiting for the interval.
    pub fn wake(&self) {
        let _ = self.signals.send(Signal::Wake);
    }

    /// Stop the loader thread. Entries still in flight stay on disk.
    pub fn stop(&self) {
        let _ = self.signals.send(Signal::Stop);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("disk loader thread panicked");
            }
        }
    }
}

impl Drop for DiskLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Replay {
    store: Arc<DiskStore>,
    dispatcher: Arc<dyn TransmissionDispatcher>,
    policy: PolicyView,
    max_in_flight: usize,
    signals: Sender<Signal>,
    in_flight: HashSet<EntryId>,
}

impl Replay {
    fn pass(&mut self) {
        if !self.policy.permits_network() {
            return;
        }
        let room = self.max_in_flight.saturating_sub(self.in_flight.len());
        if room == 0 {
            return;
        }
        let entries = match self.store.oldest(room, &self.in_flight) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to list stored transmissions");
                return;
            }
        };
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "replaying stored transmissions");

        for entry in entries {
            let transmission = match self.store.load(&entry) {
                Ok(t) => t,
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(entry = %entry, error = %e, "discarding unreadable stored transmission");
                    if let Err(e) = self.store.remove(&entry) {
                        warn!(entry = %entry, error = %e, "failed to remove unreadable entry");
                    }
                    continue;
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "failed to load stored transmission");
                    continue;
                }
            };

            self.in_flight.insert(entry.clone());
            let signals = self.signals.clone();
            let settled = entry.clone();
            let receipt = Receipt::new(move |outcome| {
                let _ = signals.send(Signal::Settled(settled, outcome));
            });
            self.dispatcher
                .dispatch_delivery(Delivery::replay(transmission, entry, receipt));
        }
    }

    /// Release a claim. Returns true when the entry left the store, which
    /// is the cue to keep draining.
    fn settle(&mut self, entry: EntryId, outcome: DeliveryOutcome) -> bool {
        self.in_flight.remove(&entry);
        match outcome {
            DeliveryOutcome::Delivered | DeliveryOutcome::Rejected => {
                match self.store.remove(&entry) {
                    Ok(_) => debug!(entry = %entry, ?outcome, "stored transmission settled"),
                    Err(e) => warn!(entry = %entry, error = %e, "failed to remove settled entry"),
                }
                true
            }
            DeliveryOutcome::Persisted | DeliveryOutcome::Deferred | DeliveryOutcome::Abandoned => {
                debug!(entry = %entry, ?outcome, "replay deferred, entry kept");
                false
            }
        }
    }
}

//! Active outputs: each output runs on its own worker pool so callers
//! only ever enqueue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tlx_store::StoreError;
use tracing::{debug, error, warn};

use super::{DiskOutput, TransmissionOutput};
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::policy::{Action, PolicyManager, PolicyView};
use crate::worker::{WorkerContext, WorkerPool};

pub const NETWORK_QUEUE_CAPACITY: usize = 256;
pub const DISK_QUEUE_CAPACITY: usize = 1024;

/// Disk output on a single writer thread.
#[derive(Clone)]
pub struct ActiveDiskOutput {
    pool: Arc<WorkerPool<Delivery>>,
}

impl ActiveDiskOutput {
    pub fn spawn(output: DiskOutput, capacity: usize) -> std::io::Result<Self> {
        let pool = WorkerPool::spawn(
            "tlx-disk",
            1,
            capacity,
            move |delivery: Delivery, _ctx: &WorkerContext| persist(&output, delivery),
        )?;
        Ok(ActiveDiskOutput {
            pool: Arc::new(pool),
        })
    }

    /// Queue a payload for the store. A replayed payload is already on
    /// disk and is not written again.
    pub fn submit(&self, delivery: Delivery) {
        if delivery.is_replay() {
            delivery.complete(DeliveryOutcome::Deferred);
            return;
        }
        if let Err(delivery) = self.pool.submit(delivery) {
            warn!(
                transmission_id = %delivery.transmission.id().short(),
                bytes = delivery.transmission.len(),
                "disk queue unavailable, dropping transmission"
            );
            delivery.complete(DeliveryOutcome::Abandoned);
        }
    }

    pub fn pending(&self) -> usize {
        self.pool.pending()
    }

    pub fn shutdown(&self, deadline: Instant) -> bool {
        self.pool.shutdown(deadline)
    }
}

fn persist(output: &DiskOutput, delivery: Delivery) {
    let id = delivery.transmission.id().short();
    match output.send(&delivery.transmission) {
        Ok(entry) => {
            debug!(transmission_id = %id, entry = %entry, "transmission stored for replay");
            delivery.complete(DeliveryOutcome::Persisted);
        }
        Err(StoreError::CapacityExceeded { needed, available }) => {
            warn!(
                transmission_id = %id,
                needed,
                available,
                "overflow store full, dropping transmission"
            );
            delivery.complete(DeliveryOutcome::Rejected);
        }
        Err(e) => {
            error!(transmission_id = %id, error = %e, code = e.code(), "failed to store transmission");
            delivery.complete(DeliveryOutcome::Abandoned);
        }
    }
}

/// Network output on a small worker pool.
///
/// Workers re-check the policy right before each attempt and send the
/// payload to disk instead when the network is suspended.
#[derive(Clone)]
pub struct ActiveNetworkOutput {
    pool: Arc<WorkerPool<Delivery>>,
}

impl ActiveNetworkOutput {
    pub fn spawn(
        output: Arc<dyn TransmissionOutput>,
        policy: Arc<PolicyManager>,
        fallback: ActiveDiskOutput,
        workers: usize,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let view = policy.view();
        let pool = WorkerPool::spawn(
            "tlx-net",
            workers,
            capacity,
            move |delivery: Delivery, ctx: &WorkerContext| {
                deliver(delivery, output.as_ref(), &policy, &view, &fallback, ctx)
            },
        )?;
        Ok(ActiveNetworkOutput {
            pool: Arc::new(pool),
        })
    }

    /// Queue a payload. Hands it back when the queue is full or closed.
    pub fn submit(&self, delivery: Delivery) -> Result<(), Delivery> {
        self.pool.submit(delivery)
    }

    pub fn pending(&self) -> usize {
        self.pool.pending()
    }

    pub fn shutdown(&self, deadline: Instant) -> bool {
        self.pool.shutdown(deadline)
    }
}

fn deliver(
    first: Delivery,
    output: &dyn TransmissionOutput,
    policy: &PolicyManager,
    view: &PolicyView,
    disk: &ActiveDiskOutput,
    ctx: &WorkerContext,
) {
    let mut queue = VecDeque::from([first]);
    while let Some(mut delivery) = queue.pop_front() {
        if ctx.should_stop() || !view.permits_network() {
            debug!(
                transmission_id = %delivery.transmission.id().short(),
                policy = %view.current(),
                "network unavailable, diverting to disk"
            );
            disk.submit(delivery);
            continue;
        }

        delivery.attempts += 1;
        let report = output.send(&delivery.transmission);
        match policy.on_attempt(&report, &delivery.transmission, delivery.attempts) {
            Action::Complete => delivery.complete(DeliveryOutcome::Delivered),
            Action::RetryNow => queue.push_front(delivery),
            Action::Persist => disk.submit(delivery),
            Action::Drop { reason } => {
                warn!(
                    transmission_id = %delivery.transmission.id().short(),
                    bytes = delivery.transmission.len(),
                    reason = %reason,
                    "dropping transmission"
                );
                delivery.complete(DeliveryOutcome::Rejected);
            }
            Action::Resubmit(subset) => {
                let attempts = delivery.attempts;
                delivery.complete(DeliveryOutcome::Delivered);
                queue.push_back(Delivery::live(subset).with_attempts(attempts));
            }
            Action::Divert(subset) => {
                delivery.complete(DeliveryOutcome::Delivered);
                disk.submit(Delivery::live(subset));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Receipt;
    use crate::output::AttemptReport;
    use crate::policy::{BackoffSchedule, PolicySettings};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tlx_common::{Transmission, CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP};
    use tlx_store::DiskStore;

    /// Plays back a fixed list of reports, then answers 200.
    struct Scripted {
        replies: Mutex<VecDeque<AttemptReport>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<AttemptReport>) -> Arc<Self> {
            Arc::new(Scripted {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl TransmissionOutput for Scripted {
        fn send(&self, _t: &Transmission) -> AttemptReport {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| AttemptReport::status(200))
        }
    }

    struct Rig {
        _dir: TempDir,
        store: Arc<DiskStore>,
        policy: Arc<PolicyManager>,
        network: ActiveNetworkOutput,
        disk: ActiveDiskOutput,
    }

    fn rig(output: Arc<Scripted>, max_instant_retries: u32) -> Rig {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DiskStore::open(dir.path(), 1 << 20).unwrap());
        let policy = Arc::new(PolicyManager::new(PolicySettings {
            max_instant_retries,
            throttling_enabled: true,
            backoff: BackoffSchedule::default().without_jitter(),
        }));
        let disk = ActiveDiskOutput::spawn(DiskOutput::new(store.clone()), 16).unwrap();
        let network =
            ActiveNetworkOutput::spawn(output, policy.clone(), disk.clone(), 1, 16).unwrap();
        Rig {
            _dir: dir,
            store,
            policy,
            network,
            disk,
        }
    }

    fn tracked(t: Transmission) -> (Delivery, mpsc::Receiver<DeliveryOutcome>) {
        let (tx, rx) = mpsc::channel();
        let d = Delivery::live(t).with_receipt(Receipt::new(move |o| {
            let _ = tx.send(o);
        }));
        (d, rx)
    }

    fn transmission() -> Transmission {
        Transmission::new(vec![9; 32], CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP)
    }

    #[test]
    fn test_delivered_on_success() {
        let output = Scripted::new(vec![]);
        let rig = rig(output.clone(), 3);
        let (d, rx) = tracked(transmission());

        rig.network.submit(d).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Delivered);
        assert_eq!(output.calls(), 1);
    }

    #[test]
    fn test_instant_retries_then_persist() {
        let output = Scripted::new(vec![AttemptReport::status(503); 3]);
        let rig = rig(output.clone(), 2);
        let (d, rx) = tracked(transmission());

        rig.network.submit(d).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Persisted);
        assert_eq!(output.calls(), 3);
        assert_eq!(rig.store.stats().entries, 1);
        assert!(matches!(
            rig.policy.view().current(),
            crate::policy::PolicyState::Backoff { .. }
        ));
    }

    #[test]
    fn test_suspended_policy_skips_network() {
        let output = Scripted::new(vec![]);
        let rig = rig(output.clone(), 3);
        rig.policy
            .apply(crate::policy::Transition::Throttle(Duration::from_secs(60)));
        let (d, rx) = tracked(transmission());

        rig.network.submit(d).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Persisted);
        assert_eq!(output.calls(), 0);
    }

    #[test]
    fn test_permanent_rejection_dropped() {
        let output = Scripted::new(vec![AttemptReport::status(400)]);
        let rig = rig(output, 3);
        let (d, rx) = tracked(transmission());

        rig.network.submit(d).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Rejected);
        assert_eq!(rig.store.stats().entries, 0);
    }

    #[test]
    fn test_replay_never_rewritten() {
        let output = Scripted::new(vec![]);
        let rig = rig(output, 3);
        let t = transmission();
        let entry = rig.store.persist(&t).unwrap();

        let (tx, rx) = mpsc::channel();
        let d = Delivery::replay(
            t,
            entry,
            Receipt::new(move |o| {
                let _ = tx.send(o);
            }),
        );
        rig.disk.submit(d);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Deferred);
        assert_eq!(rig.store.stats().entries, 1);
    }

    #[test]
    fn test_full_store_rejects() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DiskStore::open(dir.path(), 10).unwrap());
        let disk = ActiveDiskOutput::spawn(DiskOutput::new(store), 4).unwrap();
        let (d, rx) = tracked(transmission());

        disk.submit(d);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), DeliveryOutcome::Rejected);
        assert!(disk.shutdown(Instant::now() + Duration::from_secs(1)));
    }
}

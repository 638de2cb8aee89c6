//! Record buffer.
//!
//! Accumulates records and decides when a batch is ready: either the batch
//! reaches `max_items` and is handed to the transmitter immediately, or the
//! first record of a batch arms a deferred flush that pulls whatever has
//! accumulated when it fires.
//!
//! Every `add` runs as one step under the buffer lock, so for a fixed
//! sequence of calls the number of size-triggered flushes and schedule
//! requests is fully determined. Each batch carries a generation number; a
//! deferred fetch armed for an older generation finds nothing to take.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tlx_common::ConfigurationError;
use tracing::{debug, error, warn};

use crate::transmitter::{Fetcher, TelemetriesTransmitter};

struct BufferState<T> {
    items: Vec<T>,
    generation: u64,
    schedule_pending: bool,
    max_items: usize,
    timeout: Duration,
}

impl<T> BufferState<T> {
    /// Swap out the current batch and start a new generation.
    fn take_batch(&mut self) -> Vec<T> {
        self.generation += 1;
        self.schedule_pending = false;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_items.min(1024)))
    }
}

/// Builder for [`TelemetryBuffer`].
pub struct BufferBuilder<T> {
    max_items: usize,
    timeout: Duration,
    target: Option<Arc<dyn TelemetriesTransmitter<T>>>,
}

impl<T: Send + 'static> BufferBuilder<T> {
    /// Set the batch size that triggers an immediate flush.
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Set how long the first record of a batch may wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the transmitter batches are handed to.
    pub fn with_target(mut self, target: Arc<dyn TelemetriesTransmitter<T>>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn build(self) -> Result<TelemetryBuffer<T>, ConfigurationError> {
        let target = self.target.ok_or(ConfigurationError::MissingTarget)?;
        if self.max_items == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        if self.timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        Ok(TelemetryBuffer {
            state: Arc::new(Mutex::new(BufferState {
                items: Vec::new(),
                generation: 0,
                schedule_pending: false,
                max_items: self.max_items,
                timeout: self.timeout,
            })),
            target,
        })
    }
}

/// Thread-safe record buffer in front of a [`TelemetriesTransmitter`].
pub struct TelemetryBuffer<T> {
    state: Arc<Mutex<BufferState<T>>>,
    target: Arc<dyn TelemetriesTransmitter<T>>,
}

impl<T: Send + 'static> TelemetryBuffer<T> {
    pub fn builder() -> BufferBuilder<T> {
        BufferBuilder {
            max_items: 0,
            timeout: Duration::ZERO,
            target: None,
        }
    }

    /// Append a record. Never blocks on I/O and never fails.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        state.items.push(item);

        if state.items.len() >= state.max_items {
            let batch = state.take_batch();
            self.hand_off(batch, "batch full");
            return;
        }

        if !state.schedule_pending {
            let fetch = fetcher(Arc::downgrade(&self.state), state.generation);
            if self.target.schedule_send(fetch, state.timeout) {
                state.schedule_pending = true;
            } else {
                warn!(
                    pending = state.items.len(),
                    "could not schedule deferred flush, retrying on next add"
                );
            }
        }
    }

    /// Hand the current batch to the transmitter now, if it has any records.
    pub fn flush(&self) {
        let mut state = self.lock();
        if !state.items.is_empty() {
            let batch = state.take_batch();
            self.hand_off(batch, "flush");
        }
    }

    /// Change the batch size. A batch already at the new size is flushed.
    pub fn set_max_items(&self, max_items: usize) -> Result<(), ConfigurationError> {
        if max_items == 0 {
            return Err(ConfigurationError::ZeroCapacity);
        }
        let mut state = self.lock();
        state.max_items = max_items;
        if !state.items.is_empty() && state.items.len() >= max_items {
            let batch = state.take_batch();
            self.hand_off(batch, "max items lowered");
        }
        Ok(())
    }

    /// Change the flush timeout. Shortening it flushes the current batch.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), ConfigurationError> {
        if timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        let mut state = self.lock();
        let shorter = timeout < state.timeout;
        state.timeout = timeout;
        if shorter && !state.items.is_empty() {
            let batch = state.take_batch();
            self.hand_off(batch, "timeout shortened");
        }
        Ok(())
    }

    pub fn max_items(&self) -> usize {
        self.lock().max_items
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    /// Records waiting in the current batch.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hand_off(&self, batch: Vec<T>, reason: &'static str) {
        let items = batch.len();
        if self.target.send_now(batch) {
            debug!(items, reason, "batch handed to transmitter");
        } else {
            error!(items, reason, "transmitter refused batch, records dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deferred-flush callback for one batch generation.
fn fetcher<T: Send + 'static>(state: Weak<Mutex<BufferState<T>>>, generation: u64) -> Fetcher<T> {
    Box::new(move || {
        let Some(state) = state.upgrade() else {
            return Vec::new();
        };
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return Vec::new();
        }
        state.take_batch()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every call and keeps scheduled fetchers so tests can fire
    /// them by hand.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u32>>>,
        scheduled: Mutex<Vec<(Fetcher<u32>, Duration)>>,
        schedule_attempts: Mutex<usize>,
        refuse_schedule: AtomicBool,
        refuse_send: AtomicBool,
    }

    impl TelemetriesTransmitter<u32> for Recorder {
        fn schedule_send(&self, fetch: Fetcher<u32>, delay: Duration) -> bool {
            *self.schedule_attempts.lock().unwrap() += 1;
            if self.refuse_schedule.load(Ordering::SeqCst) {
                return false;
            }
            self.scheduled.lock().unwrap().push((fetch, delay));
            true
        }

        fn send_now(&self, batch: Vec<u32>) -> bool {
            if self.refuse_send.load(Ordering::SeqCst) {
                return false;
            }
            self.sent.lock().unwrap().push(batch);
            true
        }
    }

    impl Recorder {
        fn sends(&self) -> Vec<Vec<u32>> {
            self.sent.lock().unwrap().clone()
        }

        fn schedule_count(&self) -> usize {
            self.scheduled.lock().unwrap().len()
        }

        /// Fire the oldest scheduled fetch the way the scheduler would.
        fn fire_next(&self) -> Vec<u32> {
            let (fetch, _) = self.scheduled.lock().unwrap().remove(0);
            let batch = fetch();
            if !batch.is_empty() {
                self.send_now(batch.clone());
            }
            batch
        }
    }

    fn buffer(max: usize, recorder: &Arc<Recorder>) -> TelemetryBuffer<u32> {
        TelemetryBuffer::builder()
            .with_max_items(max)
            .with_timeout(Duration::from_secs(10))
            .with_target(recorder.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_missing_target_rejected() {
        let err = TelemetryBuffer::<u32>::builder()
            .with_max_items(10)
            .with_timeout(Duration::from_secs(1))
            .build()
            .err();
        assert_eq!(err, Some(ConfigurationError::MissingTarget));
    }

    #[test]
    fn test_zero_capacity_and_timeout_rejected() {
        let recorder = Arc::new(Recorder::default());
        let zero_items = TelemetryBuffer::<u32>::builder()
            .with_timeout(Duration::from_secs(1))
            .with_target(recorder.clone())
            .build()
            .err();
        assert_eq!(zero_items, Some(ConfigurationError::ZeroCapacity));

        let zero_timeout = TelemetryBuffer::<u32>::builder()
            .with_max_items(5)
            .with_target(recorder)
            .build()
            .err();
        assert_eq!(zero_timeout, Some(ConfigurationError::ZeroTimeout));
    }

    #[test]
    fn test_single_record_flushed_by_timer() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        buf.add(1);
        assert!(recorder.sends().is_empty());
        assert_eq!(recorder.schedule_count(), 1);
        assert_eq!(recorder.scheduled.lock().unwrap()[0].1, Duration::from_secs(10));

        assert_eq!(recorder.fire_next(), vec![1]);
        assert_eq!(recorder.sends(), vec![vec![1]]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_full_batch_sent_before_timer() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        for i in 0..10 {
            buf.add(i);
        }
        assert_eq!(recorder.sends(), vec![(0..10).collect::<Vec<_>>()]);
        assert_eq!(*recorder.schedule_attempts.lock().unwrap(), 1);

        // the timer armed by the first add finds nothing
        assert!(recorder.fire_next().is_empty());
        assert_eq!(recorder.sends().len(), 1);
    }

    #[test]
    fn test_size_two_schedules_once_sends_once() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(2, &recorder);

        buf.add(7);
        assert_eq!(recorder.schedule_count(), 1);
        assert!(recorder.sends().is_empty());

        buf.add(8);
        assert_eq!(recorder.schedule_count(), 1);
        assert_eq!(recorder.sends(), vec![vec![7, 8]]);
    }

    #[test]
    fn test_size_one_never_schedules() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(1, &recorder);

        for i in 0..5 {
            buf.add(i);
        }
        assert_eq!(recorder.sends().len(), 5);
        assert_eq!(*recorder.schedule_attempts.lock().unwrap(), 0);
    }

    #[test]
    fn test_refused_schedule_retried_on_next_add() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        recorder.refuse_schedule.store(true, Ordering::SeqCst);
        buf.add(1);
        buf.add(2);
        assert_eq!(*recorder.schedule_attempts.lock().unwrap(), 2);
        assert_eq!(recorder.schedule_count(), 0);

        recorder.refuse_schedule.store(false, Ordering::SeqCst);
        buf.add(3);
        buf.add(4);
        assert_eq!(*recorder.schedule_attempts.lock().unwrap(), 3);
        assert_eq!(recorder.schedule_count(), 1);

        // nothing was dropped along the way
        assert_eq!(recorder.fire_next(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_timer_after_flush_then_new_records() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(3, &recorder);

        buf.add(1);
        buf.add(2);
        buf.add(3); // size flush, first timer now stale
        buf.add(4); // arms a second timer

        assert_eq!(recorder.schedule_count(), 2);
        assert!(recorder.fire_next().is_empty());
        assert_eq!(recorder.fire_next(), vec![4]);
        assert_eq!(recorder.sends(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[test]
    fn test_refused_send_drops_batch_and_starts_fresh() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(2, &recorder);

        recorder.refuse_send.store(true, Ordering::SeqCst);
        buf.add(1);
        buf.add(2);
        assert!(recorder.sends().is_empty());
        assert!(buf.is_empty());

        recorder.refuse_send.store(false, Ordering::SeqCst);
        buf.add(3);
        buf.add(4);
        assert_eq!(recorder.sends(), vec![vec![3, 4]]);
    }

    #[test]
    fn test_flush_sends_partial_batch() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        buf.flush();
        assert!(recorder.sends().is_empty());

        buf.add(1);
        buf.add(2);
        buf.flush();
        assert_eq!(recorder.sends(), vec![vec![1, 2]]);
        assert!(recorder.fire_next().is_empty());
    }

    #[test]
    fn test_lowering_max_items_flushes() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        buf.add(1);
        buf.add(2);
        buf.add(3);
        buf.set_max_items(5).unwrap();
        assert!(recorder.sends().is_empty());

        buf.set_max_items(2).unwrap();
        assert_eq!(recorder.sends(), vec![vec![1, 2, 3]]);
        assert_eq!(buf.max_items(), 2);
        assert_eq!(buf.set_max_items(0), Err(ConfigurationError::ZeroCapacity));
    }

    #[test]
    fn test_shortening_timeout_flushes() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);

        buf.add(1);
        buf.set_timeout(Duration::from_secs(30)).unwrap();
        assert!(recorder.sends().is_empty());

        buf.set_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(recorder.sends(), vec![vec![1]]);
        assert_eq!(buf.timeout(), Duration::from_secs(1));
        assert_eq!(
            buf.set_timeout(Duration::ZERO),
            Err(ConfigurationError::ZeroTimeout)
        );
    }

    #[test]
    fn test_fetch_after_buffer_dropped_is_empty() {
        let recorder = Arc::new(Recorder::default());
        let buf = buffer(10, &recorder);
        buf.add(1);
        drop(buf);
        assert!(recorder.fire_next().is_empty());
    }

    #[test]
    fn test_concurrent_adds_deliver_every_record_once() {
        let recorder = Arc::new(Recorder::default());
        let buf = Arc::new(buffer(7, &recorder));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buf = Arc::clone(&buf);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        buf.add(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        buf.flush();

        let mut all: Vec<u32> = recorder.sends().into_iter().flatten().collect();
        all.sort_unstable();
        let mut expected: Vec<u32> = (0..4)
            .flat_map(|t| (0..250).map(move |i| t * 1000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }
}

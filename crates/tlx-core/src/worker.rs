//! Bounded worker pools.
//!
//! Each pool owns a fixed number of threads fed by a bounded queue.
//! `submit` never blocks: when the queue is full or closed the job is handed
//! back to the caller, who decides where it goes instead.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, warn};

/// Handle given to job handlers so long-running work can notice a forced
/// stop between units of work.
#[derive(Clone)]
pub struct WorkerContext {
    stop: Arc<AtomicBool>,
}

impl WorkerContext {
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

struct Shared {
    pending: Mutex<usize>,
    settled: Condvar,
    stop: Arc<AtomicBool>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, usize> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish_one(&self) {
        let mut pending = self.pending();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.settled.notify_all();
        }
    }
}

pub struct WorkerPool<J> {
    name: String,
    sender: Mutex<Option<SyncSender<J>>>,
    shared: Arc<Shared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `workers` threads named `<name>-<n>` behind a queue of
    /// `capacity` jobs.
    pub fn spawn<F>(name: &str, workers: usize, capacity: usize, handler: F) -> std::io::Result<Self>
    where
        F: Fn(J, &WorkerContext) + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel::<J>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let shared = Arc::new(Shared {
            pending: Mutex::new(0),
            settled: Condvar::new(),
            stop: Arc::new(AtomicBool::new(false)),
        });

        let mut threads = Vec::with_capacity(workers.max(1));
        for n in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let shared = Arc::clone(&shared);
            let thread = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || worker_loop(&receiver, handler.as_ref(), &shared))?;
            threads.push(thread);
        }

        Ok(WorkerPool {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// Queue a job. Gives the job back if the queue is full or the pool is
    /// shutting down.
    pub fn submit(&self, job: J) -> Result<(), J> {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            return Err(job);
        };

        *self.shared.pending() += 1;
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.shared.finish_one();
                Err(job)
            }
        }
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        *self.shared.pending()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    /// Close the queue and wait until every queued job has run or the
    /// deadline passes. Past the deadline, queued jobs are discarded and
    /// threads still busy are detached.
    ///
    /// Returns true if all work settled in time.
    pub fn shutdown(&self, deadline: Instant) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let mut pending = self.shared.pending();
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            pending = self
                .shared
                .settled
                .wait_timeout(pending, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        let left = *pending;
        drop(pending);

        let settled = left == 0;
        if !settled {
            self.shared.stop.store(true, Ordering::SeqCst);
            warn!(pool = %self.name, pending = left, "worker pool stopped before work settled");
        }

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in threads {
            if settled || handle.is_finished() {
                if handle.join().is_err() {
                    error!(pool = %self.name, "worker thread panicked");
                }
            } else {
                debug!(pool = %self.name, "detaching busy worker thread");
            }
        }
        settled
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        // closing the queue lets idle workers exit
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

fn worker_loop<J>(
    receiver: &Mutex<Receiver<J>>,
    handler: &(dyn Fn(J, &WorkerContext) + Send + Sync),
    shared: &Shared,
) {
    let ctx = WorkerContext {
        stop: Arc::clone(&shared.stop),
    };
    loop {
        let job = {
            let receiver = receiver.lock().unwrap_or_else(|e| e.into_inner());
            receiver.recv()
        };
        let Ok(job) = job else { break };

        if ctx.should_stop() {
            drop(job);
        } else if catch_unwind(AssertUnwindSafe(|| handler(job, &ctx))).is_err() {
            error!("worker job panicked");
        }
        shared.finish_one();
    }
}

//! Single-thread deferred job scheduler.
//!
//! Drives the buffer's flush timers. Jobs run on the scheduler thread in due
//! order. On shutdown the scheduler stops accepting work and runs every job
//! still pending immediately, so no scheduled flush is skipped.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// Upper bound on jobs waiting at once.
pub const MAX_PENDING_JOBS: usize = 16_384;

/// Stand-in deadline for waits too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub type Job = Box<dyn FnOnce() + Send>;

/// `now + wait`, saturating instead of overflowing on huge waits.
pub fn instant_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct Entry {
    due: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct State {
    queue: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    accepting: bool,
    max_pending: usize,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn start(name: &str) -> std::io::Result<Self> {
        Self::with_capacity(name, MAX_PENDING_JOBS)
    }

    pub fn with_capacity(name: &str, max_pending: usize) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: BinaryHeap::new(),
                next_seq: 0,
                accepting: true,
                max_pending,
            }),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&worker))?;

        Ok(Scheduler {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `job` once after `delay`. Returns false if the scheduler is
    /// shutting down or already holds the maximum number of jobs.
    pub fn schedule(&self, job: Job, delay: Duration) -> bool {
        let mut state = self.shared.lock();
        if !state.accepting || state.queue.len() >= state.max_pending {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(Entry {
            due: instant_after(Instant::now(), delay),
            seq,
            job,
        }));
        drop(state);
        self.shared.wake.notify_one();
        true
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Stop accepting jobs, run the pending ones now, and join the thread.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.lock().accepting = false;
        self.shared.wake.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if !state.accepting {
            break;
        }
        let now = Instant::now();
        let next_due = state.queue.peek().map(|Reverse(e)| e.due);
        match next_due {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            Some(due) if due <= now => {
                if let Some(Reverse(entry)) = state.queue.pop() {
                    drop(state);
                    run_job(entry.job);
                    state = shared.lock();
                }
            }
            Some(due) => {
                state = shared
                    .wake
                    .wait_timeout(state, due - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            }
        }
    }

    let mut remaining = Vec::with_capacity(state.queue.len());
    while let Some(Reverse(entry)) = state.queue.pop() {
        remaining.push(entry.job);
    }
    drop(state);

    if !remaining.is_empty() {
        debug!(jobs = remaining.len(), "running pending jobs at shutdown");
    }
    for job in remaining {
        run_job(job);
    }
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("scheduled job panicked");
    }
}

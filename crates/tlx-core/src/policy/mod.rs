//! Transmission policy: may the network be used right now?
//!
//! One [`PolicyManager`] per pipeline owns the state and the handler chain.
//! Outputs and the loader hold a [`PolicyView`], which can read the state
//! and subscribe to changes but never write it.
//!
//! Suspensions only ever grow while active. A fully successful delivery is
//! the one thing that can cut a suspension short; it resets to `Normal`.

pub mod backoff;
pub mod handlers;
pub mod response;

pub use backoff::BackoffSchedule;
pub use handlers::{AttemptContext, Handler, DEFAULT_CHAIN};

use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tlx_common::Transmission;
use tracing::{debug, info};

use crate::output::AttemptReport;
use crate::scheduler::instant_after;

/// Snapshot of the shared policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Normal,
    Throttled { resume_at: Instant },
    Backoff { resume_at: Instant, attempt_count: u32 },
}

impl PolicyState {
    pub fn permits_network(&self) -> bool {
        matches!(self, PolicyState::Normal)
    }

    pub fn resume_at(&self) -> Option<Instant> {
        match self {
            PolicyState::Normal => None,
            PolicyState::Throttled { resume_at } | PolicyState::Backoff { resume_at, .. } => {
                Some(*resume_at)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PolicyState::Normal => "normal",
            PolicyState::Throttled { .. } => "throttled",
            PolicyState::Backoff { .. } => "backoff",
        }
    }

    /// The state as seen at `now`: an elapsed suspension reads as `Normal`.
    fn at(self, now: Instant) -> Self {
        match self.resume_at() {
            Some(resume_at) if resume_at <= now => PolicyState::Normal,
            _ => self,
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resume_at() {
            None => f.write_str(self.label()),
            Some(at) => {
                let ms = at.saturating_duration_since(Instant::now()).as_millis();
                write!(f, "{} (resume in {}ms)", self.label(), ms)
            }
        }
    }
}

/// State change requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Successful delivery: back to `Normal`, backoff level cleared.
    Reset,
    /// Server asked us to wait this long.
    Throttle(Duration),
    /// Retries exhausted: suspend for the next backoff interval.
    Backoff,
}

/// What the active network output should do with the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Delivered (or nothing left worth sending).
    Complete,
    /// Try the same payload again right away.
    RetryNow,
    /// Hand the payload to the disk output.
    Persist,
    /// Discard the payload.
    Drop { reason: String },
    /// The original is done; send this subset again.
    Resubmit(Transmission),
    /// The original is done; store this subset for later.
    Divert(Transmission),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub transition: Option<Transition>,
    pub action: Action,
}

impl Decision {
    pub fn new(action: Action) -> Self {
        Decision {
            transition: None,
            action,
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicySettings {
    pub max_instant_retries: u32,
    /// When false, throttle and backoff suspensions are not applied.
    pub throttling_enabled: bool,
    pub backoff: BackoffSchedule,
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings {
            max_instant_retries: 3,
            throttling_enabled: true,
            backoff: BackoffSchedule::default(),
        }
    }
}

type Listener = Arc<dyn Fn(PolicyState) + Send + Sync>;

struct Cell {
    state: PolicyState,
    backoff_level: u32,
}

struct Shared {
    cell: RwLock<Cell>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Cell> {
        self.cell.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Cell> {
        self.cell.write().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, state: PolicyState) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(state);
        }
    }
}

/// Read-only handle on the policy state.
#[derive(Clone)]
pub struct PolicyView {
    shared: Arc<Shared>,
}

impl PolicyView {
    pub fn current(&self) -> PolicyState {
        self.shared.read().state.at(Instant::now())
    }

    pub fn permits_network(&self) -> bool {
        self.current().permits_network()
    }

    /// Time left in the current suspension, if any.
    pub fn resume_in(&self) -> Option<Duration> {
        self.current()
            .resume_at()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Call `listener` after every applied transition, with the new state.
    /// Listeners run on the thread that reported the attempt and must not
    /// block.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(PolicyState) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }
}

impl fmt::Debug for PolicyView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyView")
            .field("state", &self.current())
            .finish()
    }
}

/// Owns the policy state and runs the handler chain.
pub struct PolicyManager {
    shared: Arc<Shared>,
    chain: Vec<Handler>,
    settings: PolicySettings,
}

impl PolicyManager {
    pub fn new(settings: PolicySettings) -> Self {
        PolicyManager {
            shared: Arc::new(Shared {
                cell: RwLock::new(Cell {
                    state: PolicyState::Normal,
                    backoff_level: 0,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
            chain: DEFAULT_CHAIN.to_vec(),
            settings,
        }
    }

    /// Replace the handler chain.
    pub fn with_chain(mut self, chain: Vec<Handler>) -> Self {
        self.chain = chain;
        self
    }

    pub fn view(&self) -> PolicyView {
        PolicyView {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Interpret one attempt: run the chain, apply the first decision's
    /// transition, return its action.
    pub fn on_attempt(
        &self,
        report: &AttemptReport,
        transmission: &Transmission,
        attempts: u32,
    ) -> Action {
        let ctx = AttemptContext {
            transmission,
            attempts,
            max_instant_retries: self.settings.max_instant_retries,
        };
        let decision = self
            .chain
            .iter()
            .find_map(|handler| handler(report, &ctx))
            .unwrap_or_else(|| Decision::new(Action::Complete));

        debug!(
            transmission_id = %transmission.id().short(),
            status = ?report.status,
            error = ?report.error,
            attempts,
            action = action_label(&decision.action),
            "attempt evaluated"
        );

        if let Some(transition) = decision.transition {
            self.apply(transition);
        }
        decision.action
    }

    /// Apply a transition and return the resulting state.
    pub fn apply(&self, transition: Transition) -> PolicyState {
        let now = Instant::now();
        let (before, after) = {
            let mut cell = self.shared.write();
            let current = cell.state.at(now);
            let next = match transition {
                Transition::Reset => {
                    cell.backoff_level = 0;
                    PolicyState::Normal
                }
                Transition::Throttle(_) | Transition::Backoff if !self.settings.throttling_enabled => {
                    debug!(?transition, "throttling disabled, suspension ignored");
                    current
                }
                Transition::Throttle(wait) => {
                    let until = instant_after(now, wait);
                    if current.resume_at().is_some_and(|at| at >= until) {
                        current
                    } else {
                        PolicyState::Throttled { resume_at: until }
                    }
                }
                Transition::Backoff => {
                    cell.backoff_level = cell.backoff_level.saturating_add(1);
                    let level = cell.backoff_level;
                    let until = instant_after(now, self.settings.backoff.delay(level));
                    if current.resume_at().is_some_and(|at| at >= until) {
                        current
                    } else {
                        PolicyState::Backoff {
                            resume_at: until,
                            attempt_count: level,
                        }
                    }
                }
            };
            cell.state = next;
            (current, next)
        };

        if before != after {
            match after.resume_at() {
                Some(at) => info!(
                    state = after.label(),
                    resume_in_ms = at.saturating_duration_since(now).as_millis() as u64,
                    "network delivery suspended"
                ),
                None => info!(previous = before.label(), "network delivery resumed"),
            }
            self.shared.notify(after);
        }
        after
    }
}

fn action_label(action: &Action) -> &'static str {
    match action {
        Action::Complete => "complete",
        Action::RetryNow => "retry_now",
        Action::Persist => "persist",
        Action::Drop { .. } => "drop",
        Action::Resubmit(_) => "resubmit",
        Action::Divert(_) => "divert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tlx_common::{CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP};

    fn manager() -> PolicyManager {
        PolicyManager::new(PolicySettings {
            backoff: BackoffSchedule::default().without_jitter(),
            ..Default::default()
        })
    }

    fn transmission() -> Transmission {
        Transmission::new(vec![1, 2, 3], CONTENT_TYPE_JSON_STREAM, ENCODING_GZIP)
    }

    #[test]
    fn test_starts_normal() {
        let m = manager();
        assert_eq!(m.view().current(), PolicyState::Normal);
        assert!(m.view().permits_network());
        assert!(m.view().resume_in().is_none());
    }

    #[test]
    fn test_throttle_blocks_until_resume() {
        let m = manager();
        let state = m.apply(Transition::Throttle(Duration::from_secs(30)));
        assert!(matches!(state, PolicyState::Throttled { .. }));
        assert!(!m.view().permits_network());
        let left = m.view().resume_in().unwrap();
        assert!(left > Duration::from_secs(29) && left <= Duration::from_secs(30));
    }

    #[test]
    fn test_throttle_never_shortens() {
        let m = manager();
        m.apply(Transition::Throttle(Duration::from_secs(60)));
        let long = m.view().current().resume_at().unwrap();
        m.apply(Transition::Throttle(Duration::from_secs(5)));
        assert_eq!(m.view().current().resume_at(), Some(long));

        m.apply(Transition::Throttle(Duration::from_secs(120)));
        assert!(m.view().current().resume_at().unwrap() > long);
    }

    #[test]
    fn test_backoff_grows_and_reset_clears() {
        let m = manager();
        let first = m.apply(Transition::Backoff);
        assert!(matches!(first, PolicyState::Backoff { attempt_count: 1, .. }));

        let second = m.apply(Transition::Backoff);
        assert!(matches!(second, PolicyState::Backoff { attempt_count: 2, .. }));
        assert!(second.resume_at() > first.resume_at());

        assert_eq!(m.apply(Transition::Reset), PolicyState::Normal);
        let again = m.apply(Transition::Backoff);
        assert!(matches!(again, PolicyState::Backoff { attempt_count: 1, .. }));
    }

    #[test]
    fn test_backoff_does_not_shorten_longer_throttle() {
        let m = manager();
        m.apply(Transition::Throttle(Duration::from_secs(3600)));
        let state = m.apply(Transition::Backoff);
        assert!(matches!(state, PolicyState::Throttled { .. }));
    }

    #[test]
    fn test_expired_suspension_reads_normal() {
        let m = manager();
        m.apply(Transition::Throttle(Duration::from_millis(20)));
        assert!(!m.view().permits_network());
        std::thread::sleep(Duration::from_millis(40));
        assert!(m.view().permits_network());
    }

    #[test]
    fn test_throttling_disabled_ignores_suspensions() {
        let m = PolicyManager::new(PolicySettings {
            throttling_enabled: false,
            ..Default::default()
        });
        m.apply(Transition::Throttle(Duration::from_secs(30)));
        m.apply(Transition::Backoff);
        assert!(m.view().permits_network());

        // failures still divert to disk
        let t = transmission();
        let action = m.on_attempt(&AttemptReport::status(500), &t, 4);
        assert_eq!(action, Action::Persist);
        assert!(m.view().permits_network());
    }

    #[test]
    fn test_on_attempt_applies_transition() {
        let m = manager();
        let t = transmission();
        let action = m.on_attempt(
            &AttemptReport::status(429).with_retry_after(Duration::from_secs(10)),
            &t,
            1,
        );
        assert_eq!(action, Action::Persist);
        assert!(matches!(m.view().current(), PolicyState::Throttled { .. }));

        let action = m.on_attempt(&AttemptReport::status(200), &t, 1);
        assert_eq!(action, Action::Complete);
        assert_eq!(m.view().current(), PolicyState::Normal);
    }

    #[test]
    fn test_huge_retry_after_throttles_without_overflow() {
        let m = manager();
        let t = transmission();
        let wait = response::parse_retry_after("18446744073709551615", chrono::Utc::now()).unwrap();
        let action = m.on_attempt(&AttemptReport::status(429).with_retry_after(wait), &t, 1);
        assert_eq!(action, Action::Persist);
        assert!(matches!(m.view().current(), PolicyState::Throttled { .. }));

        // an unclamped wait saturates instead of panicking
        let state = m.apply(Transition::Throttle(Duration::MAX));
        assert!(matches!(state, PolicyState::Throttled { .. }));
        assert!(m.view().resume_in().unwrap() > response::MAX_RETRY_AFTER);
    }

    #[test]
    fn test_listeners_see_changes_only() {
        let m = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        m.view().subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        m.apply(Transition::Reset); // already normal
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        m.apply(Transition::Backoff);
        m.apply(Transition::Reset);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_custom_chain() {
        fn always_drop(_: &AttemptReport, _: &AttemptContext<'_>) -> Option<Decision> {
            Some(Decision::new(Action::Drop {
                reason: "test".into(),
            }))
        }
        let m = manager().with_chain(vec![always_drop as Handler]);
        let t = transmission();
        assert!(matches!(
            m.on_attempt(&AttemptReport::status(200), &t, 1),
            Action::Drop { .. }
        ));
    }
}

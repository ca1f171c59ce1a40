//! Rolling-window rate governor.
//!
//! Tracks the instants of recent dispatch admissions and answers how much
//! budget remains right now. Purely advisory bookkeeping consumed by the
//! dispatcher; the governor is charged at the moment of dispatch, not at
//! completion, so the budget reflects in-flight work.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Rolling window of dispatch timestamps bounded by a quota.
///
/// Timestamps older than the window are pruned lazily on each call, so
/// budget regenerates continuously as the window rolls forward.
pub struct RateGovernor {
    dispatches: Mutex<VecDeque<Instant>>,
    quota: usize,
    window: Duration,
}

impl RateGovernor {
    /// Create a governor admitting at most `quota` dispatches per `window`.
    pub fn new(quota: usize, window: Duration) -> Self {
        Self {
            dispatches: Mutex::new(VecDeque::new()),
            quota,
            window,
        }
    }

    /// Lock the dispatch log, recovering from poison if necessary.
    ///
    /// Worst case after recovery is a slightly off budget count, which is
    /// better than panicking the dispatcher.
    fn lock_dispatches(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.dispatches.lock().unwrap_or_else(|poisoned| {
            warn!("Rate governor mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Drop timestamps that have left the window.
    fn prune(&self, dispatches: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = dispatches.front() {
            if now.duration_since(*oldest) >= self.window {
                dispatches.pop_front();
            } else {
                break;
            }
        }
    }

    /// How many dispatches may be admitted right now.
    pub fn available_budget(&self) -> usize {
        let mut dispatches = self.lock_dispatches();
        self.prune(&mut dispatches, Instant::now());
        self.quota.saturating_sub(dispatches.len())
    }

    /// Charge the governor for one dispatch admitted now.
    pub fn record_dispatch(&self) {
        let mut dispatches = self.lock_dispatches();
        let now = Instant::now();
        self.prune(&mut dispatches, now);
        dispatches.push_back(now);
        debug!(
            "Rate governor: {}/{} dispatches in window",
            dispatches.len(),
            self.quota
        );
    }

    /// Number of dispatches currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut dispatches = self.lock_dispatches();
        self.prune(&mut dispatches, Instant::now());
        dispatches.len()
    }
}

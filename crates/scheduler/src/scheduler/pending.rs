//! Coalescing registry of pending upstream requests.
//!
//! At most one pending request exists per key at any time. Every caller
//! asking for a key that is already queued or in flight is attached as an
//! additional waiter and resolved with the same outcome; no second
//! dispatch is ever scheduled for a key that is already pending. Queued
//! entries are handed to the dispatcher in priority-descending,
//! oldest-first order, and the number of queued entries is bounded — the
//! system's backpressure valve.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::errors::SchedulerError;
use crate::models::{CacheKey, FetchOutcome, Priority};

/// Caller-held handle resolved exactly once when the pending request
/// completes.
///
/// Dropping the handle withdraws interest without affecting the in-flight
/// dispatch; the dispatch still runs to completion and populates the cache
/// for other current or future callers.
#[derive(Debug)]
pub struct WaiterHandle {
    rx: oneshot::Receiver<FetchOutcome>,
}

impl WaiterHandle {
    /// Suspend until the associated pending request resolves or fails.
    pub async fn wait(self) -> FetchOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Sender dropped without completing: the registry went away.
            Err(_) => Err(SchedulerError::Shutdown),
        }
    }
}

/// Dispatch instruction produced by [`PendingRegistry::take_ready`].
#[derive(Clone, Debug)]
pub struct DispatchJob {
    /// The key to fetch upstream.
    pub key: CacheKey,
    /// TTL override fixed by the first enqueuer, if any.
    pub ttl_override: Option<Duration>,
    /// How many rate-limit requeues this request has been through.
    pub attempts: u32,
}

/// Dispatch state of a pending request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RequestState {
    /// Waiting in the queue for budget.
    Queued,
    /// Handed to the dispatcher; an upstream call is (or will shortly be)
    /// in flight.
    Dispatched,
}

/// One outstanding request for a key, shared by all its waiters.
struct PendingRequest {
    priority: Priority,
    enqueued_at: Instant,
    /// Monotonic admission counter; breaks ties between entries enqueued
    /// at the same instant so the scheduling order is deterministic.
    seq: u64,
    state: RequestState,
    attempts: u32,
    ttl_override: Option<Duration>,
    waiters: Vec<oneshot::Sender<FetchOutcome>>,
}

struct RegistryInner {
    requests: HashMap<CacheKey, PendingRequest>,
    /// Count of entries in `Queued` state; `Dispatched` entries do not
    /// occupy queue capacity.
    queued: usize,
    next_seq: u64,
}

/// Thread-safe coalescing queue of pending requests.
pub struct PendingRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
}

impl PendingRegistry {
    /// Create a registry admitting at most `capacity` queued entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                requests: HashMap::new(),
                queued: 0,
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Lock the registry, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Pending registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Attach a waiter for `key`, creating a new queued entry if none is
    /// pending.
    ///
    /// Returns the waiter handle and whether a new entry was created (the
    /// caller uses that to wake the dispatcher opportunistically).
    /// Coalescing onto an existing entry never fails; a new entry is
    /// rejected with `CapacityExceeded` once the queued bound is reached.
    pub fn enqueue(
        &self,
        key: &str,
        priority: Priority,
        ttl_override: Option<Duration>,
    ) -> Result<(WaiterHandle, bool), SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        if let Some(request) = inner.requests.get_mut(key) {
            request.waiters.push(tx);
            debug!(
                "Coalesced request for '{}' ({} waiters)",
                key,
                request.waiters.len()
            );
            return Ok((WaiterHandle { rx }, false));
        }

        if inner.queued >= self.capacity {
            debug!(
                "Rejecting '{}': queue at capacity ({})",
                key, self.capacity
            );
            return Err(SchedulerError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.requests.insert(
            key.to_string(),
            PendingRequest {
                priority,
                enqueued_at: Instant::now(),
                seq,
                state: RequestState::Queued,
                attempts: 0,
                ttl_override,
                waiters: vec![tx],
            },
        );
        inner.queued += 1;
        Ok((WaiterHandle { rx }, true))
    }

    /// Select up to `limit` queued entries and mark them dispatched.
    ///
    /// Ordering is the scheduling contract: priority descending, then
    /// enqueue time ascending, then admission sequence. Selection and the
    /// `Queued -> Dispatched` transition happen under one lock so a
    /// concurrent enqueue cannot tear the decision.
    pub fn take_ready(&self, limit: usize) -> Vec<DispatchJob> {
        if limit == 0 {
            return Vec::new();
        }
        let mut guard = self.lock_inner();
        let inner = &mut *guard;

        let mut ready: Vec<(&CacheKey, &PendingRequest)> = inner
            .requests
            .iter()
            .filter(|(_, request)| request.state == RequestState::Queued)
            .collect();
        ready.sort_by(|a, b| {
            b.1.priority
                .cmp(&a.1.priority)
                .then(a.1.enqueued_at.cmp(&b.1.enqueued_at))
                .then(a.1.seq.cmp(&b.1.seq))
        });
        let selected: Vec<CacheKey> = ready
            .into_iter()
            .take(limit)
            .map(|(key, _)| key.clone())
            .collect();

        let mut jobs = Vec::with_capacity(selected.len());
        for key in selected {
            if let Some(request) = inner.requests.get_mut(&key) {
                request.state = RequestState::Dispatched;
                inner.queued -= 1;
                jobs.push(DispatchJob {
                    key,
                    ttl_override: request.ttl_override,
                    attempts: request.attempts,
                });
            }
        }
        jobs
    }

    /// Put a dispatched key back into the queue for a rate-limit retry,
    /// preserving its priority and enqueue age.
    pub fn requeue(&self, key: &str) {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        if let Some(request) = inner.requests.get_mut(key) {
            if request.state == RequestState::Dispatched {
                request.state = RequestState::Queued;
                request.attempts += 1;
                inner.queued += 1;
                debug!(
                    "Requeued '{}' after rate limit (attempt {})",
                    key, request.attempts
                );
            }
        }
    }

    /// Remove the entry for `key` and resolve every waiter, in the order
    /// they were attached, with the same outcome.
    ///
    /// A no-op when the key is not pending (e.g. it was already drained).
    pub fn complete(&self, key: &str, outcome: FetchOutcome) {
        let removed = {
            let mut guard = self.lock_inner();
            let inner = &mut *guard;
            match inner.requests.remove(key) {
                Some(request) => {
                    if request.state == RequestState::Queued {
                        inner.queued -= 1;
                    }
                    Some(request)
                }
                None => None,
            }
        };

        if let Some(request) = removed {
            debug!(
                "Completing '{}' for {} waiters",
                key,
                request.waiters.len()
            );
            for waiter in request.waiters {
                // A dropped receiver withdrew interest; not an error.
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    /// Resolve every pending entry with the given terminal outcome.
    ///
    /// Used on shutdown so no waiter hangs forever. Returns how many
    /// entries were drained.
    pub fn drain(&self, outcome: FetchOutcome) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut guard = self.lock_inner();
            let inner = &mut *guard;
            inner.queued = 0;
            inner.requests.drain().map(|(_, request)| request).collect()
        };

        let count = drained.len();
        for request in drained {
            for waiter in request.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        count
    }

    /// Total number of pending entries, queued and dispatched.
    pub fn len(&self) -> usize {
        self.lock_inner().requests.len()
    }

    /// Whether no request is pending at all.
    pub fn is_empty(&self) -> bool {
        self.lock_inner().requests.is_empty()
    }

    /// Number of entries waiting for dispatch budget.
    pub fn queued_count(&self) -> usize {
        self.lock_inner().queued
    }
}

//! The dispatch control loop tying cache, registry, governor, and
//! upstream client together.
//!
//! One scheduler instance owns all shared state and is injected by
//! reference into every adapter that needs it; there are no process-wide
//! singletons. Per request the state machine is
//! `Queued -> Dispatched -> {Resolved | Failed}`, with a bounded detour
//! back to `Queued` when the provider throttles us.
//!
//! Wake model: the loop drains once after every enqueue that created a new
//! entry (opportunistic low-latency attempt) and on a recurring tick that
//! picks up entries left waiting for budget to regenerate. Each drain
//! admits as many queued entries as the rolling-window budget allows;
//! their upstream calls run concurrently, bounded only by that budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::CacheStore;
use crate::config::SchedulerConfig;
use crate::errors::{RetryClass, SchedulerError};
use crate::models::{FetchRequest, Payload};
use crate::scheduler::{DispatchJob, PendingRegistry, RateGovernor};
use crate::upstream::UpstreamClient;

struct SchedulerInner {
    cache: CacheStore,
    pending: PendingRegistry,
    governor: RateGovernor,
    upstream: Arc<dyn UpstreamClient>,
    config: SchedulerConfig,
    wake: Notify,
    running: AtomicBool,
}

/// Rate-limited, caching request scheduler.
///
/// Mediates all access to a quota-limited upstream provider: callers go
/// through [`fetch`](Self::fetch), which serves cache hits without
/// suspending and coalesces concurrent misses for the same key onto one
/// upstream call. The handle is cheap to clone; all clones share the same
/// cache, queue, and budget.
///
/// # Example
///
/// ```ignore
/// let upstream = Arc::new(HttpUpstreamClient::new(upstream_config)?);
/// let scheduler = FetchScheduler::new(SchedulerConfig::default(), upstream)?;
/// scheduler.start();
///
/// let payload = scheduler
///     .fetch(FetchRequest::new("quote:AAPL").with_priority(5))
///     .await?;
/// ```
#[derive(Clone)]
pub struct FetchScheduler {
    inner: Arc<SchedulerInner>,
}

impl FetchScheduler {
    /// Create a scheduler over the given upstream client.
    ///
    /// Fails with `Configuration` (logged once) when the configuration is
    /// unusable; the service refuses to exist misconfigured.
    pub fn new(
        config: SchedulerConfig,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, SchedulerError> {
        if let Err(err) = config.validate() {
            error!("Refusing to construct scheduler: {}", err);
            return Err(err);
        }
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                cache: CacheStore::new(),
                pending: PendingRegistry::new(config.queue_capacity),
                governor: RateGovernor::new(config.quota, config.window),
                upstream,
                config,
                wake: Notify::new(),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the dispatcher loop. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler loop already running");
            return;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(
                "Fetch scheduler started (quota {} per {:?}, queue capacity {})",
                scheduler.inner.config.quota,
                scheduler.inner.config.window,
                scheduler.inner.config.queue_capacity
            );
            let mut tick = interval(scheduler.inner.config.tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while scheduler.inner.running.load(Ordering::SeqCst) {
                scheduler.drain_ready();
                tokio::select! {
                    _ = scheduler.inner.wake.notified() => {}
                    _ = tick.tick() => {
                        scheduler.inner.cache.sweep();
                    }
                }
            }
            info!("Fetch scheduler stopped");
        });
    }

    /// Stop the dispatcher loop and fail every still-pending waiter with
    /// `Shutdown`.
    ///
    /// Upstream calls already in flight are left to finish; their results
    /// still populate the cache for future callers, but nobody waits on
    /// them anymore.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.wake.notify_one();
        let drained = self.inner.pending.drain(Err(SchedulerError::Shutdown));
        if drained > 0 {
            info!("Failed {} pending requests on shutdown", drained);
        }
    }

    /// Whether the dispatcher loop is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Fetch the payload for a request.
    ///
    /// Cache hits return immediately; misses suspend until the coalesced
    /// dispatch for the key resolves or fails. This is the only suspension
    /// point callers observe.
    pub async fn fetch(&self, request: FetchRequest) -> Result<Payload, SchedulerError> {
        if let Some(payload) = self.inner.cache.get(&request.key) {
            debug!("Cache hit for '{}'", request.key);
            return Ok(payload);
        }

        if !self.is_running() {
            return Err(SchedulerError::Shutdown);
        }

        let (waiter, is_new) =
            self.inner
                .pending
                .enqueue(&request.key, request.priority, request.ttl_override)?;

        if !self.is_running() {
            // Lost the race with stop(): fail the key rather than leaving
            // its waiters parked with no loop to resolve them.
            self.inner
                .pending
                .complete(&request.key, Err(SchedulerError::Shutdown));
        } else if is_new {
            self.inner.wake.notify_one();
        }

        waiter.wait().await
    }

    /// Direct read access to the cache (hits never suspend).
    pub fn cached(&self, key: &str) -> Option<Payload> {
        self.inner.cache.get(key)
    }

    /// Snapshot of scheduler occupancy for observability.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            cached: self.inner.cache.len(),
            pending: self.inner.pending.len(),
            queued: self.inner.pending.queued_count(),
            dispatches_in_window: self.inner.governor.in_window(),
        }
    }

    /// Admit as many queued entries as the current budget allows and spawn
    /// their dispatches.
    ///
    /// Only ever called from the dispatcher loop task, so budget checks
    /// and admissions are never interleaved.
    fn drain_ready(&self) {
        let budget = self.inner.governor.available_budget();
        if budget == 0 {
            return;
        }
        let jobs = self.inner.pending.take_ready(budget);
        for job in jobs {
            // Charged at dispatch time so budget reflects in-flight work.
            self.inner.governor.record_dispatch();
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.dispatch(job).await;
            });
        }
    }

    /// Run one dispatched upstream call to its terminal state.
    async fn dispatch(&self, job: DispatchJob) {
        debug!("Dispatching '{}' (attempt {})", job.key, job.attempts + 1);

        match self.inner.upstream.fetch(&job.key).await {
            Ok(payload) => {
                let ttl = job
                    .ttl_override
                    .unwrap_or(self.inner.config.default_ttl);
                self.inner
                    .cache
                    .set(job.key.clone(), Arc::clone(&payload), ttl);
                self.inner.pending.complete(&job.key, Ok(payload));
            }
            Err(err) => match err.retry_class() {
                RetryClass::Requeue
                    if job.attempts < self.inner.config.max_rate_limit_retries =>
                {
                    let backoff =
                        self.inner.config.retry_backoff_base * 2u32.pow(job.attempts.min(16));
                    warn!(
                        "Upstream rate limited '{}', requeueing in {:?} (attempt {}/{})",
                        job.key,
                        backoff,
                        job.attempts + 1,
                        self.inner.config.max_rate_limit_retries + 1
                    );
                    // The key stays Dispatched (still coalescing callers)
                    // while the backoff elapses; only then does it become
                    // eligible for re-dispatch.
                    tokio::time::sleep(backoff).await;
                    self.inner.pending.requeue(&job.key);
                    self.inner.wake.notify_one();
                }
                _ => {
                    warn!("Dispatch failed for '{}': {}", job.key, err);
                    self.inner.pending.complete(&job.key, Err(err));
                }
            },
        }
    }
}

/// Occupancy snapshot returned by [`FetchScheduler::stats`].
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SchedulerStats {
    /// Cache entries currently held (live and not-yet-swept expired).
    pub cached: usize,
    /// Pending entries, queued and dispatched.
    pub pending: usize,
    /// Entries still waiting for dispatch budget.
    pub queued: usize,
    /// Dispatches admitted within the current rolling window.
    pub dispatches_in_window: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    struct MockUpstream {
        call_count: AtomicUsize,
        delay: Duration,
        fail_with: Option<SchedulerError>,
    }

    impl MockUpstream {
        fn ok() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_with: None,
            }
        }

        fn failing(err: SchedulerError) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok()
            }
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for MockUpstream {
        async fn fetch(&self, key: &str) -> Result<Payload, SchedulerError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(Arc::new(serde_json::json!({ "key": key }))),
            }
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            quota: 10,
            window: Duration::from_millis(200),
            default_ttl: Duration::from_secs(60),
            queue_capacity: 32,
            tick_interval: Duration::from_millis(20),
            retry_backoff_base: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_miss_then_hit() {
        let upstream = Arc::new(MockUpstream::ok());
        let scheduler = FetchScheduler::new(fast_config(), upstream.clone()).unwrap();
        scheduler.start();

        let first = scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap();
        let second = scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(upstream.calls(), 1);

        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_config_rejected() {
        let upstream = Arc::new(MockUpstream::ok());
        let config = SchedulerConfig {
            quota: 0,
            ..Default::default()
        };
        assert!(matches!(
            FetchScheduler::new(config, upstream),
            Err(SchedulerError::Configuration { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_without_start_fails_fast() {
        let upstream = Arc::new(MockUpstream::ok());
        let scheduler = FetchScheduler::new(fast_config(), upstream).unwrap();

        let err = scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::Shutdown);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upstream_failure_surfaces_and_skips_cache() {
        let upstream = Arc::new(MockUpstream::failing(SchedulerError::Upstream {
            status: 500,
            message: "boom".to_string(),
        }));
        let scheduler = FetchScheduler::new(fast_config(), upstream).unwrap();
        scheduler.start();

        let err = scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Upstream { status: 500, .. }));

        // Failures are never cached.
        assert!(scheduler.cached("quote:AAPL").is_none());
        assert_eq!(scheduler.stats().cached, 0);

        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rate_limit_retries_exhaust() {
        let upstream = Arc::new(MockUpstream::failing(SchedulerError::UpstreamRateLimited));
        let config = SchedulerConfig {
            max_rate_limit_retries: 2,
            ..fast_config()
        };
        let scheduler = FetchScheduler::new(config, upstream.clone()).unwrap();
        scheduler.start();

        let err = scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::UpstreamRateLimited);
        // Initial attempt plus two requeues.
        assert_eq!(upstream.calls(), 3);

        scheduler.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_fails_pending_but_inflight_call_still_caches() {
        let upstream = Arc::new(MockUpstream::slow(Duration::from_millis(100)));
        let scheduler = FetchScheduler::new(fast_config(), upstream.clone()).unwrap();
        scheduler.start();

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.fetch(FetchRequest::new("quote:AAPL")).await })
        };

        // Let the dispatch get in flight, then shut down.
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.unwrap_err(), SchedulerError::Shutdown);

        // The in-flight call finishes and still writes the cache.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(scheduler.cached("quote:AAPL").is_some());
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_is_idempotent() {
        let upstream = Arc::new(MockUpstream::ok());
        let scheduler = FetchScheduler::new(fast_config(), upstream.clone()).unwrap();
        scheduler.start();
        scheduler.start();

        scheduler
            .fetch(FetchRequest::new("quote:AAPL"))
            .await
            .unwrap();
        assert_eq!(upstream.calls(), 1);

        scheduler.stop();
    }
}

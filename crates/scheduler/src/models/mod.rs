//! Core data types shared across the scheduler.
//!
//! This module contains:
//! - Type aliases for opaque identifiers (`CacheKey`, `Payload`, `Priority`)
//! - `FetchRequest` - the logical request handed in by adapters
//! - `FetchOutcome` - the one-shot result every waiter receives

use std::sync::Arc;
use std::time::Duration;

use crate::errors::SchedulerError;

/// Opaque request key encoding endpoint + parameters, produced by adapters.
pub type CacheKey = String;

/// Opaque payload returned by the upstream provider.
///
/// Wrapped in `Arc` so one result can be fanned out to every coalesced
/// waiter without copying the underlying JSON document.
pub type Payload = Arc<serde_json::Value>;

/// Request priority. Higher values dispatch first.
pub type Priority = i32;

/// The terminal result of a pending request, delivered exactly once to
/// each waiter.
pub type FetchOutcome = Result<Payload, SchedulerError>;

/// A logical fetch request as handed over by an adapter.
///
/// The scheduler does not interpret the key; adapters are responsible for
/// encoding the endpoint and parameters into it and for reshaping the raw
/// payload afterwards.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Opaque cache/dispatch key.
    pub key: CacheKey,
    /// Scheduling priority; higher is more urgent.
    pub priority: Priority,
    /// Optional TTL for the resulting cache entry. When absent, the
    /// scheduler's `default_ttl` applies. With coalescing, the first
    /// enqueuer's override wins.
    pub ttl_override: Option<Duration>,
}

impl FetchRequest {
    /// Create a request with default priority and TTL.
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            priority: 0,
            ttl_override: None,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the cache TTL for this request's result.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_override = Some(ttl);
        self
    }
}

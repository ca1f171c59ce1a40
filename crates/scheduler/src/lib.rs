//! Quotewire Scheduler
//!
//! Rate-limited, caching request scheduler mediating all access to a
//! quota-limited upstream market-data provider.
//!
//! # Overview
//!
//! The scheduler provides:
//! - A TTL cache serving repeat requests without upstream traffic
//! - Coalescing of concurrent identical requests onto one upstream call
//! - A rolling-window dispatch budget that bounds the upstream call rate
//! - Priority-then-age ordering of queued requests
//! - Queue-capacity backpressure and bounded rate-limit retries
//!
//! # Architecture
//!
//! ```text
//! +--------+   hit    +------------+
//! | Caller | -------> | CacheStore |
//! +--------+          +------------+
//!     | miss                ^
//!     v                     | write-back
//! +-----------------+       |
//! | PendingRegistry |       |
//! | (coalescing)    |       |
//! +-----------------+       |
//!     | take_ready          |
//!     v                     |
//! +------------+  budget  +--------------+
//! | Dispatcher | <------- | RateGovernor |
//! +------------+          +--------------+
//!     |
//!     v
//! +----------------+
//! | UpstreamClient |  (one network call per dispatched key)
//! +----------------+
//! ```
//!
//! # Core Types
//!
//! - [`FetchScheduler`] - the scheduler instance with its `start`/`stop`
//!   lifecycle and the `fetch` entry point
//! - [`FetchRequest`] - key, priority, and optional TTL override
//! - [`SchedulerConfig`] - quota, window, TTLs, capacity, timeouts
//! - [`UpstreamClient`] - the provider seam; [`HttpUpstreamClient`] is the
//!   HTTP implementation
//! - [`SchedulerError`] - the error taxonomy surfaced to callers

pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod scheduler;
pub mod upstream;

// Re-export the public surface.
pub use cache::{CacheStats, CacheStore};
pub use config::SchedulerConfig;
pub use errors::{RetryClass, SchedulerError};
pub use models::{CacheKey, FetchOutcome, FetchRequest, Payload, Priority};
pub use scheduler::{
    DispatchJob, FetchScheduler, PendingRegistry, RateGovernor, SchedulerStats, WaiterHandle,
};
pub use upstream::{AuthScheme, HttpUpstreamClient, UpstreamClient, UpstreamConfig};

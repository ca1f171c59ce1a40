//! Upstream provider client abstractions and implementations.
//!
//! This module contains:
//! - The `UpstreamClient` trait the dispatcher calls through
//! - The HTTP implementation used in production (`HttpUpstreamClient`)
//!
//! The client performs exactly one network call per dispatched key and is
//! the only place where provider failure modes are mapped into the
//! scheduler's error taxonomy. Retry policy lives in the dispatcher, not
//! here.

pub mod http;

pub use http::{AuthScheme, HttpUpstreamClient, UpstreamConfig};

use async_trait::async_trait;

use crate::errors::SchedulerError;
use crate::models::Payload;

/// A client that fetches the payload for an opaque request key.
///
/// Implementations must be safe to call concurrently; the dispatcher runs
/// one call per dispatched key and any number of keys may be in flight at
/// once within the rate budget.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Issue exactly one upstream call for `key`.
    async fn fetch(&self, key: &str) -> Result<Payload, SchedulerError>;
}

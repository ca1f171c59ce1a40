//! Error types and retry classification for the scheduler.
//!
//! This module provides:
//! - [`SchedulerError`]: The main error enum for all scheduler operations
//! - [`RetryClass`]: Classification for determining dispatch retry behavior
//!
//! Every variant carries owned detail rather than a source error so the
//! enum is `Clone`: one completion outcome is fanned out verbatim to every
//! coalesced waiter of a key.

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Errors that can occur during scheduling and upstream fetching.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines how the
/// dispatcher reacts to a failed dispatch.
#[derive(Clone, Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// Missing or invalid configuration (e.g. empty credentials).
    /// Fatal: the scheduler refuses to dispatch until corrected.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is misconfigured and how.
        message: String,
    },

    /// The dispatch queue is full. The request was rejected immediately
    /// without queuing; the caller may retry later.
    #[error("Queue capacity exceeded ({capacity} queued entries)")]
    CapacityExceeded {
        /// The configured queue bound that was hit.
        capacity: usize,
    },

    /// A transport-level failure while calling the upstream provider.
    /// Surfaced to current waiters only; no automatic retry.
    #[error("Network error: {message}")]
    Network {
        /// Transport error detail.
        message: String,
    },

    /// The upstream call exceeded the configured call timeout.
    #[error("Upstream call timed out: {message}")]
    Timeout {
        /// Timeout detail.
        message: String,
    },

    /// The provider signalled its own throttling (HTTP 429).
    /// The dispatcher requeues the key with bounded retries.
    #[error("Upstream rate limited")]
    UpstreamRateLimited,

    /// Non-success provider response, surfaced with the provider-reported
    /// status and message verbatim.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status code reported by the provider.
        status: u16,
        /// Provider-reported detail.
        message: String,
    },

    /// The scheduler was stopped before the request completed.
    #[error("Scheduler shut down before the request completed")]
    Shutdown,
}

impl SchedulerError {
    /// Convenience constructor for configuration errors.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Fatal`]: configuration problem, surfaced immediately
    /// - [`RetryClass::Requeue`]: provider throttling, requeue with backoff
    /// - [`RetryClass::Never`]: surface to waiters, no automatic retry
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Configuration { .. } => RetryClass::Fatal,
            Self::UpstreamRateLimited => RetryClass::Requeue,
            Self::CapacityExceeded { .. }
            | Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Upstream { .. }
            | Self::Shutdown => RetryClass::Never,
        }
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_is_fatal() {
        let error = SchedulerError::configuration("missing API token");
        assert_eq!(error.retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn test_rate_limited_requeues() {
        let error = SchedulerError::UpstreamRateLimited;
        assert_eq!(error.retry_class(), RetryClass::Requeue);
    }

    #[test]
    fn test_capacity_exceeded_never_retries() {
        let error = SchedulerError::CapacityExceeded { capacity: 64 };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_network_never_retries() {
        let error = SchedulerError::Network {
            message: "connection refused".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_timeout_never_retries() {
        let error = SchedulerError::Timeout {
            message: "deadline elapsed".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_upstream_never_retries() {
        let error = SchedulerError::Upstream {
            status: 500,
            message: "internal error".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_error_display() {
        let error = SchedulerError::configuration("missing API token");
        assert_eq!(format!("{}", error), "Configuration error: missing API token");

        let error = SchedulerError::CapacityExceeded { capacity: 64 };
        assert_eq!(
            format!("{}", error),
            "Queue capacity exceeded (64 queued entries)"
        );

        let error = SchedulerError::Upstream {
            status: 503,
            message: "service unavailable".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Upstream error (503): service unavailable"
        );
    }

    #[test]
    fn test_outcome_is_cloneable() {
        // Fan-out to coalesced waiters requires cloning the same outcome.
        let error = SchedulerError::Upstream {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(error.clone(), error);
    }
}

//! Scheduler configuration.
//!
//! All knobs recognized by the scheduler live here. Values can be set
//! programmatically or loaded from `QW_*` environment variables; absent or
//! unparseable variables fall back to the defaults below.

use std::time::Duration;

use crate::errors::SchedulerError;

/// Default dispatch quota per rolling window.
const DEFAULT_QUOTA: usize = 60;

/// Default rolling window duration.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default TTL applied to cache entries without a per-request override.
const DEFAULT_TTL: Duration = Duration::from_secs(900);

/// Default bound on queued (not yet dispatched) entries.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default upstream call timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on rate-limit retries per request.
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Default dispatcher tick interval.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Default base delay for exponential rate-limit backoff.
const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Configuration for a [`FetchScheduler`](crate::FetchScheduler) instance.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Maximum dispatches admitted per rolling window.
    pub quota: usize,
    /// Rolling window duration over which `quota` applies.
    pub window: Duration,
    /// TTL for cache entries when the request carries no override.
    pub default_ttl: Duration,
    /// Maximum number of queued (not yet dispatched) entries before
    /// `enqueue` rejects with `CapacityExceeded`.
    pub queue_capacity: usize,
    /// Timeout for a single upstream call, enforced by the upstream client.
    pub call_timeout: Duration,
    /// How many times a rate-limited dispatch is requeued before the
    /// failure is surfaced to waiters.
    pub max_rate_limit_retries: u32,
    /// Recurring wake interval of the dispatcher loop. Budget regenerates
    /// continuously as the window rolls; the tick picks up leftovers.
    pub tick_interval: Duration,
    /// Base delay for exponential backoff between rate-limit requeues.
    pub retry_backoff_base: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            window: DEFAULT_WINDOW,
            default_ttl: DEFAULT_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            tick_interval: DEFAULT_TICK_INTERVAL,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from `QW_*` environment variables, falling back
    /// to defaults for anything absent or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            quota: env_usize("QW_QUOTA", defaults.quota),
            window: env_duration_secs("QW_WINDOW_SECS", defaults.window),
            default_ttl: env_duration_secs("QW_DEFAULT_TTL_SECS", defaults.default_ttl),
            queue_capacity: env_usize("QW_QUEUE_CAPACITY", defaults.queue_capacity),
            call_timeout: env_duration_ms("QW_CALL_TIMEOUT_MS", defaults.call_timeout),
            max_rate_limit_retries: env_u32(
                "QW_MAX_RATE_LIMIT_RETRIES",
                defaults.max_rate_limit_retries,
            ),
            tick_interval: env_duration_ms("QW_TICK_INTERVAL_MS", defaults.tick_interval),
            retry_backoff_base: env_duration_ms(
                "QW_RETRY_BACKOFF_MS",
                defaults.retry_backoff_base,
            ),
        }
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.quota == 0 {
            return Err(SchedulerError::configuration(
                "quota must be at least 1 dispatch per window",
            ));
        }
        if self.window.is_zero() {
            return Err(SchedulerError::configuration(
                "window duration must be non-zero",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SchedulerError::configuration(
                "queue capacity must be at least 1",
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(SchedulerError::configuration(
                "tick interval must be non-zero",
            ));
        }
        Ok(())
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_duration_ms(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.quota, 60);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.default_ttl, Duration::from_secs(900));
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.max_rate_limit_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides_and_falls_back() {
        // Only this test touches QW_QUOTA / QW_WINDOW_SECS.
        std::env::set_var("QW_QUOTA", "7");
        std::env::set_var("QW_WINDOW_SECS", "not-a-number");

        let config = SchedulerConfig::from_env();
        assert_eq!(config.quota, 7);
        // Garbled values fall back to the default.
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 256);

        std::env::remove_var("QW_QUOTA");
        std::env::remove_var("QW_WINDOW_SECS");
    }

    #[test]
    fn test_zero_quota_rejected() {
        let config = SchedulerConfig {
            quota: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = SchedulerConfig {
            window: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = SchedulerConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::Configuration { .. })
        ));
    }
}

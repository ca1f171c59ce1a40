//! In-memory payload cache with per-entry TTL.
//!
//! Pure data structure, no I/O. An entry is a valid hit only while
//! `now - stored_at < ttl`; expired and absent entries look identical to
//! callers. Expired entries are evicted lazily when a lookup touches them,
//! or in bulk by [`CacheStore::sweep`]. Contents are process-local and
//! reset on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;

use crate::models::{CacheKey, Payload};

/// A cached payload with its expiry bookkeeping.
#[derive(Clone, Debug)]
struct CacheEntry {
    payload: Payload,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Thread-safe TTL cache mapping opaque request keys to payloads.
///
/// Writes are atomic from a reader's perspective: an entry is only ever
/// replaced wholesale, never partially updated. Last writer wins.
pub struct CacheStore {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheStore {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    ///
    /// Worst case after recovery is a stale or missing entry, which is
    /// indistinguishable from an ordinary miss.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Cache store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Return the payload for `key` if an unexpired entry exists.
    ///
    /// An expired entry encountered here is removed on the spot.
    pub fn get(&self, key: &str) -> Option<Payload> {
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(Instant::now()) => Some(entry.payload.clone()),
            Some(_) => {
                debug!("Cache entry for '{}' expired, evicting", key);
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `payload` under `key` with the given TTL, replacing any
    /// previous entry unconditionally.
    pub fn set(&self, key: impl Into<CacheKey>, payload: Payload, ttl: Duration) {
        let mut entries = self.lock_entries();
        entries.insert(
            key.into(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove every expired entry, returning how many were evicted.
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock_entries();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Cache sweep evicted {} expired entries", evicted);
        }
        evicted
    }

    /// Number of entries currently held, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Snapshot of live vs expired entry counts.
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_entries();
        let now = Instant::now();
        let live = entries.values().filter(|e| e.is_fresh(now)).count();
        CacheStats {
            live,
            expired: entries.len() - live,
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache occupancy counters.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStats {
    /// Entries that would currently be returned as hits.
    pub live: usize,
    /// Entries past their TTL awaiting eviction.
    pub expired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn payload(value: i64) -> Payload {
        Arc::new(serde_json::json!({ "value": value }))
    }

    #[test]
    fn test_set_get() {
        let cache = CacheStore::new();
        cache.set("quote:AAPL", payload(1), Duration::from_secs(60));

        let hit = cache.get("quote:AAPL");
        assert!(hit.is_some());
        assert_eq!(hit.unwrap()["value"], 1);
    }

    #[test]
    fn test_miss_on_absent_key() {
        let cache = CacheStore::new();
        assert!(cache.get("quote:NONE").is_none());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = CacheStore::new();
        cache.set("quote:AAPL", payload(1), Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("quote:AAPL").is_none());
        // Lazy eviction removed the entry entirely.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = CacheStore::new();
        cache.set("quote:AAPL", payload(1), Duration::ZERO);
        assert!(cache.get("quote:AAPL").is_none());
    }

    #[test]
    fn test_overwrite_last_writer_wins() {
        let cache = CacheStore::new();
        cache.set("quote:AAPL", payload(1), Duration::from_secs(60));
        cache.set("quote:AAPL", payload(2), Duration::from_secs(60));

        assert_eq!(cache.get("quote:AAPL").unwrap()["value"], 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_restarts_ttl() {
        let cache = CacheStore::new();
        cache.set("quote:AAPL", payload(1), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));

        cache.set("quote:AAPL", payload(2), Duration::from_secs(60));
        assert!(cache.get("quote:AAPL").is_some());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = CacheStore::new();
        cache.set("stale:1", payload(1), Duration::from_millis(10));
        cache.set("stale:2", payload(2), Duration::from_millis(10));
        cache.set("fresh:1", payload(3), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("fresh:1").is_some());
    }

    #[test]
    fn test_stats() {
        let cache = CacheStore::new();
        cache.set("stale:1", payload(1), Duration::from_millis(10));
        cache.set("fresh:1", payload(2), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(20));

        let stats = cache.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.expired, 1);
    }
}

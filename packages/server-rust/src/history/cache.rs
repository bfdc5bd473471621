//! Time-bound in-memory cache in front of the persisted detection history.
//!
//! Holds at most one [`LocaleDetectionHistory`] snapshot. Expiry is lazy: a
//! snapshot older than the TTL is evicted by the read that notices it, never
//! by a background timer. The cache is never the system of record; every
//! mutation elsewhere clears it.
//!
//! Each clear bumps a generation counter. A reader that fetched from the
//! backend fills the cache through [`HistoryCache::update_cache_if`], which
//! refuses the fill if a clear happened since the reader's fetch began.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use locale_store_core::clock::duration_millis;
use locale_store_core::{ClockSource, LocaleDetectionHistory};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

struct CacheEntry {
    history: LocaleDetectionHistory,
    cached_at: u64,
}

/// Observability snapshot returned by [`HistoryCache::get_cache_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    /// A fresh (non-expired) snapshot is present.
    pub is_cached: bool,
    /// Milliseconds since the snapshot was stored, if one is present.
    pub cache_age: Option<u64>,
    /// Records in the cached snapshot (0 when not cached).
    pub cache_size: usize,
}

/// Single-entry TTL cache for the detection history.
pub struct HistoryCache {
    entry: Mutex<Option<CacheEntry>>,
    /// Bumped on every clear, only while `entry` is locked.
    generation: AtomicU64,
    ttl_ms: u64,
    clock: Arc<dyn ClockSource>,
}

impl HistoryCache {
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entry: Mutex::new(None),
            generation: AtomicU64::new(0),
            ttl_ms: duration_millis(ttl),
            clock,
        }
    }

    /// Returns the cached snapshot, or `None` if absent or expired.
    ///
    /// An expired snapshot is evicted as a side effect.
    pub fn get_cached_history(&self) -> Option<LocaleDetectionHistory> {
        let now = self.clock.now();
        let mut guard = self.entry.lock();
        let Some(entry) = guard.as_ref() else {
            metrics::counter!("locale_store_history_cache_misses_total").increment(1);
            return None;
        };

        let age = now.saturating_sub(entry.cached_at);
        if age < self.ttl_ms {
            metrics::counter!("locale_store_history_cache_hits_total").increment(1);
            return Some(entry.history.clone());
        }

        debug!(age_ms = age, ttl_ms = self.ttl_ms, "history cache entry expired");
        *guard = None;
        metrics::counter!("locale_store_history_cache_misses_total").increment(1);
        None
    }

    /// Stores a fresh snapshot stamped with the current time.
    pub fn update_cache(&self, history: LocaleDetectionHistory) {
        let cached_at = self.clock.now();
        *self.entry.lock() = Some(CacheEntry { history, cached_at });
    }

    /// Stores `history` only if no clear happened since `generation` was
    /// read. Returns whether the snapshot was stored.
    pub fn update_cache_if(&self, history: LocaleDetectionHistory, generation: u64) -> bool {
        let cached_at = self.clock.now();
        let mut guard = self.entry.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(generation, "skipped stale history cache fill");
            return false;
        }
        *guard = Some(CacheEntry { history, cached_at });
        true
    }

    /// Current generation, to be read before fetching from the backend.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Unconditionally evicts the snapshot.
    pub fn clear_cache(&self) {
        let mut guard = self.entry.lock();
        *guard = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Reports cache state without evicting anything.
    pub fn get_cache_status(&self) -> CacheStatus {
        let now = self.clock.now();
        let guard = self.entry.lock();
        match guard.as_ref() {
            Some(entry) => {
                let age = now.saturating_sub(entry.cached_at);
                let fresh = age < self.ttl_ms;
                CacheStatus {
                    is_cached: fresh,
                    cache_age: Some(age),
                    cache_size: if fresh { entry.history.len() } else { 0 },
                }
            }
            None => CacheStatus {
                is_cached: false,
                cache_age: None,
                cache_size: 0,
            },
        }
    }
}

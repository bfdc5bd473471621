//! Detection-history manager: the single read/write path for the
//! `locale_detection_history` key.
//!
//! Reads go cache → local backend → synthesized default. Every write goes to
//! the backend first and then invalidates the cache; the next read
//! repopulates it.
//!
//! Load-modify-persist sequences run under a per-manager write lock, so
//! concurrent writers never overwrite each other. Events are emitted after
//! the lock is released.

use std::sync::Arc;
use std::time::Instant;

use locale_store_core::{
    clamp_confidence, parse_history, ClockSource, DataSource, DetectionRecord, Locale,
    LocaleDetectionHistory, StorageKey, StorageResult, ValidationError,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::cache::{CacheStatus, HistoryCache};
use super::stats::ReadTimings;
use crate::config::HistoryConfig;
use crate::events::{EventBus, StorageEvent, StorageEventType};
use crate::storage::{read_json, write_json, BackendError, KeyValueBackend};

/// Errors raised inside the history layer before they are folded into a
/// [`StorageResult`].
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Invalid history data format: {0}")]
    InvalidData(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to serialize history: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported backup version {found} (expected {expected})")]
    UnsupportedBackupVersion { found: u32, expected: u32 },
}

/// Input for [`HistoryManager::add_detection_record`]. The timestamp is
/// assigned by the manager.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDetection {
    pub locale: Locale,
    pub source: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl NewDetection {
    #[must_use]
    pub fn new(locale: Locale, source: impl Into<String>, confidence: f64) -> Self {
        Self {
            locale,
            source: source.into(),
            confidence,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Summary returned by [`HistoryManager::get_history_summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_records: usize,
    pub last_updated: u64,
    pub oldest_record: Option<u64>,
    pub newest_record: Option<u64>,
    pub cache_status: CacheStatus,
}

/// Result of [`HistoryManager::needs_cleanup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupAdvice {
    pub needs_cleanup: bool,
    pub expired_count: usize,
    pub total_count: usize,
    pub recommendations: Vec<String>,
}

/// Owns the detection history for one store.
pub struct HistoryManager {
    pub(super) backend: Arc<dyn KeyValueBackend>,
    pub(super) cache: Arc<HistoryCache>,
    pub(super) clock: Arc<dyn ClockSource>,
    pub(super) config: HistoryConfig,
    pub(super) events: Option<Arc<EventBus>>,
    pub(super) timings: Mutex<ReadTimings>,
    write_lock: Mutex<()>,
}

/// Proof that the caller holds the manager's write lock.
pub(super) type WriteGuard<'a> = MutexGuard<'a, ()>;

impl HistoryManager {
    #[must_use]
    pub fn new(
        backend: Arc<dyn KeyValueBackend>,
        cache: Arc<HistoryCache>,
        clock: Arc<dyn ClockSource>,
        config: HistoryConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            clock,
            config,
            events: None,
            timings: Mutex::new(ReadTimings::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Publishes history events on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Returns the current history.
    ///
    /// A cache hit is tagged [`DataSource::Memory`]; anything read from (or
    /// freshly written to) the backend is tagged [`DataSource::LocalStorage`].
    /// Stored data that fails validation yields a failure, never a silent
    /// default.
    pub fn get_detection_history(&self) -> StorageResult<LocaleDetectionHistory> {
        match self.load() {
            Ok((history, source)) => StorageResult::ok(history, self.now()).with_source(source),
            Err(e) => self.fail("get_detection_history", &e),
        }
    }

    /// Appends a detection (newest first), enforcing the record cap.
    ///
    /// Confidence is clamped into `[0, 1]` and the timestamp is "now".
    pub fn add_detection_record(&self, detection: NewDetection) -> StorageResult<DetectionRecord> {
        let result = self.try_add(detection);
        self.conclude("add_detection_record", result)
    }

    /// Prepends `record` to `history` and applies the cap. Pure apart from
    /// reading the clock.
    #[must_use]
    pub fn update_detection_history(
        &self,
        mut history: LocaleDetectionHistory,
        record: DetectionRecord,
    ) -> LocaleDetectionHistory {
        history.prepend(record, self.now(), self.config.max_records);
        history
    }

    pub fn get_history_summary(&self) -> StorageResult<HistorySummary> {
        let result = self.load().map(|(history, _)| HistorySummary {
            total_records: history.len(),
            last_updated: history.last_updated,
            oldest_record: history.oldest_timestamp(),
            newest_record: history.newest_timestamp(),
            cache_status: self.cache.get_cache_status(),
        });
        self.conclude("get_history_summary", result)
    }

    /// Reports whether expired records exist or the history exceeds its cap.
    pub fn needs_cleanup(&self) -> StorageResult<CleanupAdvice> {
        let now = self.now();
        let max_age_ms = self.max_age_ms();
        let max_records = self.config.max_records;
        let result = self.load().map(|(history, _)| {
            let expired_count = history
                .history
                .iter()
                .filter(|r| r.is_expired(now, max_age_ms))
                .count();
            let total_count = history.len();

            let mut recommendations = Vec::new();
            if expired_count > 0 {
                recommendations.push(format!(
                    "Remove {expired_count} detection records older than {} days",
                    max_age_ms / 86_400_000
                ));
            }
            if total_count > max_records {
                recommendations.push(format!(
                    "Trim history from {total_count} to {max_records} records"
                ));
            }

            CleanupAdvice {
                needs_cleanup: !recommendations.is_empty(),
                expired_count,
                total_count,
                recommendations,
            }
        });
        self.conclude("needs_cleanup", result)
    }

    // -----------------------------------------------------------------------
    // Internals shared with the maintenance, query and stats modules
    // -----------------------------------------------------------------------

    pub(super) fn now(&self) -> u64 {
        self.clock.now()
    }

    pub(super) fn max_age_ms(&self) -> u64 {
        locale_store_core::clock::duration_millis(self.config.max_age)
    }

    /// Serializes writers for the duration of the returned guard.
    pub(super) fn lock_writes(&self) -> WriteGuard<'_> {
        self.write_lock.lock()
    }

    /// Loads the history, populating the cache on a backend read. When
    /// nothing is stored, a default is persisted and returned.
    pub(super) fn load(&self) -> Result<(LocaleDetectionHistory, DataSource), HistoryError> {
        self.read_through(None)
    }

    /// [`Self::load`] for a caller that already holds the write lock.
    pub(super) fn load_locked(
        &self,
        guard: &WriteGuard<'_>,
    ) -> Result<(LocaleDetectionHistory, DataSource), HistoryError> {
        self.read_through(Some(guard))
    }

    fn read_through(
        &self,
        guard: Option<&WriteGuard<'_>>,
    ) -> Result<(LocaleDetectionHistory, DataSource), HistoryError> {
        let started = Instant::now();
        if let Some(history) = self.cache.get_cached_history() {
            self.timings.lock().record_cache(started.elapsed());
            return Ok((history, DataSource::Memory));
        }

        let mut generation = self.cache.generation();
        let stored = read_json(self.backend.as_ref(), StorageKey::LocaleDetectionHistory)?;
        let history = match (stored, guard) {
            (Some(value), _) => parse_history(&value, self.now())?,
            (None, Some(guard)) => {
                let history = LocaleDetectionHistory::empty(self.now());
                self.persist(guard, &history)?;
                generation = self.cache.generation();
                info!("initialized empty detection history");
                history
            }
            (None, None) => {
                // A writer may initialize the key between our read and the lock.
                let guard = self.lock_writes();
                return self.read_through(Some(&guard));
            }
        };
        self.timings.lock().record_backend(started.elapsed());
        metrics::histogram!("locale_store_history_backend_read_seconds")
            .record(started.elapsed().as_secs_f64());

        self.cache.update_cache_if(history.clone(), generation);
        Ok((history, DataSource::LocalStorage))
    }

    /// Writes `history` to the backend, then invalidates the cache.
    pub(super) fn persist(
        &self,
        _guard: &WriteGuard<'_>,
        history: &LocaleDetectionHistory,
    ) -> Result<(), HistoryError> {
        write_json(self.backend.as_ref(), StorageKey::LocaleDetectionHistory, history)?;
        self.cache.clear_cache();
        debug!(records = history.len(), "persisted detection history");
        Ok(())
    }

    pub(super) fn emit(&self, event_type: StorageEventType, data: Value) {
        if let Some(bus) = &self.events {
            bus.emit_event(StorageEvent::new(event_type, "history", self.now()).with_data(data));
        }
    }

    /// Folds an internal result into the envelope, logging and publishing
    /// a `history_error` event on failure.
    pub(super) fn conclude<T>(
        &self,
        operation: &'static str,
        result: Result<T, HistoryError>,
    ) -> StorageResult<T> {
        match result {
            Ok(data) => StorageResult::ok(data, self.now()),
            Err(e) => self.fail(operation, &e),
        }
    }

    fn fail<T>(&self, operation: &'static str, error: &HistoryError) -> StorageResult<T> {
        warn!(operation, error = %error, "history operation failed");
        metrics::counter!("locale_store_history_errors_total", "operation" => operation)
            .increment(1);
        self.emit(
            StorageEventType::HistoryError,
            json!({ "operation": operation, "error": error.to_string() }),
        );
        StorageResult::failure(error.to_string(), self.now())
    }

    fn try_add(&self, detection: NewDetection) -> Result<DetectionRecord, HistoryError> {
        let record = DetectionRecord {
            locale: detection.locale,
            source: detection.source,
            timestamp: self.now(),
            confidence: clamp_confidence(detection.confidence),
            metadata: detection.metadata,
        };

        let history = {
            let guard = self.lock_writes();
            let (history, _) = self.load_locked(&guard)?;
            let history = self.update_detection_history(history, record.clone());
            self.persist(&guard, &history)?;
            history
        };

        self.emit(
            StorageEventType::HistoryRecordAdded,
            json!({
                "locale": record.locale,
                "source": record.source,
                "confidence": record.confidence,
                "totalRecords": history.len(),
            }),
        );
        Ok(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use locale_store_core::ManualClock;
    use serde_json::json;

    use super::*;
    use crate::config::{HistoryConfig, LocalStoreConfig};
    use crate::storage::{BackendKind, LocalStore};

    pub(crate) const T0: u64 = 1_700_000_000_000;

    pub(crate) struct Fixture {
        pub clock: Arc<ManualClock>,
        pub backend: Arc<LocalStore>,
        pub bus: Arc<EventBus>,
        pub manager: HistoryManager,
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(HistoryConfig::default())
    }

    pub(crate) fn fixture_with(config: HistoryConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(LocalStore::new(LocalStoreConfig::default()));
        let bus = Arc::new(EventBus::new(100));
        let cache = Arc::new(HistoryCache::new(config.cache_ttl, clock.clone()));
        let manager = HistoryManager::new(backend.clone(), cache, clock.clone(), config)
            .with_events(bus.clone());
        Fixture {
            clock,
            backend,
            bus,
            manager,
        }
    }

    pub(crate) fn add(f: &Fixture, locale: Locale, source: &str, confidence: f64) {
        let result = f
            .manager
            .add_detection_record(NewDetection::new(locale, source, confidence));
        assert!(result.success, "{:?}", result.error);
        f.clock.advance(Duration::from_millis(1));
    }

    #[test]
    fn first_read_persists_default() {
        let f = fixture();
        assert!(!f.backend.contains(StorageKey::LocaleDetectionHistory));

        let result = f.manager.get_detection_history();

        assert!(result.success);
        assert_eq!(result.source, Some(DataSource::LocalStorage));
        let history = result.data.unwrap();
        assert!(history.is_empty());
        assert_eq!(history.total_detections, 0);
        assert!(f.backend.contains(StorageKey::LocaleDetectionHistory));
    }

    #[test]
    fn second_read_is_served_from_memory() {
        let f = fixture();
        f.manager.get_detection_history();
        let result = f.manager.get_detection_history();
        assert_eq!(result.source, Some(DataSource::Memory));
    }

    #[test]
    fn cache_expiry_forces_backend_read() {
        let f = fixture();
        f.manager.get_detection_history();
        f.clock.advance(Duration::from_secs(11 * 60));
        let result = f.manager.get_detection_history();
        assert_eq!(result.source, Some(DataSource::LocalStorage));
    }

    #[test]
    fn add_prepends_and_clamps() {
        let f = fixture();
        add(&f, Locale::En, "browser", 0.4);
        add(&f, Locale::Zh, "geo", 1.7);

        let history = f.manager.get_detection_history().data.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.total_detections, 2);
        assert_eq!(history.history[0].locale, Locale::Zh);
        assert!((history.history[0].confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(history.history[0].timestamp, T0 + 1);
        assert_eq!(history.history[1].source, "browser");
    }

    #[test]
    fn add_invalidates_cache() {
        let f = fixture();
        f.manager.get_detection_history();
        assert!(f.manager.cache().get_cache_status().is_cached);

        add(&f, Locale::En, "user", 1.0);

        assert!(!f.manager.cache().get_cache_status().is_cached);
        let result = f.manager.get_detection_history();
        assert_eq!(result.source, Some(DataSource::LocalStorage));
        assert_eq!(result.data.unwrap().len(), 1);
    }

    #[test]
    fn cap_keeps_most_recent_records() {
        let f = fixture();
        for i in 0..150 {
            let locale = if i % 2 == 0 { Locale::En } else { Locale::Zh };
            add(&f, locale, &format!("s{i}"), 0.5);
        }

        let history = f.manager.get_detection_history().data.unwrap();
        assert_eq!(history.len(), 100);
        assert_eq!(history.total_detections, 100);
        assert_eq!(history.history[0].source, "s149");
        assert_eq!(history.history[99].source, "s50");
    }

    #[test]
    fn corrupt_stored_history_fails_closed() {
        let f = fixture();
        f.backend
            .set(
                StorageKey::LocaleDetectionHistory,
                &json!({ "history": [{ "locale": "fr", "source": "x", "timestamp": 1, "confidence": 0.5 }], "lastUpdated": 1 })
                    .to_string(),
            )
            .unwrap();

        let result = f.manager.get_detection_history();

        assert!(!result.success);
        assert!(result
            .error
            .unwrap()
            .starts_with("Invalid history data format"));
        let errors = f.bus.get_event_history(None);
        assert_eq!(errors.last().unwrap().event_type, StorageEventType::HistoryError);
    }

    #[test]
    fn add_emits_record_added_event() {
        let f = fixture();
        add(&f, Locale::Zh, "user", 0.9);

        let events = f.bus.get_event_history(None);
        let added = events
            .iter()
            .find(|e| e.event_type == StorageEventType::HistoryRecordAdded)
            .unwrap();
        assert_eq!(added.field("locale"), Some(&json!("zh")));
        assert_eq!(added.field("totalRecords"), Some(&json!(1)));
    }

    #[test]
    fn backend_write_failure_is_reported() {
        let f = fixture();
        f.manager.get_detection_history();
        f.backend.set_enabled(false);

        let result = f
            .manager
            .add_detection_record(NewDetection::new(Locale::En, "user", 1.0));

        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn summary_reports_bounds_and_cache() {
        let f = fixture();
        add(&f, Locale::En, "a", 0.5);
        add(&f, Locale::En, "b", 0.5);
        add(&f, Locale::Zh, "c", 0.5);

        let summary = f.manager.get_history_summary().data.unwrap();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.oldest_record, Some(T0));
        assert_eq!(summary.newest_record, Some(T0 + 2));
        assert!(summary.cache_status.is_cached);
        assert_eq!(summary.cache_status.cache_size, 3);
    }

    #[test]
    fn needs_cleanup_counts_expired() {
        let f = fixture();
        add(&f, Locale::En, "old", 0.5);
        f.clock.advance(Duration::from_secs(31 * 86_400));
        add(&f, Locale::Zh, "new", 0.5);

        let advice = f.manager.needs_cleanup().data.unwrap();
        assert!(advice.needs_cleanup);
        assert_eq!(advice.expired_count, 1);
        assert_eq!(advice.total_count, 2);
        assert_eq!(advice.recommendations.len(), 1);
    }

    #[test]
    fn needs_cleanup_false_for_fresh_history() {
        let f = fixture();
        add(&f, Locale::En, "a", 0.5);
        let advice = f.manager.needs_cleanup().data.unwrap();
        assert!(!advice.needs_cleanup);
        assert!(advice.recommendations.is_empty());
    }

    /// Local store that can pause one history read until released.
    struct GatedBackend {
        inner: LocalStore,
        armed: AtomicBool,
        reached: Barrier,
        release: Barrier,
    }

    impl GatedBackend {
        fn new() -> Self {
            Self {
                inner: LocalStore::new(LocalStoreConfig::default()),
                armed: AtomicBool::new(false),
                reached: Barrier::new(2),
                release: Barrier::new(2),
            }
        }
    }

    impl KeyValueBackend for GatedBackend {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        fn get(&self, key: StorageKey) -> Option<String> {
            let value = self.inner.get(key);
            if key == StorageKey::LocaleDetectionHistory && self.armed.swap(false, Ordering::SeqCst) {
                self.reached.wait();
                self.release.wait();
            }
            value
        }

        fn set(&self, key: StorageKey, value: &str) -> Result<(), BackendError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: StorageKey) -> Result<(), BackendError> {
            self.inner.remove(key)
        }

        fn keys(&self) -> Vec<StorageKey> {
            self.inner.keys()
        }
    }

    #[test]
    fn slow_read_does_not_cache_over_a_newer_write() {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(GatedBackend::new());
        let cache = Arc::new(HistoryCache::new(Duration::from_secs(600), clock.clone()));
        let manager = HistoryManager::new(backend.clone(), cache, clock, HistoryConfig::default());
        manager.get_detection_history();
        manager.cache().clear_cache();

        backend.armed.store(true, Ordering::SeqCst);
        let stale = thread::scope(|s| {
            let reader = s.spawn(|| manager.get_detection_history());
            backend.reached.wait();
            let added = manager.add_detection_record(NewDetection::new(Locale::Zh, "user", 1.0));
            assert!(added.success);
            backend.release.wait();
            reader.join().unwrap()
        });
        assert_eq!(stale.data.unwrap().len(), 0);

        let fresh = manager.get_detection_history();
        assert_eq!(fresh.source, Some(DataSource::LocalStorage));
        assert_eq!(fresh.data.unwrap().len(), 1);
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let f = fixture();
        let threads = 8;
        let per_thread = 10;

        thread::scope(|s| {
            for t in 0..threads {
                let manager = &f.manager;
                s.spawn(move || {
                    for i in 0..per_thread {
                        let result = manager
                            .add_detection_record(NewDetection::new(Locale::En, format!("t{t}-{i}"), 0.5));
                        assert!(result.success, "{:?}", result.error);
                    }
                });
            }
        });

        let history = f.manager.get_detection_history().data.unwrap();
        assert_eq!(history.len(), threads * per_thread);
        assert_eq!(history.total_detections, (threads * per_thread) as u64);
    }

    #[test]
    fn concurrent_cleanup_and_adds_keep_new_records() {
        let f = fixture();
        add(&f, Locale::En, "old", 0.5);
        f.clock.advance(Duration::from_secs(40 * 86_400));

        thread::scope(|s| {
            s.spawn(|| f.manager.cleanup_expired_detections(Duration::from_secs(30 * 86_400)));
            for i in 0..5 {
                let manager = &f.manager;
                s.spawn(move || {
                    manager.add_detection_record(NewDetection::new(Locale::Zh, format!("new{i}"), 0.5))
                });
            }
        });

        let history = f.manager.get_detection_history().data.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.history.iter().all(|r| r.source.starts_with("new")));
    }

    #[test]
    fn without_bus_nothing_is_published() {
        let clock = Arc::new(ManualClock::new(T0));
        let backend = Arc::new(LocalStore::new(LocalStoreConfig::default()));
        let cache = Arc::new(HistoryCache::new(Duration::from_secs(60), clock.clone()));
        let manager = HistoryManager::new(backend, cache, clock, HistoryConfig::default());
        let result = manager.add_detection_record(NewDetection::new(Locale::En, "x", 0.5));
        assert!(result.success);
    }
}

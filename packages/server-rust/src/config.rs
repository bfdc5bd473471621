//! Configuration types for the locale store.
//!
//! Every struct has a `Default` matching production behavior; tests and the
//! binary override individual fields with struct-update syntax.

use std::path::PathBuf;
use std::time::Duration;

use locale_store_core::{Locale, DEFAULT_LOCALE, DEFAULT_MAX_HISTORY_RECORDS};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration assembled by [`LocaleStore`](crate::LocaleStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Detection history limits and cache TTL.
    pub history: HistoryConfig,
    /// Event bus sizing.
    pub events: EventConfig,
    /// Cross-backend consistency thresholds.
    pub reconcile: ReconcileConfig,
    /// Cookie backend limits.
    pub cookie: CookieConfig,
    /// Local persistent backend limits and location.
    pub local: LocalStoreConfig,
    /// Telemetry batching.
    pub telemetry: TelemetryConfig,
    /// Locale returned when neither override nor preference is stored.
    pub default_locale: Locale,
    /// Interval between scheduled maintenance checks.
    pub maintenance_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            events: EventConfig::default(),
            reconcile: ReconcileConfig::default(),
            cookie: CookieConfig::default(),
            local: LocalStoreConfig::default(),
            telemetry: TelemetryConfig::default(),
            default_locale: DEFAULT_LOCALE,
            maintenance_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Detection history limits.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Maximum records retained; older records are dropped from the tail.
    pub max_records: usize,
    /// Records older than this are expired by cleanup.
    pub max_age: Duration,
    /// How long a cached history snapshot is served without re-reading.
    pub cache_ttl: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_HISTORY_RECORDS,
            max_age: DAY * 30,
            cache_ttl: Duration::from_secs(10 * 60),
        }
    }
}

/// Event bus sizing.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Number of dispatched events kept for diagnostics.
    pub history_limit: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

/// Thresholds for [`ConsistencyChecker`](crate::reconcile::ConsistencyChecker).
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Timestamp skew between backends tolerated before a warning is raised.
    pub timestamp_drift_threshold: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timestamp_drift_threshold: Duration::from_secs(60),
        }
    }
}

/// Cookie backend limits.
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Maximum bytes for `name + value`; larger writes are refused.
    pub max_value_bytes: usize,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            max_value_bytes: 4096,
        }
    }
}

/// Local persistent backend configuration.
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    /// Total bytes across all keys before writes fail with a quota error.
    pub quota_bytes: usize,
    /// JSON snapshot file. `None` keeps the store in memory only.
    pub persist_path: Option<PathBuf>,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 5 * 1024 * 1024,
            persist_path: None,
        }
    }
}

/// Telemetry batching.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Events buffered before a flush is forced.
    pub batch_size: usize,
    /// Maximum time an event waits in the buffer.
    pub flush_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            flush_interval: Duration::from_secs(30),
        }
    }
}

//! Persisted record types: the current preference and the detection history.
//!
//! All three types serialize to the camelCase JSON layout both backends store.
//! Construction from untrusted JSON goes through [`crate::validation`], never
//! through `serde` directly, so range rules are enforced on every read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::locale::Locale;

/// Default cap on the number of records kept in a [`LocaleDetectionHistory`].
pub const DEFAULT_MAX_HISTORY_RECORDS: usize = 100;

/// The user's currently selected locale plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub locale: Locale,
    /// How the locale was determined (`"user"`, `"browser"`, `"geo"`, ...).
    pub source: String,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// One observation of a locale signal. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub locale: Locale,
    pub source: String,
    pub timestamp: u64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl DetectionRecord {
    /// Identity used by duplicate cleanup: `locale-source-timestamp-confidence`.
    ///
    /// Metadata is deliberately not part of the key.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.locale, self.source, self.timestamp, self.confidence
        )
    }

    /// Whether `now - timestamp` exceeds `max_age_ms`.
    #[must_use]
    pub fn is_expired(&self, now: u64, max_age_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > max_age_ms
    }
}

/// Saturates a confidence value into `[0, 1]`. NaN becomes 0.
#[must_use]
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Aggregate root holding every detection, newest first.
///
/// Invariants maintained by the mutating methods:
/// - `history.len()` never exceeds the cap passed to [`Self::prepend`]
/// - `total_detections == history.len()` after any mutation
/// - `last_updated` is refreshed on every mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleDetectionHistory {
    #[serde(alias = "detections")]
    pub history: Vec<DetectionRecord>,
    pub last_updated: u64,
    #[serde(default)]
    pub total_detections: u64,
}

impl LocaleDetectionHistory {
    /// The default aggregate synthesized when nothing is stored yet.
    #[must_use]
    pub fn empty(now: u64) -> Self {
        Self {
            history: Vec::new(),
            last_updated: now,
            total_detections: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Most recently added record.
    #[must_use]
    pub fn newest(&self) -> Option<&DetectionRecord> {
        self.history.first()
    }

    /// Smallest record timestamp, by scan.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.history.iter().map(|r| r.timestamp).min()
    }

    /// Largest record timestamp, by scan.
    #[must_use]
    pub fn newest_timestamp(&self) -> Option<u64> {
        self.history.iter().map(|r| r.timestamp).max()
    }

    /// Prepends `record`, truncates to `max_records` from the tail and
    /// stamps `last_updated = now`.
    pub fn prepend(&mut self, record: DetectionRecord, now: u64, max_records: usize) {
        self.history.insert(0, record);
        self.history.truncate(max_records);
        self.touch(now);
    }

    /// Refreshes `last_updated` and re-derives `total_detections`.
    pub fn touch(&mut self, now: u64) {
        self.last_updated = now;
        self.total_detections = self.history.len() as u64;
    }
}

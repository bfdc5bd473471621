//! Read-only filters over the detection history.
//!
//! The free functions work on any record slice; the `HistoryManager`
//! wrappers run them against the currently loaded history.

use locale_store_core::{DetectionRecord, Locale, LocaleDetectionHistory, StorageResult};
use serde::Deserialize;

use super::manager::HistoryManager;

/// Combined filter. Every set criterion must match; bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionQuery {
    pub source: Option<String>,
    pub locale: Option<Locale>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    /// Applied after filtering, newest first.
    pub limit: Option<usize>,
}

impl DetectionQuery {
    #[must_use]
    pub fn matches(&self, record: &DetectionRecord) -> bool {
        self.source.as_deref().map_or(true, |s| record.source == s)
            && self.locale.map_or(true, |l| record.locale == l)
            && self.start_time.map_or(true, |t| record.timestamp >= t)
            && self.end_time.map_or(true, |t| record.timestamp <= t)
            && self.min_confidence.map_or(true, |c| record.confidence >= c)
            && self.max_confidence.map_or(true, |c| record.confidence <= c)
    }

    /// Whether any criterion (other than `limit`) is set.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        self.source.is_some()
            || self.locale.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.min_confidence.is_some()
            || self.max_confidence.is_some()
    }
}

/// The newest `limit` records.
#[must_use]
pub fn recent(records: &[DetectionRecord], limit: usize) -> Vec<DetectionRecord> {
    records.iter().take(limit).cloned().collect()
}

#[must_use]
pub fn by_source(records: &[DetectionRecord], source: &str) -> Vec<DetectionRecord> {
    select(records, |r| r.source == source)
}

#[must_use]
pub fn by_locale(records: &[DetectionRecord], locale: Locale) -> Vec<DetectionRecord> {
    select(records, |r| r.locale == locale)
}

/// Records with `start <= timestamp <= end`.
#[must_use]
pub fn by_time_range(records: &[DetectionRecord], start: u64, end: u64) -> Vec<DetectionRecord> {
    select(records, |r| (start..=end).contains(&r.timestamp))
}

/// Records with `min <= confidence <= max`.
#[must_use]
pub fn by_confidence(records: &[DetectionRecord], min: f64, max: f64) -> Vec<DetectionRecord> {
    select(records, |r| r.confidence >= min && r.confidence <= max)
}

#[must_use]
pub fn query(records: &[DetectionRecord], query: &DetectionQuery) -> Vec<DetectionRecord> {
    let matched = records.iter().filter(|r| query.matches(r)).cloned();
    match query.limit {
        Some(limit) => matched.take(limit).collect(),
        None => matched.collect(),
    }
}

/// Case-insensitive substring search over locale, source and metadata.
#[must_use]
pub fn search(records: &[DetectionRecord], term: &str) -> Vec<DetectionRecord> {
    let needle = term.trim().to_lowercase();
    select(records, |r| {
        r.locale.as_str().contains(&needle)
            || r.source.to_lowercase().contains(&needle)
            || r.metadata.as_ref().is_some_and(|m| {
                serde_json::to_string(m)
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
    })
}

fn select(
    records: &[DetectionRecord],
    predicate: impl Fn(&DetectionRecord) -> bool,
) -> Vec<DetectionRecord> {
    records.iter().filter(|r| predicate(r)).cloned().collect()
}

impl HistoryManager {
    pub fn get_recent_detections(&self, limit: usize) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("get_recent_detections", |h| recent(&h.history, limit))
    }

    pub fn get_detections_by_source(&self, source: &str) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("get_detections_by_source", |h| by_source(&h.history, source))
    }

    pub fn get_detections_by_locale(&self, locale: Locale) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("get_detections_by_locale", |h| by_locale(&h.history, locale))
    }

    pub fn get_detections_by_time_range(
        &self,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("get_detections_by_time_range", |h| {
            by_time_range(&h.history, start, end)
        })
    }

    pub fn get_detections_by_confidence(
        &self,
        min: f64,
        max: f64,
    ) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("get_detections_by_confidence", |h| {
            by_confidence(&h.history, min, max)
        })
    }

    pub fn query_detections(&self, q: &DetectionQuery) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("query_detections", |h| query(&h.history, q))
    }

    pub fn search_detections(&self, term: &str) -> StorageResult<Vec<DetectionRecord>> {
        self.with_history("search_detections", |h| search(&h.history, term))
    }

    /// Loads the history and applies `f`, tagging the result with where the
    /// history came from.
    pub(super) fn with_history<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&LocaleDetectionHistory) -> T,
    ) -> StorageResult<T> {
        match self.load() {
            Ok((history, source)) => {
                StorageResult::ok(f(&history), self.now()).with_source(source)
            }
            Err(e) => self.conclude(operation, Err(e)),
        }
    }
}

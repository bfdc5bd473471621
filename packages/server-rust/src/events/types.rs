//! Storage event vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of events the storage layer publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEventType {
    PreferenceSaved,
    PreferenceLoaded,
    OverrideSet,
    OverrideCleared,
    PreferenceSync,
    PreferenceError,
    HistoryRecordAdded,
    HistoryCleanup,
    HistoryCleared,
    HistoryExport,
    HistoryImport,
    HistoryError,
}

impl StorageEventType {
    pub const ALL: [StorageEventType; 12] = [
        StorageEventType::PreferenceSaved,
        StorageEventType::PreferenceLoaded,
        StorageEventType::OverrideSet,
        StorageEventType::OverrideCleared,
        StorageEventType::PreferenceSync,
        StorageEventType::PreferenceError,
        StorageEventType::HistoryRecordAdded,
        StorageEventType::HistoryCleanup,
        StorageEventType::HistoryCleared,
        StorageEventType::HistoryExport,
        StorageEventType::HistoryImport,
        StorageEventType::HistoryError,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreferenceSaved => "preference_saved",
            Self::PreferenceLoaded => "preference_loaded",
            Self::OverrideSet => "override_set",
            Self::OverrideCleared => "override_cleared",
            Self::PreferenceSync => "preference_sync",
            Self::PreferenceError => "preference_error",
            Self::HistoryRecordAdded => "history_record_added",
            Self::HistoryCleanup => "history_cleanup",
            Self::HistoryCleared => "history_cleared",
            Self::HistoryExport => "history_export",
            Self::HistoryImport => "history_import",
            Self::HistoryError => "history_error",
        }
    }

    /// Error events are logged at error level by the logging listener.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::PreferenceError | Self::HistoryError)
    }
}

impl fmt::Display for StorageEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "type")]
    pub event_type: StorageEventType,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Component that emitted the event (`"preference"`, `"history"`, ...).
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl StorageEvent {
    #[must_use]
    pub fn new(event_type: StorageEventType, source: impl Into<String>, timestamp: u64) -> Self {
        Self {
            event_type,
            timestamp,
            source: source.into(),
            data: None,
        }
    }

    /// Attaches a payload. Non-object values are ignored.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = Some(map);
        }
        self
    }

    /// Looks up a payload field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(name))
    }
}

/// Which events a listener is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// A single event type.
    Only(StorageEventType),
    /// Every event (the `"*"` wildcard).
    All,
}

impl EventFilter {
    #[must_use]
    pub fn matches(self, event_type: StorageEventType) -> bool {
        match self {
            Self::Only(t) => t == event_type,
            Self::All => true,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Only(t) => t.as_str(),
            Self::All => "*",
        }
    }
}

impl From<StorageEventType> for EventFilter {
    fn from(event_type: StorageEventType) -> Self {
        Self::Only(event_type)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_names_match_as_str() {
        for t in StorageEventType::ALL {
            let encoded = serde_json::to_value(t).unwrap();
            assert_eq!(encoded, json!(t.as_str()));
        }
    }

    #[test]
    fn only_error_types_are_errors() {
        let errors: Vec<_> = StorageEventType::ALL
            .into_iter()
            .filter(|t| t.is_error())
            .collect();
        assert_eq!(
            errors,
            vec![StorageEventType::PreferenceError, StorageEventType::HistoryError]
        );
    }

    #[test]
    fn event_serializes_with_type_field() {
        let event = StorageEvent::new(StorageEventType::OverrideSet, "preference", 42)
            .with_data(json!({ "locale": "zh" }));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "override_set",
                "timestamp": 42,
                "source": "preference",
                "data": { "locale": "zh" }
            })
        );
        assert_eq!(event.field("locale"), Some(&json!("zh")));
    }

    #[test]
    fn non_object_payload_is_dropped() {
        let event = StorageEvent::new(StorageEventType::HistoryCleared, "history", 1)
            .with_data(json!([1, 2]));
        assert!(event.data.is_none());
    }

    #[test]
    fn filter_matching() {
        assert!(EventFilter::All.matches(StorageEventType::HistoryImport));
        assert!(EventFilter::from(StorageEventType::HistoryImport)
            .matches(StorageEventType::HistoryImport));
        assert!(!EventFilter::Only(StorageEventType::HistoryImport)
            .matches(StorageEventType::HistoryExport));
        assert_eq!(EventFilter::All.as_str(), "*");
    }
}

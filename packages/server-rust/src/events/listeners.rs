//! Built-in listeners installed by [`setup_default_listeners`].

use std::sync::{Arc, Weak};

use anyhow::Context;
use locale_store_core::Locale;
use serde_json::{json, Value};
use tracing::{error, info};

use super::bus::{EventBus, EventListener, ListenerId};
use super::types::{EventFilter, StorageEvent, StorageEventType};
use crate::history::{HistoryManager, NewDetection};

/// Which default listeners to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultListenerOptions {
    /// Log every event through `tracing`.
    pub enable_logging: bool,
    /// Append a detection record for every `preference_saved` event.
    pub enable_history_recording: bool,
}

impl Default for DefaultListenerOptions {
    fn default() -> Self {
        Self {
            enable_logging: true,
            enable_history_recording: true,
        }
    }
}

/// Logs every event; error events at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn on_event(&self, event: &StorageEvent) -> anyhow::Result<()> {
        let data = event.data.as_ref().map(|d| Value::Object(d.clone()));
        if event.event_type.is_error() {
            error!(
                event_type = %event.event_type,
                source = %event.source,
                data = ?data,
                "locale storage event"
            );
        } else {
            info!(
                event_type = %event.event_type,
                source = %event.source,
                data = ?data,
                "locale storage event"
            );
        }
        Ok(())
    }
}

/// Turns each saved preference into a detection record.
///
/// Holds the history weakly so the bus (owned alongside the history) does not
/// keep it alive.
pub struct HistoryRecordingListener {
    history: Weak<HistoryManager>,
}

impl HistoryRecordingListener {
    #[must_use]
    pub fn new(history: &Arc<HistoryManager>) -> Self {
        Self {
            history: Arc::downgrade(history),
        }
    }
}

impl EventListener for HistoryRecordingListener {
    fn on_event(&self, event: &StorageEvent) -> anyhow::Result<()> {
        if event.event_type != StorageEventType::PreferenceSaved {
            return Ok(());
        }
        let Some(history) = self.history.upgrade() else {
            return Ok(());
        };

        let locale: Locale = event
            .field("locale")
            .and_then(Value::as_str)
            .context("preference_saved event without a locale")?
            .parse()?;
        let source = event
            .field("source")
            .and_then(Value::as_str)
            .unwrap_or(event.source.as_str())
            .to_string();
        let confidence = event
            .field("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        let mut metadata = serde_json::Map::new();
        metadata.insert("origin".to_string(), json!("preference_saved"));

        let result = history
            .add_detection_record(NewDetection::new(locale, source, confidence).with_metadata(metadata));
        if !result.success {
            anyhow::bail!(
                "failed to record detection: {}",
                result.error.unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Installs the default listeners and returns their ids.
pub fn setup_default_listeners(
    bus: &EventBus,
    history: &Arc<HistoryManager>,
    options: DefaultListenerOptions,
) -> Vec<ListenerId> {
    let mut ids = Vec::new();
    if options.enable_logging {
        ids.push(bus.add_event_listener(EventFilter::All, Arc::new(LoggingListener)));
    }
    if options.enable_history_recording {
        ids.push(bus.add_event_listener(
            StorageEventType::PreferenceSaved,
            Arc::new(HistoryRecordingListener::new(history)),
        ));
    }
    ids
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::history::manager::tests::fixture;

    fn saved(locale: &str) -> StorageEvent {
        StorageEvent::new(StorageEventType::PreferenceSaved, "preference", 1)
            .with_data(json!({ "locale": locale, "source": "user", "confidence": 0.8 }))
    }

    #[test]
    fn logging_listener_never_fails() {
        let listener = LoggingListener;
        assert!(listener.on_event(&saved("en")).is_ok());
        let error = StorageEvent::new(StorageEventType::HistoryError, "history", 1);
        assert!(listener.on_event(&error).is_ok());
    }

    #[test]
    fn recording_listener_appends_detection() {
        let f = fixture();
        let history = Arc::new(f.manager);
        let listener = HistoryRecordingListener::new(&history);

        listener.on_event(&saved("zh")).unwrap();

        let records = history.get_detection_history().data.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records.history[0];
        assert_eq!(record.locale, Locale::Zh);
        assert_eq!(record.source, "user");
        assert!((record.confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(
            record.metadata.as_ref().unwrap()["origin"],
            json!("preference_saved")
        );
    }

    #[test]
    fn recording_listener_rejects_bad_locale() {
        let f = fixture();
        let history = Arc::new(f.manager);
        let listener = HistoryRecordingListener::new(&history);
        assert!(listener.on_event(&saved("fr")).is_err());
        assert!(history.get_detection_history().data.unwrap().is_empty());
    }

    #[test]
    fn recording_listener_is_inert_after_history_dropped() {
        let f = fixture();
        let history = Arc::new(f.manager);
        let listener = HistoryRecordingListener::new(&history);
        drop(history);
        assert!(listener.on_event(&saved("en")).is_ok());
    }

    #[test]
    fn setup_honours_options() {
        let f = fixture();
        let history = Arc::new(f.manager);
        let bus = EventBus::new(10);

        let ids = setup_default_listeners(&bus, &history, DefaultListenerOptions::default());
        assert_eq!(ids.len(), 2);

        let stats = bus.get_listener_stats();
        assert_eq!(stats.wildcard_listeners, 1);
        assert_eq!(stats.by_type.get(&StorageEventType::PreferenceSaved), Some(&1));

        let none = EventBus::new(10);
        let ids = setup_default_listeners(
            &none,
            &history,
            DefaultListenerOptions {
                enable_logging: false,
                enable_history_recording: false,
            },
        );
        assert!(ids.is_empty());
        assert_eq!(none.listener_count(), 0);
    }

    #[test]
    fn saved_preference_flows_into_history_through_bus() {
        let f = fixture();
        let bus = f.bus.clone();
        let history = Arc::new(f.manager);
        setup_default_listeners(&bus, &history, DefaultListenerOptions::default());

        let report = bus.emit_event(saved("en"));

        assert_eq!(report.failed, 0);
        assert_eq!(history.get_detection_history().data.unwrap().len(), 1);
        // The nested history_record_added emission landed in the bus history too.
        assert!(bus
            .get_event_history(None)
            .iter()
            .any(|e| e.event_type == StorageEventType::HistoryRecordAdded));
    }
}

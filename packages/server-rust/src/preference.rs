//! Current preference and user override across both backends.
//!
//! The local store is the system of record; the cookie store is a mirror
//! written on a best-effort basis. A failed cookie write is logged and
//! reported in the event payload but does not fail the operation.

use std::sync::Arc;

use locale_store_core::{
    clamp_confidence, parse_override, parse_preference, resolve_locale, ClockSource, DataSource,
    Locale, PreferenceRecord, StorageKey, StorageResult, ValidationError,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::events::{EventBus, StorageEvent, StorageEventType};
use crate::storage::{read_json, write_json, BackendError, KeyValueBackend};

#[derive(Debug, thiserror::Error)]
enum PreferenceError {
    #[error("Invalid preference data format: {0}")]
    InvalidPreference(ValidationError),

    #[error("Invalid locale override: {0}")]
    InvalidOverride(ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Reads and writes the preference and override keys.
pub struct PreferenceManager {
    local: Arc<dyn KeyValueBackend>,
    cookie: Arc<dyn KeyValueBackend>,
    events: Arc<EventBus>,
    clock: Arc<dyn ClockSource>,
    default_locale: Locale,
}

impl PreferenceManager {
    #[must_use]
    pub fn new(
        local: Arc<dyn KeyValueBackend>,
        cookie: Arc<dyn KeyValueBackend>,
        events: Arc<EventBus>,
        clock: Arc<dyn ClockSource>,
        default_locale: Locale,
    ) -> Self {
        Self {
            local,
            cookie,
            events,
            clock,
            default_locale,
        }
    }

    /// Stores `locale` as the current preference in both backends and
    /// publishes `preference_saved`.
    pub fn save_preference(
        &self,
        locale: Locale,
        source: &str,
        confidence: f64,
    ) -> StorageResult<PreferenceRecord> {
        let record = PreferenceRecord {
            locale,
            source: source.to_string(),
            timestamp: self.clock.now(),
            confidence: clamp_confidence(confidence),
        };

        if let Err(e) = write_json(self.local.as_ref(), StorageKey::LocalePreference, &record) {
            return self.fail("save_preference", &PreferenceError::Backend(e));
        }
        let cookie_synced = self.mirror(|| {
            write_json(self.cookie.as_ref(), StorageKey::LocalePreference, &record)
        });

        self.emit(
            StorageEventType::PreferenceSaved,
            json!({
                "locale": record.locale,
                "source": record.source,
                "confidence": record.confidence,
                "cookieSynced": cookie_synced,
            }),
        );
        StorageResult::ok(record, self.clock.now())
    }

    /// Loads the preference, local store first, then cookie.
    ///
    /// Nothing stored yields success with no data and [`DataSource::Default`].
    /// Stored data that fails validation yields a failure.
    pub fn load_preference(&self) -> StorageResult<PreferenceRecord> {
        let now = self.clock.now();
        for backend in [&self.local, &self.cookie] {
            let stored = match read_json(backend.as_ref(), StorageKey::LocalePreference) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => return self.fail("load_preference", &PreferenceError::Backend(e)),
            };
            return match parse_preference(&stored, now) {
                Ok(record) => {
                    let source = backend.kind().data_source();
                    self.emit(
                        StorageEventType::PreferenceLoaded,
                        json!({ "locale": record.locale, "from": source }),
                    );
                    StorageResult::ok(record, now).with_source(source)
                }
                Err(e) => self.fail("load_preference", &PreferenceError::InvalidPreference(e)),
            };
        }
        debug!("no stored preference");
        StorageResult::empty(now).with_source(DataSource::Default)
    }

    /// Stores an explicit user override.
    pub fn set_user_override(&self, locale: Locale) -> StorageResult<Locale> {
        if let Err(e) = self.local.set(StorageKey::UserLocaleOverride, locale.as_str()) {
            return self.fail("set_user_override", &PreferenceError::Backend(e));
        }
        let cookie_synced =
            self.mirror(|| self.cookie.set(StorageKey::UserLocaleOverride, locale.as_str()));
        self.emit(
            StorageEventType::OverrideSet,
            json!({ "locale": locale, "cookieSynced": cookie_synced }),
        );
        StorageResult::ok(locale, self.clock.now())
    }

    /// Reads the override, local store first, then cookie.
    pub fn get_user_override(&self) -> StorageResult<Locale> {
        let now = self.clock.now();
        for backend in [&self.local, &self.cookie] {
            if let Some(raw) = backend.get(StorageKey::UserLocaleOverride) {
                return match parse_override(&raw) {
                    Ok(locale) => {
                        StorageResult::ok(locale, now).with_source(backend.kind().data_source())
                    }
                    Err(e) => self.fail("get_user_override", &PreferenceError::InvalidOverride(e)),
                };
            }
        }
        StorageResult::empty(now).with_source(DataSource::Default)
    }

    /// Removes the override from both backends.
    pub fn clear_user_override(&self) -> StorageResult<()> {
        if let Err(e) = self.local.remove(StorageKey::UserLocaleOverride) {
            return self.fail("clear_user_override", &PreferenceError::Backend(e));
        }
        self.mirror(|| self.cookie.remove(StorageKey::UserLocaleOverride));
        self.emit(StorageEventType::OverrideCleared, json!({}));
        StorageResult::ok((), self.clock.now())
    }

    /// Override, else stored preference, else the configured default.
    ///
    /// Unreadable or invalid stored values are skipped.
    #[must_use]
    pub fn get_effective_locale(&self) -> Locale {
        let override_locale = self.get_user_override().data;
        let preference = self.load_preference().data.map(|p| p.locale);
        resolve_locale(override_locale, preference, self.default_locale)
    }

    /// Runs a cookie write; returns whether it succeeded.
    fn mirror(&self, write: impl FnOnce() -> Result<(), BackendError>) -> bool {
        match write() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, backend = %self.cookie.kind(), "cookie mirror write failed");
                metrics::counter!("locale_store_cookie_mirror_failures_total").increment(1);
                false
            }
        }
    }

    fn emit(&self, event_type: StorageEventType, data: Value) {
        self.events
            .emit_event(StorageEvent::new(event_type, "preference", self.clock.now()).with_data(data));
    }

    fn fail<T>(&self, operation: &'static str, error: &PreferenceError) -> StorageResult<T> {
        warn!(operation, error = %error, "preference operation failed");
        self.emit(
            StorageEventType::PreferenceError,
            json!({ "operation": operation, "error": error.to_string() }),
        );
        StorageResult::failure(error.to_string(), self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use locale_store_core::ManualClock;

    use super::*;
    use crate::config::{CookieConfig, LocalStoreConfig};
    use crate::storage::{CookieStore, LocalStore};

    const T0: u64 = 1_700_000_000_000;

    struct Fixture {
        local: Arc<LocalStore>,
        cookie: Arc<CookieStore>,
        bus: Arc<EventBus>,
        manager: PreferenceManager,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(LocalStore::new(LocalStoreConfig::default()));
        let cookie = Arc::new(CookieStore::new(CookieConfig::default()));
        let bus = Arc::new(EventBus::new(50));
        let manager = PreferenceManager::new(
            local.clone(),
            cookie.clone(),
            bus.clone(),
            Arc::new(ManualClock::new(T0)),
            Locale::En,
        );
        Fixture {
            local,
            cookie,
            bus,
            manager,
        }
    }

    fn last_event(f: &Fixture) -> StorageEvent {
        f.bus.get_event_history(Some(1)).pop().unwrap()
    }

    #[test]
    fn save_writes_both_backends() {
        let f = fixture();
        let result = f.manager.save_preference(Locale::Zh, "user", 1.4);

        assert!(result.success);
        let record = result.data.unwrap();
        assert!((record.confidence - 1.0).abs() < f64::EPSILON);
        assert!(f.local.contains(StorageKey::LocalePreference));
        assert!(f.cookie.contains(StorageKey::LocalePreference));

        let event = last_event(&f);
        assert_eq!(event.event_type, StorageEventType::PreferenceSaved);
        assert_eq!(event.field("cookieSynced"), Some(&json!(true)));
    }

    #[test]
    fn load_round_trip_prefers_local() {
        let f = fixture();
        f.manager.save_preference(Locale::Zh, "browser", 0.7);

        let loaded = f.manager.load_preference();

        assert_eq!(loaded.source, Some(DataSource::LocalStorage));
        let record = loaded.data.unwrap();
        assert_eq!(record.locale, Locale::Zh);
        assert_eq!(record.source, "browser");
        assert_eq!(record.timestamp, T0);
    }

    #[test]
    fn load_falls_back_to_cookie() {
        let f = fixture();
        f.manager.save_preference(Locale::Zh, "user", 1.0);
        f.local.remove(StorageKey::LocalePreference).unwrap();

        let loaded = f.manager.load_preference();
        assert_eq!(loaded.source, Some(DataSource::Cookie));
        assert_eq!(loaded.data.unwrap().locale, Locale::Zh);
    }

    #[test]
    fn load_with_nothing_stored_is_empty_success() {
        let f = fixture();
        let loaded = f.manager.load_preference();
        assert!(loaded.success);
        assert!(loaded.data.is_none());
        assert_eq!(loaded.source, Some(DataSource::Default));
    }

    #[test]
    fn invalid_stored_preference_fails_closed() {
        let f = fixture();
        f.local
            .set(
                StorageKey::LocalePreference,
                r#"{"locale":"fr","source":"user","timestamp":1,"confidence":0.5}"#,
            )
            .unwrap();

        let loaded = f.manager.load_preference();

        assert!(!loaded.success);
        assert!(loaded
            .error
            .unwrap()
            .starts_with("Invalid preference data format"));
        assert_eq!(last_event(&f).event_type, StorageEventType::PreferenceError);
    }

    #[test]
    fn cookie_failure_does_not_fail_save() {
        let f = fixture();
        f.cookie.set_enabled(false);

        let result = f.manager.save_preference(Locale::En, "user", 1.0);

        assert!(result.success);
        assert!(!f.cookie.contains(StorageKey::LocalePreference));
        assert_eq!(last_event(&f).field("cookieSynced"), Some(&json!(false)));
    }

    #[test]
    fn local_failure_fails_save() {
        let f = fixture();
        f.local.set_enabled(false);
        let result = f.manager.save_preference(Locale::En, "user", 1.0);
        assert!(!result.success);
        assert!(!f.cookie.contains(StorageKey::LocalePreference));
    }

    #[test]
    fn override_lifecycle() {
        let f = fixture();
        assert!(f.manager.get_user_override().data.is_none());

        assert!(f.manager.set_user_override(Locale::Zh).success);
        assert_eq!(f.local.get(StorageKey::UserLocaleOverride).as_deref(), Some("zh"));
        assert_eq!(f.cookie.get(StorageKey::UserLocaleOverride).as_deref(), Some("zh"));
        assert_eq!(f.manager.get_user_override().data, Some(Locale::Zh));

        assert!(f.manager.clear_user_override().success);
        assert!(f.manager.get_user_override().data.is_none());
        assert!(!f.cookie.contains(StorageKey::UserLocaleOverride));
        assert_eq!(last_event(&f).event_type, StorageEventType::OverrideCleared);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let f = fixture();
        f.local.set(StorageKey::UserLocaleOverride, "klingon").unwrap();
        let result = f.manager.get_user_override();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("klingon"));
    }

    #[test]
    fn effective_locale_precedence() {
        let f = fixture();
        assert_eq!(f.manager.get_effective_locale(), Locale::En);

        f.manager.save_preference(Locale::Zh, "browser", 0.6);
        assert_eq!(f.manager.get_effective_locale(), Locale::Zh);

        f.manager.set_user_override(Locale::En);
        assert_eq!(f.manager.get_effective_locale(), Locale::En);

        f.manager.clear_user_override();
        assert_eq!(f.manager.get_effective_locale(), Locale::Zh);
    }
}

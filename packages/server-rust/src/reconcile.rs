//! Cross-backend integrity, presence and content checks, plus repair.
//!
//! Only keys mirrored to the cookie store take part in sync checks; the
//! detection history lives in the local store alone. Repairs copy from the
//! local store (system of record) to the cookie store, never the other way.
//!
//! Every check reads both backends afresh and always completes, so its
//! envelope succeeds; the verdict is in the report. A repair whose cookie
//! writes fail returns a failed envelope that still carries the report.

use std::collections::BTreeMap;
use std::sync::Arc;

use locale_store_core::clock::duration_millis;
use locale_store_core::{
    parse_history, parse_override, parse_preference, ClockSource, PreferenceRecord, StorageKey,
    StorageResult,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::events::{EventBus, StorageEvent, StorageEventType};
use crate::storage::KeyValueBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub in_sync: bool,
    pub issues: Vec<String>,
}

/// Content comparison. `issues` are disagreements; `warnings` are
/// tolerable drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRepair {
    pub fixed_issues: usize,
    pub actions: Vec<String>,
    /// Presence issues still present after the repair.
    pub remaining_issues: Vec<String>,
}

/// State of one key in one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum KeyState {
    Missing,
    Valid,
    Invalid { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValidation {
    pub local: KeyState,
    /// `None` for keys that are not mirrored to the cookie store.
    pub cookie: Option<KeyState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_keys: usize,
    pub valid_entries: usize,
    pub invalid_entries: usize,
    pub consistency_issues: usize,
    pub warnings: usize,
    pub sync_issues: usize,
    pub keys: BTreeMap<String, KeyValidation>,
}

pub struct ConsistencyChecker {
    local: Arc<dyn KeyValueBackend>,
    cookie: Arc<dyn KeyValueBackend>,
    clock: Arc<dyn ClockSource>,
    config: ReconcileConfig,
    events: Option<Arc<EventBus>>,
}

impl ConsistencyChecker {
    #[must_use]
    pub fn new(
        local: Arc<dyn KeyValueBackend>,
        cookie: Arc<dyn KeyValueBackend>,
        clock: Arc<dyn ClockSource>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            local,
            cookie,
            clock,
            config,
            events: None,
        }
    }

    /// Publishes `preference_sync` after repairs on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Checks that every stored value parses and validates.
    #[must_use]
    pub fn validate_storage_integrity(&self) -> StorageResult<IntegrityReport> {
        StorageResult::ok(self.integrity(), self.clock.now())
    }

    /// Checks that each mirrored key is present in both backends or neither.
    #[must_use]
    pub fn validate_storage_sync(&self) -> StorageResult<SyncReport> {
        StorageResult::ok(self.sync(), self.clock.now())
    }

    /// Compares mirrored values present in both backends.
    ///
    /// A locale disagreement is an issue; preference timestamps further
    /// apart than the drift threshold only warrant a warning.
    #[must_use]
    pub fn check_data_consistency(&self) -> StorageResult<ConsistencyReport> {
        StorageResult::ok(self.consistency(), self.clock.now())
    }

    /// Copies mirrored keys that exist only in the local store to the cookie
    /// store, then re-validates presence.
    pub fn fix_sync_issues(&self) -> StorageResult<SyncRepair> {
        let (repair, failed) = self.repair();
        let mut result = StorageResult::ok(repair, self.clock.now());
        if failed > 0 {
            result.success = false;
            result.error = Some(format!("{failed} sync repair(s) failed"));
        }
        result
    }

    /// Per-key validity across both backends plus aggregate counts.
    #[must_use]
    pub fn get_validation_summary(&self) -> StorageResult<ValidationSummary> {
        StorageResult::ok(self.summary(), self.clock.now())
    }

    fn integrity(&self) -> IntegrityReport {
        let mut issues = Vec::new();
        for key in StorageKey::ALL {
            for backend in self.backends_for(key) {
                if let KeyState::Invalid { reason } = self.key_state(backend, key) {
                    issues.push(format!(
                        "Invalid {key} in {} storage: {reason}",
                        backend.kind()
                    ));
                }
            }
        }
        IntegrityReport {
            is_valid: issues.is_empty(),
            issues,
        }
    }

    fn sync(&self) -> SyncReport {
        let mut issues = Vec::new();
        for key in StorageKey::mirrored() {
            match (self.local.contains(key), self.cookie.contains(key)) {
                (true, false) => issues.push(format!(
                    "{key} exists in local storage but not in cookie storage"
                )),
                (false, true) => issues.push(format!(
                    "{key} exists in cookie storage but not in local storage"
                )),
                _ => {}
            }
        }
        SyncReport {
            in_sync: issues.is_empty(),
            issues,
        }
    }

    fn consistency(&self) -> ConsistencyReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        self.compare_preferences(&mut issues, &mut warnings);
        self.compare_overrides(&mut issues, &mut warnings);
        ConsistencyReport {
            is_consistent: issues.is_empty(),
            issues,
            warnings,
        }
    }

    /// Returns the repair report and how many copies failed.
    fn repair(&self) -> (SyncRepair, usize) {
        let mut fixed_issues = 0;
        let mut failed = 0;
        let mut actions = Vec::new();
        for key in StorageKey::mirrored() {
            let Some(value) = self.local.get(key) else {
                continue;
            };
            if self.cookie.contains(key) {
                continue;
            }
            match self.cookie.set(key, &value) {
                Ok(()) => {
                    fixed_issues += 1;
                    actions.push(format!("Copied {key} from local storage to cookie storage"));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "sync repair failed");
                    failed += 1;
                    actions.push(format!("Failed to copy {key} to cookie storage: {e}"));
                }
            }
        }

        let remaining_issues = self.sync().issues;
        if fixed_issues > 0 {
            info!(fixed = fixed_issues, remaining = remaining_issues.len(), "repaired storage sync");
            metrics::counter!("locale_store_sync_repairs_total").increment(fixed_issues as u64);
            if let Some(bus) = &self.events {
                bus.emit_event(
                    StorageEvent::new(StorageEventType::PreferenceSync, "reconcile", self.clock.now())
                        .with_data(json!({ "fixedIssues": fixed_issues, "actions": actions })),
                );
            }
        }
        let repair = SyncRepair {
            fixed_issues,
            actions,
            remaining_issues,
        };
        (repair, failed)
    }

    fn summary(&self) -> ValidationSummary {
        let mut keys = BTreeMap::new();
        let mut valid_entries = 0;
        let mut invalid_entries = 0;
        for key in StorageKey::ALL {
            let local = self.key_state(self.local.as_ref(), key);
            let cookie = key
                .is_cookie_mirrored()
                .then(|| self.key_state(self.cookie.as_ref(), key));
            for state in std::iter::once(&local).chain(cookie.as_ref()) {
                match state {
                    KeyState::Valid => valid_entries += 1,
                    KeyState::Invalid { .. } => invalid_entries += 1,
                    KeyState::Missing => {}
                }
            }
            keys.insert(key.as_str().to_string(), KeyValidation { local, cookie });
        }

        let consistency = self.consistency();
        ValidationSummary {
            total_keys: keys.len(),
            valid_entries,
            invalid_entries,
            consistency_issues: consistency.issues.len(),
            warnings: consistency.warnings.len(),
            sync_issues: self.sync().issues.len(),
            keys,
        }
    }

    fn backends_for(&self, key: StorageKey) -> Vec<&dyn KeyValueBackend> {
        let mut backends: Vec<&dyn KeyValueBackend> = vec![self.local.as_ref()];
        if key.is_cookie_mirrored() {
            backends.push(self.cookie.as_ref());
        }
        backends
    }

    fn key_state(&self, backend: &dyn KeyValueBackend, key: StorageKey) -> KeyState {
        let Some(raw) = backend.get(key) else {
            return KeyState::Missing;
        };
        let now = self.clock.now();
        let outcome = match key {
            StorageKey::UserLocaleOverride => parse_override(&raw).map(|_| ()).map_err(|e| e.to_string()),
            StorageKey::LocalePreference => serde_json::from_str::<Value>(&raw)
                .map_err(|e| format!("malformed JSON: {e}"))
                .and_then(|v| parse_preference(&v, now).map(|_| ()).map_err(|e| e.to_string())),
            StorageKey::LocaleDetectionHistory => serde_json::from_str::<Value>(&raw)
                .map_err(|e| format!("malformed JSON: {e}"))
                .and_then(|v| parse_history(&v, now).map(|_| ()).map_err(|e| e.to_string())),
        };
        match outcome {
            Ok(()) => KeyState::Valid,
            Err(reason) => KeyState::Invalid { reason },
        }
    }

    fn compare_preferences(&self, issues: &mut Vec<String>, warnings: &mut Vec<String>) {
        let key = StorageKey::LocalePreference;
        let (Some(local_raw), Some(cookie_raw)) = (self.local.get(key), self.cookie.get(key)) else {
            return;
        };
        let now = self.clock.now();

        let local_json = serde_json::from_str::<Value>(&local_raw);
        let cookie_json = serde_json::from_str::<Value>(&cookie_raw);
        if cookie_json.is_err() {
            issues.push("Preference in cookie storage could not be parsed".to_string());
        }
        if local_json.is_err() {
            issues.push("Preference in local storage could not be parsed".to_string());
        }
        let (Ok(local_json), Ok(cookie_json)) = (local_json, cookie_json) else {
            return;
        };

        let local = parse_preference(&local_json, now);
        let cookie = parse_preference(&cookie_json, now);
        let (local, cookie): (PreferenceRecord, PreferenceRecord) = match (local, cookie) {
            (Ok(l), Ok(c)) => (l, c),
            (Err(_), Err(_)) => return,
            (Ok(_), Err(e)) => {
                warnings.push(format!(
                    "Preference in cookie storage failed validation, comparison skipped: {e}"
                ));
                return;
            }
            (Err(e), Ok(_)) => {
                warnings.push(format!(
                    "Preference in local storage failed validation, comparison skipped: {e}"
                ));
                return;
            }
        };

        if local.locale != cookie.locale {
            issues.push(format!(
                "Locale mismatch: local storage has {}, cookie storage has {}",
                local.locale, cookie.locale
            ));
        }
        let drift = local.timestamp.abs_diff(cookie.timestamp);
        if drift > duration_millis(self.config.timestamp_drift_threshold) {
            warnings.push(format!("Preference timestamps differ by {drift}ms"));
        }
    }

    fn compare_overrides(&self, issues: &mut Vec<String>, warnings: &mut Vec<String>) {
        let key = StorageKey::UserLocaleOverride;
        let (Some(local_raw), Some(cookie_raw)) = (self.local.get(key), self.cookie.get(key)) else {
            return;
        };
        match (parse_override(&local_raw), parse_override(&cookie_raw)) {
            (Ok(local), Ok(cookie)) if local != cookie => issues.push(format!(
                "Override mismatch: local storage has {local}, cookie storage has {cookie}"
            )),
            (Ok(_), Ok(_)) | (Err(_), Err(_)) => {}
            _ => warnings.push("Override failed validation in one backend, comparison skipped".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use locale_store_core::{Locale, ManualClock};

    use super::*;
    use crate::config::{CookieConfig, LocalStoreConfig};
    use crate::storage::{write_json, CookieStore, LocalStore};

    const T0: u64 = 1_700_000_000_000;

    struct Fixture {
        local: Arc<LocalStore>,
        cookie: Arc<CookieStore>,
        bus: Arc<EventBus>,
        checker: ConsistencyChecker,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(LocalStore::new(LocalStoreConfig::default()));
        let cookie = Arc::new(CookieStore::new(CookieConfig::default()));
        let bus = Arc::new(EventBus::new(20));
        let checker = ConsistencyChecker::new(
            local.clone(),
            cookie.clone(),
            Arc::new(ManualClock::new(T0)),
            ReconcileConfig::default(),
        )
        .with_events(bus.clone());
        Fixture {
            local,
            cookie,
            bus,
            checker,
        }
    }

    fn preference(locale: Locale, timestamp: u64) -> PreferenceRecord {
        PreferenceRecord {
            locale,
            source: "user".to_string(),
            timestamp,
            confidence: 1.0,
        }
    }

    fn store_pref(backend: &dyn KeyValueBackend, record: &PreferenceRecord) {
        write_json(backend, StorageKey::LocalePreference, record).unwrap();
    }

    #[test]
    fn checks_return_successful_envelopes() {
        let f = fixture();
        f.local.set(StorageKey::UserLocaleOverride, "zh").unwrap();

        let sync = f.checker.validate_storage_sync();
        assert!(sync.success);
        assert_eq!(sync.timestamp, T0);
        assert!(!sync.data.unwrap().in_sync);
        assert!(f.checker.validate_storage_integrity().success);
        assert!(f.checker.check_data_consistency().success);
        assert!(f.checker.get_validation_summary().success);
        assert!(f.checker.fix_sync_issues().success);
    }

    #[test]
    fn empty_stores_are_clean() {
        let f = fixture();
        assert!(f.checker.validate_storage_integrity().data.unwrap().is_valid);
        assert!(f.checker.validate_storage_sync().data.unwrap().in_sync);
        assert!(f.checker.check_data_consistency().data.unwrap().is_consistent);
    }

    #[test]
    fn integrity_flags_invalid_values() {
        let f = fixture();
        f.local.set(StorageKey::LocalePreference, "{not json").unwrap();
        f.cookie.set(StorageKey::UserLocaleOverride, "fr").unwrap();
        f.local
            .set(StorageKey::LocaleDetectionHistory, r#"{"history":[],"lastUpdated":1}"#)
            .unwrap();

        let report = f.checker.validate_storage_integrity().data.unwrap();

        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues[0].contains("locale_preference"));
        assert!(report.issues[0].contains("malformed JSON"));
        assert!(report.issues[1].contains("cookie"));
    }

    #[test]
    fn sync_reports_one_sided_keys() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        f.cookie.set(StorageKey::UserLocaleOverride, "zh").unwrap();

        let report = f.checker.validate_storage_sync().data.unwrap();

        assert!(!report.in_sync);
        assert_eq!(
            report.issues,
            vec![
                "locale_preference exists in local storage but not in cookie storage".to_string(),
                "user_locale_override exists in cookie storage but not in local storage".to_string(),
            ]
        );
    }

    #[test]
    fn history_is_never_a_sync_issue() {
        let f = fixture();
        f.local
            .set(StorageKey::LocaleDetectionHistory, r#"{"history":[],"lastUpdated":1}"#)
            .unwrap();
        assert!(f.checker.validate_storage_sync().data.unwrap().in_sync);
    }

    #[test]
    fn locale_mismatch_is_an_issue() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        store_pref(f.cookie.as_ref(), &preference(Locale::Zh, T0));

        let report = f.checker.check_data_consistency().data.unwrap();

        assert!(!report.is_consistent);
        assert_eq!(
            report.issues,
            vec!["Locale mismatch: local storage has en, cookie storage has zh".to_string()]
        );
    }

    #[test]
    fn timestamp_drift_is_only_a_warning() {
        let f = fixture();
        let two_minutes = duration_millis(Duration::from_secs(120));
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        store_pref(f.cookie.as_ref(), &preference(Locale::En, T0 - two_minutes));

        let report = f.checker.check_data_consistency().data.unwrap();

        assert!(report.is_consistent);
        assert_eq!(report.warnings, vec!["Preference timestamps differ by 120000ms".to_string()]);
    }

    #[test]
    fn small_drift_is_ignored() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        store_pref(f.cookie.as_ref(), &preference(Locale::En, T0 - 30_000));
        let report = f.checker.check_data_consistency().data.unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn unparseable_cookie_preference_is_an_issue() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        f.cookie.set(StorageKey::LocalePreference, "%%%").unwrap();

        let report = f.checker.check_data_consistency().data.unwrap();

        assert!(!report.is_consistent);
        assert!(report.issues[0].contains("cookie"));
    }

    #[test]
    fn override_mismatch_is_an_issue() {
        let f = fixture();
        f.local.set(StorageKey::UserLocaleOverride, "en").unwrap();
        f.cookie.set(StorageKey::UserLocaleOverride, " zh ").unwrap();
        let report = f.checker.check_data_consistency().data.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("Override mismatch"));
    }

    #[test]
    fn fix_copies_local_to_cookie() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::Zh, T0));
        f.local.set(StorageKey::UserLocaleOverride, "zh").unwrap();

        let repair = f.checker.fix_sync_issues().data.unwrap();

        assert_eq!(repair.fixed_issues, 2);
        assert_eq!(repair.actions.len(), 2);
        assert!(repair.remaining_issues.is_empty());
        assert_eq!(
            f.cookie.get(StorageKey::LocalePreference),
            f.local.get(StorageKey::LocalePreference)
        );
        assert!(f.checker.validate_storage_sync().data.unwrap().in_sync);
        let events = f.bus.get_event_history(None);
        assert_eq!(events.last().unwrap().event_type, StorageEventType::PreferenceSync);
    }

    #[test]
    fn fix_copies_local_only_override() {
        let f = fixture();
        f.local.set(StorageKey::UserLocaleOverride, "zh").unwrap();

        let repair = f.checker.fix_sync_issues().data.unwrap();

        assert_eq!(repair.fixed_issues, 1);
        assert_eq!(f.cookie.get(StorageKey::UserLocaleOverride).as_deref(), Some("zh"));
    }

    #[test]
    fn fix_with_nothing_to_do_writes_nothing() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        store_pref(f.cookie.as_ref(), &preference(Locale::En, T0));
        let before = f.cookie.get(StorageKey::LocalePreference);

        let repair = f.checker.fix_sync_issues().data.unwrap();

        assert_eq!(repair.fixed_issues, 0);
        assert!(repair.actions.is_empty());
        assert_eq!(f.cookie.get(StorageKey::LocalePreference), before);
        assert!(f.bus.get_event_history(None).is_empty());
    }

    #[test]
    fn fix_never_copies_cookie_to_local() {
        let f = fixture();
        f.cookie.set(StorageKey::UserLocaleOverride, "zh").unwrap();

        let repair = f.checker.fix_sync_issues().data.unwrap();

        assert_eq!(repair.fixed_issues, 0);
        assert!(!f.local.contains(StorageKey::UserLocaleOverride));
        assert_eq!(repair.remaining_issues.len(), 1);
    }

    #[test]
    fn fix_reports_failed_copy() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        f.cookie.set_enabled(false);

        let result = f.checker.fix_sync_issues();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("1 sync repair(s) failed"));
        let repair = result.data.unwrap();
        assert_eq!(repair.fixed_issues, 0);
        assert!(repair.actions[0].starts_with("Failed to copy"));
        assert_eq!(repair.remaining_issues.len(), 1);
    }

    #[test]
    fn summary_counts_states() {
        let f = fixture();
        store_pref(f.local.as_ref(), &preference(Locale::En, T0));
        store_pref(f.cookie.as_ref(), &preference(Locale::Zh, T0));
        f.local.set(StorageKey::UserLocaleOverride, "xx").unwrap();

        let summary = f.checker.get_validation_summary().data.unwrap();

        assert_eq!(summary.total_keys, 3);
        assert_eq!(summary.valid_entries, 2);
        assert_eq!(summary.invalid_entries, 1);
        assert_eq!(summary.consistency_issues, 1);
        assert_eq!(summary.sync_issues, 1);
        assert_eq!(
            summary.keys["locale_detection_history"],
            KeyValidation {
                local: KeyState::Missing,
                cookie: None
            }
        );
    }
}

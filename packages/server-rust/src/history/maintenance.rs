//! Cleanup, bulk import/export and backup of the detection history.
//!
//! Every operation reads through the manager, mutates a copy and writes back
//! only when something changed.

use std::collections::HashSet;
use std::time::Duration;

use locale_store_core::clock::duration_millis;
use locale_store_core::{parse_history, LocaleDetectionHistory, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::manager::{HistoryError, HistoryManager};
use crate::events::StorageEventType;

/// Format version written by [`HistoryManager::create_backup`].
pub const BACKUP_VERSION: u32 = 1;

/// Self-describing snapshot of the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBackup {
    pub version: u32,
    pub created_at: u64,
    /// Length in bytes of `data` serialized as JSON.
    pub size: usize,
    pub data: Value,
}

/// What [`HistoryManager::perform_maintenance`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    pub duplicates_removed: usize,
    pub overflow_removed: usize,
    pub remaining: usize,
}

impl MaintenanceReport {
    #[must_use]
    pub fn total_removed(&self) -> usize {
        self.expired_removed + self.duplicates_removed + self.overflow_removed
    }
}

impl HistoryManager {
    /// Removes records older than `max_age`. Returns how many were removed.
    pub fn cleanup_expired_detections(&self, max_age: Duration) -> StorageResult<usize> {
        let result = self.try_cleanup_expired(max_age);
        if let Ok(removed) = result {
            self.emit_cleanup("expired", removed);
        }
        self.conclude("cleanup_expired_detections", result)
    }

    /// Removes records whose `(locale, source, timestamp, confidence)` was
    /// already seen; the first occurrence (newest) wins.
    pub fn cleanup_duplicate_detections(&self) -> StorageResult<usize> {
        let result = self.try_cleanup_duplicates();
        if let Ok(removed) = result {
            self.emit_cleanup("duplicates", removed);
        }
        self.conclude("cleanup_duplicate_detections", result)
    }

    /// Keeps only the newest `max_records` records.
    pub fn limit_history_size(&self, max_records: usize) -> StorageResult<usize> {
        let result = self.try_limit(max_records);
        if let Ok(removed) = result {
            self.emit_cleanup("limit", removed);
        }
        self.conclude("limit_history_size", result)
    }

    /// Replaces the history with an empty one.
    pub fn clear_all_history(&self) -> StorageResult<()> {
        let result = {
            let guard = self.lock_writes();
            self.persist(&guard, &LocaleDetectionHistory::empty(self.now()))
        };
        if result.is_ok() {
            info!("cleared detection history");
            self.emit(StorageEventType::HistoryCleared, json!({}));
        }
        self.conclude("clear_all_history", result)
    }

    /// Returns the history as its stored JSON document.
    pub fn export_history(&self) -> StorageResult<Value> {
        let result = self.try_export();
        if let Ok(value) = &result {
            let records = value["history"].as_array().map_or(0, Vec::len);
            self.emit(StorageEventType::HistoryExport, json!({ "records": records }));
        }
        self.conclude("export_history", result)
    }

    /// Validates `data` and, if valid, replaces the stored history with it.
    ///
    /// Invalid input leaves the stored history untouched. Returns the number
    /// of imported records.
    pub fn import_history(&self, data: &Value) -> StorageResult<usize> {
        let result = self.try_import(data);
        if let Ok(records) = result {
            self.emit(StorageEventType::HistoryImport, json!({ "records": records }));
        }
        self.conclude("import_history", result)
    }

    pub fn create_backup(&self) -> StorageResult<HistoryBackup> {
        let result = self.try_export().and_then(|data| {
            let size = serde_json::to_string(&data)?.len();
            Ok(HistoryBackup {
                version: BACKUP_VERSION,
                created_at: self.now(),
                size,
                data,
            })
        });
        self.conclude("create_backup", result)
    }

    /// Restores a backup produced by [`Self::create_backup`].
    pub fn restore_from_backup(&self, backup: &HistoryBackup) -> StorageResult<usize> {
        if backup.version != BACKUP_VERSION {
            return self.conclude(
                "restore_from_backup",
                Err(HistoryError::UnsupportedBackupVersion {
                    found: backup.version,
                    expected: BACKUP_VERSION,
                }),
            );
        }
        self.import_history(&backup.data)
    }

    /// Runs expired, duplicate and size cleanup in sequence.
    pub fn perform_maintenance(&self) -> StorageResult<MaintenanceReport> {
        let result = self.try_maintenance();
        if let Ok(report) = &result {
            info!(
                expired = report.expired_removed,
                duplicates = report.duplicates_removed,
                overflow = report.overflow_removed,
                remaining = report.remaining,
                "history maintenance complete"
            );
            metrics::counter!("locale_store_history_maintenance_runs_total").increment(1);
            self.emit_cleanup("maintenance", report.total_removed());
        }
        self.conclude("perform_maintenance", result)
    }

    fn try_maintenance(&self) -> Result<MaintenanceReport, HistoryError> {
        let expired_removed = self.try_cleanup_expired(self.config.max_age)?;
        let duplicates_removed = self.try_cleanup_duplicates()?;
        let overflow_removed = self.try_limit(self.config.max_records)?;
        let remaining = self.load()?.0.len();
        Ok(MaintenanceReport {
            expired_removed,
            duplicates_removed,
            overflow_removed,
            remaining,
        })
    }

    fn try_cleanup_expired(&self, max_age: Duration) -> Result<usize, HistoryError> {
        let now = self.now();
        let max_age_ms = duration_millis(max_age);
        self.rewrite(|history| {
            history.history.retain(|r| !r.is_expired(now, max_age_ms));
        })
    }

    fn try_cleanup_duplicates(&self) -> Result<usize, HistoryError> {
        self.rewrite(|history| {
            let mut seen = HashSet::new();
            history.history.retain(|r| seen.insert(r.dedup_key()));
        })
    }

    fn try_limit(&self, max_records: usize) -> Result<usize, HistoryError> {
        self.rewrite(|history| history.history.truncate(max_records))
    }

    /// Applies `f` to the loaded history and persists it if records were
    /// removed. Returns the number removed.
    fn rewrite(
        &self,
        f: impl FnOnce(&mut LocaleDetectionHistory),
    ) -> Result<usize, HistoryError> {
        let guard = self.lock_writes();
        let (mut history, _) = self.load_locked(&guard)?;
        let before = history.len();
        f(&mut history);
        let removed = before - history.len();
        if removed > 0 {
            history.touch(self.now());
            self.persist(&guard, &history)?;
        }
        Ok(removed)
    }

    fn try_export(&self) -> Result<Value, HistoryError> {
        let (history, _) = self.load()?;
        Ok(serde_json::to_value(&history)?)
    }

    fn try_import(&self, data: &Value) -> Result<usize, HistoryError> {
        let mut history = parse_history(data, self.now())?;
        if history.len() > self.config.max_records {
            history.history.truncate(self.config.max_records);
            history.total_detections = history.len() as u64;
        }
        self.persist(&self.lock_writes(), &history)?;
        info!(records = history.len(), "imported detection history");
        Ok(history.len())
    }

    fn emit_cleanup(&self, kind: &str, removed: usize) {
        if removed > 0 {
            self.emit(
                StorageEventType::HistoryCleanup,
                json!({ "kind": kind, "removed": removed }),
            );
        }
    }
}

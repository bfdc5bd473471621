//! Persistent local [`KeyValueBackend`].
//!
//! Holds values in a [`DashMap`] and, when opened with a path, mirrors the
//! whole map to a JSON snapshot file after every mutation. The snapshot is
//! written to a sibling temp file and renamed into place so a crash never
//! leaves a half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use locale_store_core::StorageKey;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::LocalStoreConfig;
use crate::storage::backend::{BackendError, BackendKind, KeyValueBackend};

/// Quota-limited local store, optionally persisted to disk.
pub struct LocalStore {
    entries: DashMap<StorageKey, String>,
    quota_bytes: usize,
    persist_path: Option<PathBuf>,
    enabled: AtomicBool,
    // Serializes mutate-then-persist so snapshots never interleave.
    write_lock: Mutex<()>,
}

fn entry_size(key: StorageKey, value: &str) -> usize {
    key.as_str().len() + value.len()
}

fn io_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::Io {
        kind: BackendKind::Local,
        message: e.to_string(),
    }
}

impl LocalStore {
    /// Creates an in-memory store. `config.persist_path` is ignored; use
    /// [`LocalStore::open`] for a persisted one.
    #[must_use]
    pub fn new(config: LocalStoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            quota_bytes: config.quota_bytes,
            persist_path: None,
            enabled: AtomicBool::new(true),
            write_lock: Mutex::new(()),
        }
    }

    /// Opens a store persisted at `path`, loading any existing snapshot.
    ///
    /// Unknown keys in the snapshot are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Io`] if the file exists but cannot be read or
    /// is not a JSON object of strings.
    pub fn open(path: impl AsRef<Path>, config: LocalStoreConfig) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            persist_path: Some(path.clone()),
            ..Self::new(config)
        };

        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(io_error)?;
            let snapshot: BTreeMap<String, String> =
                serde_json::from_str(&raw).map_err(io_error)?;
            for (name, value) in snapshot {
                match StorageKey::from_name(&name) {
                    Some(key) => {
                        store.entries.insert(key, value);
                    }
                    None => warn!(name = %name, path = %path.display(), "skipping unknown key in local store snapshot"),
                }
            }
            debug!(path = %path.display(), keys = store.entries.len(), "loaded local store snapshot");
        }

        Ok(store)
    }

    /// Simulates local storage being unavailable (private mode, disabled).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Bytes used across all keys.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|e| entry_size(*e.key(), e.value()))
            .sum()
    }

    fn persist(&self) -> Result<(), BackendError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let snapshot: BTreeMap<&'static str, String> = self
            .entries
            .iter()
            .map(|e| (e.key().as_str(), e.value().clone()))
            .collect();
        let raw = serde_json::to_string_pretty(&snapshot).map_err(io_error)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(io_error)?;
        fs::rename(&tmp, path).map_err(io_error)
    }

    fn restore(&self, key: StorageKey, previous: Option<String>) {
        match previous {
            Some(value) => {
                self.entries.insert(key, value);
            }
            None => {
                self.entries.remove(&key);
            }
        }
    }
}

impl KeyValueBackend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn get(&self, key: StorageKey) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        self.entries.get(&key).map(|v| v.value().clone())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), BackendError> {
        if !self.is_enabled() {
            return Err(BackendError::Unavailable {
                kind: BackendKind::Local,
            });
        }
        let _guard = self.write_lock.lock();

        let replaced = self
            .entries
            .get(&key)
            .map_or(0, |v| entry_size(key, v.value()));
        let used = self.used_bytes() - replaced;
        let needed = entry_size(key, value);
        let available = self.quota_bytes.saturating_sub(used);
        if needed > available {
            warn!(key = %key, needed, available, "local store quota exceeded");
            return Err(BackendError::QuotaExceeded {
                kind: BackendKind::Local,
                key,
                needed,
                available,
            });
        }

        let previous = self.entries.insert(key, value.to_string());
        if let Err(e) = self.persist() {
            self.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), BackendError> {
        if !self.is_enabled() {
            return Err(BackendError::Unavailable {
                kind: BackendKind::Local,
            });
        }
        let _guard = self.write_lock.lock();

        let Some((_, previous)) = self.entries.remove(&key) else {
            return Ok(());
        };
        if let Err(e) = self.persist() {
            self.restore(key, Some(previous));
            return Err(e);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<StorageKey> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let mut keys: Vec<StorageKey> = self.entries.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }
}

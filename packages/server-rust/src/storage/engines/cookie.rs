//! Cookie-backed [`KeyValueBackend`].
//!
//! Models the browser cookie jar for one user context: small values, a hard
//! per-cookie byte limit, and the possibility of cookies being disabled.
//! Oversized writes are refused outright; nothing is ever truncated.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use locale_store_core::StorageKey;
use tracing::warn;

use crate::config::CookieConfig;
use crate::storage::backend::{BackendError, BackendKind, KeyValueBackend};

/// In-memory cookie jar with browser-like size limits.
pub struct CookieStore {
    entries: DashMap<StorageKey, String>,
    config: CookieConfig,
    enabled: AtomicBool,
}

impl CookieStore {
    #[must_use]
    pub fn new(config: CookieConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Simulates cookies being blocked (or re-enabled) by the client.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new(CookieConfig::default())
    }
}

impl KeyValueBackend for CookieStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
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
                kind: BackendKind::Cookie,
            });
        }
        let size = key.as_str().len() + value.len();
        if size > self.config.max_value_bytes {
            warn!(key = %key, size, max = self.config.max_value_bytes, "cookie value too large");
            return Err(BackendError::ValueTooLarge {
                key,
                size,
                max: self.config.max_value_bytes,
            });
        }
        self.entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), BackendError> {
        if !self.is_enabled() {
            return Err(BackendError::Unavailable {
                kind: BackendKind::Cookie,
            });
        }
        self.entries.remove(&key);
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

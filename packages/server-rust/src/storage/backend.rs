//! Key-value backend trait shared by the cookie and local stores.
//!
//! Backends store opaque strings (JSON for records, a bare locale code for
//! the override) under a [`StorageKey`]. No method panics or propagates an
//! exception past this layer: reads yield `None` when the backend is
//! unavailable and writes return a [`BackendError`].

use std::fmt;

use locale_store_core::{DataSource, StorageKey};
use serde::Serialize;
use serde_json::Value;

/// Which physical store a backend represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Browser-cookie store: small values, mirrored keys only.
    Cookie,
    /// Persistent local store: larger quota, system of record.
    Local,
}

impl BackendKind {
    /// Short lowercase name for logs and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Cookie => "cookie",
            BackendKind::Local => "local",
        }
    }

    /// The [`DataSource`] tag for results read from this backend.
    #[must_use]
    pub fn data_source(self) -> DataSource {
        match self {
            BackendKind::Cookie => DataSource::Cookie,
            BackendKind::Local => DataSource::LocalStorage,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure modes of a backend write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{kind} storage is unavailable")]
    Unavailable { kind: BackendKind },
    #[error("value for `{key}` is {size} bytes, limit is {max}")]
    ValueTooLarge {
        key: StorageKey,
        size: usize,
        max: usize,
    },
    #[error("{kind} storage quota exceeded writing `{key}`: needs {needed} bytes, {available} available")]
    QuotaExceeded {
        kind: BackendKind,
        key: StorageKey,
        needed: usize,
        available: usize,
    },
    #[error("failed to (de)serialize `{key}`: {message}")]
    Serialization { key: StorageKey, message: String },
    #[error("{kind} storage I/O failed: {message}")]
    Io { kind: BackendKind, message: String },
}

/// Synchronous string key-value store.
///
/// Used as `Arc<dyn KeyValueBackend>`.
pub trait KeyValueBackend: Send + Sync + 'static {
    /// Which store this is.
    fn kind(&self) -> BackendKind;

    /// Raw stored value, or `None` if absent or the store is unavailable.
    fn get(&self, key: StorageKey) -> Option<String>;

    /// Insert or replace the value for `key`.
    ///
    /// # Errors
    ///
    /// Size, quota, availability or I/O failures.
    fn set(&self, key: StorageKey, value: &str) -> Result<(), BackendError>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Availability or I/O failures.
    fn remove(&self, key: StorageKey) -> Result<(), BackendError>;

    /// Keys currently holding a value.
    fn keys(&self) -> Vec<StorageKey>;

    /// Whether `key` currently holds a value.
    fn contains(&self, key: StorageKey) -> bool {
        self.get(key).is_some()
    }
}

/// Reads `key` and parses it as JSON.
///
/// # Errors
///
/// [`BackendError::Serialization`] if the stored string is not valid JSON.
pub fn read_json(backend: &dyn KeyValueBackend, key: StorageKey) -> Result<Option<Value>, BackendError> {
    let Some(raw) = backend.get(key) else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| BackendError::Serialization {
            key,
            message: e.to_string(),
        })
}

/// Serializes `value` as JSON and writes it under `key`.
///
/// # Errors
///
/// Serialization failures or any error from [`KeyValueBackend::set`].
pub fn write_json<T: Serialize + ?Sized>(
    backend: &dyn KeyValueBackend,
    key: StorageKey,
    value: &T,
) -> Result<(), BackendError> {
    let raw = serde_json::to_string(value).map_err(|e| BackendError::Serialization {
        key,
        message: e.to_string(),
    })?;
    backend.set(key, &raw)
}

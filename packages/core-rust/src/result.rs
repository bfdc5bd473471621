//! Structured result envelope returned by every public manager operation.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Where the data in a [`StorageResult`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    /// In-process history cache.
    #[serde(rename = "memory")]
    Memory,
    /// Persistent local store.
    #[serde(rename = "localStorage")]
    LocalStorage,
    /// Cookie store.
    #[serde(rename = "cookie")]
    Cookie,
    /// Nothing stored; a default was returned.
    #[serde(rename = "default")]
    Default,
}

/// Outcome of a manager operation: `{success, data?, error?, timestamp, source?}`.
///
/// Managers never let errors escape their public API; they fold them into
/// this envelope instead. `success == true` with `data == None` means the
/// operation worked but there was nothing to return (e.g. no preference set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSource>,
}

impl<T> StorageResult<T> {
    /// Successful result carrying `data`.
    #[must_use]
    pub fn ok(data: T, timestamp: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp,
            source: None,
        }
    }

    /// Successful result with nothing to return.
    #[must_use]
    pub fn empty(timestamp: u64) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            timestamp,
            source: None,
        }
    }

    /// Failed result with a human-readable reason.
    #[must_use]
    pub fn failure(error: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp,
            source: None,
        }
    }

    /// Folds an internal `Result` into the envelope.
    #[must_use]
    pub fn from_result<E: Display>(result: Result<T, E>, timestamp: u64) -> Self {
        match result {
            Ok(data) => Self::ok(data, timestamp),
            Err(e) => Self::failure(e.to_string(), timestamp),
        }
    }

    /// Tags the result with the backend it was served from.
    #[must_use]
    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Transforms the payload, keeping status and metadata.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StorageResult<U> {
        StorageResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            timestamp: self.timestamp,
            source: self.source,
        }
    }

    /// Converts back into a `Result`, for callers that prefer `?`.
    ///
    /// # Errors
    ///
    /// Returns the error string when `success` is false.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

//! HTTP handler definitions for the locale server.
//!
//! Defines `AppState` (the shared state carried through axum extractors),
//! the envelope-to-response mapping shared by every API handler, and
//! re-exports all handler functions for building the router.

pub mod health;
pub mod history;
pub mod locale;
pub mod webhook;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use history::{
    add_detection_handler, cleanup_handler, export_handler, history_handler, import_handler,
    search_handler, stats_handler, summary_handler, trends_handler,
};
pub use locale::{
    clear_override_handler, consistency_handler, events_handler, fix_sync_handler,
    locale_handler, save_preference_handler, set_override_handler,
};
pub use webhook::{webhook_receive_handler, webhook_verify_handler};

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use locale_store_core::StorageResult;
use serde::Serialize;

use super::{Lifecycle, NetworkConfig};
use crate::store::LocaleStore;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The locale store served by this process.
    pub store: Arc<LocaleStore>,
    /// Health state and in-flight tracking.
    pub lifecycle: Arc<Lifecycle>,
    /// Network configuration (bind address, CORS, webhook secrets).
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Serializes `result` as JSON: 200 on success, `failure_status` otherwise.
pub(crate) fn envelope<T: Serialize>(result: StorageResult<T>, failure_status: StatusCode) -> Response {
    let status = if result.success {
        StatusCode::OK
    } else {
        failure_status
    };
    (status, Json(result)).into_response()
}

/// [`envelope`] with a 500 for failures.
pub(crate) fn respond<T: Serialize>(result: StorageResult<T>) -> Response {
    envelope(result, StatusCode::INTERNAL_SERVER_ERROR)
}

//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field says whether the server is
/// actually serving.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.lifecycle.health_state();
    let sync = state.store.checker().validate_storage_sync();

    Json(json!({
        "state": health.as_str(),
        "in_flight": state.lifecycle.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "event_listeners": state.store.events().listener_count(),
        "storage_in_sync": sync.data.is_some_and(|report| report.in_sync),
    }))
}

/// Liveness probe: always 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when ready, 503 while starting or draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.lifecycle.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

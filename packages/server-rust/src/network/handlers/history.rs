//! Detection-history endpoints.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{envelope, respond, AppState};
use crate::history::{
    DetectionQuery, DetectionStats, HistoryBackup, HistoryInsight, NewDetection,
    PerformanceMetrics, DEFAULT_TREND_DAYS,
};

/// `GET /api/locale/history`
///
/// With any filter or `limit` set, returns the matching records; otherwise
/// the whole history document.
pub async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<DetectionQuery>,
) -> Response {
    let history = state.store.history();
    if query.has_filters() || query.limit.is_some() {
        respond(history.query_detections(&query))
    } else {
        respond(history.get_detection_history())
    }
}

/// `POST /api/locale/history`
pub async fn add_detection_handler(
    State(state): State<AppState>,
    Json(detection): Json<NewDetection>,
) -> Response {
    respond(state.store.history().add_detection_record(detection))
}

/// `GET /api/locale/history/summary`
pub async fn summary_handler(State(state): State<AppState>) -> Response {
    respond(state.store.history().get_history_summary())
}

/// `POST /api/locale/history/cleanup`
pub async fn cleanup_handler(State(state): State<AppState>) -> Response {
    respond(state.store.history().perform_maintenance())
}

/// `GET /api/locale/history/export`
pub async fn export_handler(State(state): State<AppState>) -> Response {
    respond(state.store.history().create_backup())
}

/// `POST /api/locale/history/import`
///
/// Accepts either a backup produced by the export endpoint or a bare history
/// document. Invalid input is a 422 and leaves the stored history untouched.
pub async fn import_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let history = state.store.history();
    let result = match serde_json::from_value::<HistoryBackup>(body.clone()) {
        Ok(backup) => history.restore_from_backup(&backup),
        Err(_) => history.import_history(&body),
    };
    envelope(result, StatusCode::UNPROCESSABLE_ENTITY)
}

#[derive(Debug, Serialize)]
pub struct HistoryStatsResponse {
    pub stats: DetectionStats,
    pub insights: Vec<HistoryInsight>,
    pub performance: Option<PerformanceMetrics>,
}

/// `GET /api/locale/history/stats`
pub async fn stats_handler(State(state): State<AppState>) -> Response {
    let history = state.store.history();
    let insights = history.get_history_insights().data.unwrap_or_default();
    let performance = history.get_performance_metrics().data;
    respond(history.get_detection_stats().map(|stats| HistoryStatsResponse {
        stats,
        insights,
        performance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    pub days: Option<u32>,
}

/// `GET /api/locale/history/trends?days=N`
pub async fn trends_handler(
    State(state): State<AppState>,
    Query(query): Query<TrendsQuery>,
) -> Response {
    let days = query.days.unwrap_or(DEFAULT_TREND_DAYS);
    respond(state.store.history().get_detection_trends(days))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// `GET /api/locale/history/search?q=term`
pub async fn search_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    respond(state.store.history().search_detections(&query.q))
}

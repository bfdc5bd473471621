//! Preference, override, consistency and event endpoints.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use locale_store_core::{Locale, PreferenceRecord, StorageResult};
use serde::{Deserialize, Serialize};

use super::{respond, AppState};
use crate::events::StorageEvent;
use crate::reconcile::{ConsistencyReport, IntegrityReport, SyncReport, ValidationSummary};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleOverview {
    pub effective_locale: Locale,
    pub default_locale: Locale,
    pub user_override: Option<Locale>,
    pub preference: Option<PreferenceRecord>,
    pub supported_locales: Vec<Locale>,
}

/// `GET /api/locale`
pub async fn locale_handler(State(state): State<AppState>) -> Json<LocaleOverview> {
    let preferences = state.store.preferences();
    Json(LocaleOverview {
        effective_locale: preferences.get_effective_locale(),
        default_locale: state.store.config().default_locale,
        user_override: preferences.get_user_override().data,
        preference: preferences.load_preference().data,
        supported_locales: Locale::ALL.to_vec(),
    })
}

fn default_source() -> String {
    "user".to_string()
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct SavePreferenceRequest {
    pub locale: Locale,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// `PUT /api/locale/preference`
pub async fn save_preference_handler(
    State(state): State<AppState>,
    Json(request): Json<SavePreferenceRequest>,
) -> Response {
    respond(state.store.preferences().save_preference(
        request.locale,
        &request.source,
        request.confidence,
    ))
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub locale: Locale,
}

/// `PUT /api/locale/override`
pub async fn set_override_handler(
    State(state): State<AppState>,
    Json(request): Json<OverrideRequest>,
) -> Response {
    respond(state.store.preferences().set_user_override(request.locale))
}

/// `DELETE /api/locale/override`
pub async fn clear_override_handler(State(state): State<AppState>) -> Response {
    respond(state.store.preferences().clear_user_override())
}

#[derive(Debug, Serialize)]
pub struct ConsistencyOverview {
    pub integrity: StorageResult<IntegrityReport>,
    pub sync: StorageResult<SyncReport>,
    pub consistency: StorageResult<ConsistencyReport>,
    pub summary: StorageResult<ValidationSummary>,
}

/// `GET /api/locale/consistency`
pub async fn consistency_handler(State(state): State<AppState>) -> Json<ConsistencyOverview> {
    let checker = state.store.checker();
    Json(ConsistencyOverview {
        integrity: checker.validate_storage_integrity(),
        sync: checker.validate_storage_sync(),
        consistency: checker.check_data_consistency(),
        summary: checker.get_validation_summary(),
    })
}

/// `POST /api/locale/sync/fix`
pub async fn fix_sync_handler(State(state): State<AppState>) -> Response {
    respond(state.store.checker().fix_sync_issues())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// `GET /api/locale/events?limit=N`
pub async fn events_handler(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<StorageEvent>> {
    Json(state.store.events().get_event_history(query.limit))
}

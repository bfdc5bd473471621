//! WhatsApp webhook endpoints: subscription handshake and signed delivery.
//!
//! Message sending is handled elsewhere; deliveries are verified, counted
//! and logged.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use locale_store_core::webhook::{verify_token_matches, verify_webhook_signature};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::AppState;

/// Header carrying the `sha256=<hex>` payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// `GET /webhooks/whatsapp`: echoes `hub.challenge` when the mode is
/// `subscribe` and the token matches.
pub async fn webhook_verify_handler(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let Some(webhook) = &state.config.webhook else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let subscribed = params.mode.as_deref() == Some("subscribe")
        && params
            .verify_token
            .as_deref()
            .is_some_and(|token| verify_token_matches(&webhook.verify_token, token));
    match (subscribed, params.challenge) {
        (true, Some(challenge)) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!(mode = ?params.mode, "webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// `POST /webhooks/whatsapp`: rejects deliveries whose signature does not
/// match the configured app secret.
pub async fn webhook_receive_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(webhook) = &state.config.webhook else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(&body, signature, webhook.app_secret.as_bytes()) {
        warn!(has_signature = !signature.is_empty(), "webhook signature rejected");
        metrics::counter!("locale_store_webhook_rejected_total").increment(1);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook payload is not JSON");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let entries = payload["entry"].as_array().map_or(0, Vec::len);
    info!(
        object = payload["object"].as_str().unwrap_or("unknown"),
        entries,
        "webhook delivery accepted"
    );
    metrics::counter!("locale_store_webhook_deliveries_total").increment(1);
    (StatusCode::OK, Json(json!({ "received": true, "entries": entries }))).into_response()
}

#[cfg(test)]
mod tests {
    use locale_store_core::webhook::{compute_signature, SIGNATURE_PREFIX};

    use super::*;
    use crate::network::handlers::test_support::{body_json, body_text, test_state, test_state_with};
    use crate::network::{NetworkConfig, WebhookConfig};

    const SECRET: &str = "app-secret";

    fn configured() -> AppState {
        test_state_with(NetworkConfig {
            webhook: Some(WebhookConfig {
                app_secret: SECRET.to_string(),
                verify_token: "verify-me".to_string(),
            }),
            ..NetworkConfig::default()
        })
    }

    fn params(mode: &str, token: &str) -> VerifyParams {
        VerifyParams {
            mode: Some(mode.to_string()),
            verify_token: Some(token.to_string()),
            challenge: Some("1158201444".to_string()),
        }
    }

    fn signed(payload: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            format!("{SIGNATURE_PREFIX}{}", compute_signature(secret.as_bytes(), payload))
                .parse()
                .unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn verification_echoes_challenge() {
        let response =
            webhook_verify_handler(State(configured()), Query(params("subscribe", "verify-me"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "1158201444");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_token() {
        let response =
            webhook_verify_handler(State(configured()), Query(params("subscribe", "nope"))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn verification_rejects_near_miss_tokens() {
        for token in ["verify-mE", "verify-m", "verify-me "] {
            let response =
                webhook_verify_handler(State(configured()), Query(params("subscribe", token))).await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{token:?}");
        }
    }

    #[tokio::test]
    async fn unconfigured_webhook_is_not_found() {
        let response =
            webhook_verify_handler(State(test_state()), Query(params("subscribe", "verify-me"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signed_delivery_is_accepted() {
        let payload = br#"{"object":"whatsapp_business_account","entry":[{"id":"1"}]}"#;
        let response = webhook_receive_handler(
            State(configured()),
            signed(payload, SECRET),
            Bytes::from_static(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["entries"], 1);
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_unauthorized() {
        let payload = br#"{"entry":[]}"#;
        let response = webhook_receive_handler(
            State(configured()),
            signed(payload, "other-secret"),
            Bytes::from_static(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            webhook_receive_handler(State(configured()), HeaderMap::new(), Bytes::from_static(payload))
                .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_non_json_is_bad_request() {
        let payload = b"not json";
        let response = webhook_receive_handler(
            State(configured()),
            signed(payload, SECRET),
            Bytes::from_static(payload),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

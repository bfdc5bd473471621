//! HTTP middleware stack for the locale server.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::lifecycle::Lifecycle;

/// Wraps `router` in the transport-level middleware stack.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` assigns a UUID v4 `X-Request-Id` to every request
/// 2. `Tracing` logs request/response with structured spans
/// 3. `Compression` gzips responses
/// 4. `CORS` from the configured origins
/// 5. `Timeout` bounds request processing time
/// 6. `PropagateRequestId` copies `X-Request-Id` onto the response
pub fn apply_http_layers<S>(router: Router<S>, config: &NetworkConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let x_request_id = HeaderName::from_static("x-request-id");

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(build_cors_layer(&config.cors_origins))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.request_timeout,
            ))
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    )
}

/// Holds an in-flight guard for the duration of each request so shutdown
/// can wait for them to drain.
pub async fn track_in_flight(
    State(lifecycle): State<Arc<Lifecycle>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = lifecycle.in_flight_guard();
    next.run(request).await
}

/// A wildcard `"*"` allows any origin; otherwise each parseable origin is
/// added to an explicit allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

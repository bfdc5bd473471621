//! HTTP server with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves. The
//! split lets the binary start background workers between `start()` and
//! `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    add_detection_handler, cleanup_handler, clear_override_handler, consistency_handler,
    events_handler, export_handler, fix_sync_handler, health_handler, history_handler,
    import_handler, liveness_handler, locale_handler, readiness_handler, save_preference_handler,
    search_handler, set_override_handler, stats_handler, summary_handler, trends_handler,
    webhook_receive_handler, webhook_verify_handler, AppState,
};
use super::lifecycle::Lifecycle;
use super::middleware::{apply_http_layers, track_in_flight};
use crate::store::LocaleStore;

/// Serves a [`LocaleStore`] over HTTP.
pub struct LocaleServer {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    store: Arc<LocaleStore>,
    lifecycle: Arc<Lifecycle>,
}

impl LocaleServer {
    /// Creates a server without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, store: Arc<LocaleStore>) -> Self {
        Self {
            config,
            listener: None,
            store,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Assembles the router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /api/locale`; `PUT /api/locale/preference`;
    ///   `PUT|DELETE /api/locale/override`
    /// - `GET|POST /api/locale/history` and its `summary`, `cleanup`,
    ///   `export`, `import`, `stats`, `trends`, `search` sub-routes
    /// - `GET /api/locale/consistency`; `POST /api/locale/sync/fix`;
    ///   `GET /api/locale/events`
    /// - `GET|POST /webhooks/whatsapp`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            store: Arc::clone(&self.store),
            lifecycle: Arc::clone(&self.lifecycle),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/api/locale", get(locale_handler))
            .route("/api/locale/preference", put(save_preference_handler))
            .route(
                "/api/locale/override",
                put(set_override_handler).delete(clear_override_handler),
            )
            .route(
                "/api/locale/history",
                get(history_handler).post(add_detection_handler),
            )
            .route("/api/locale/history/summary", get(summary_handler))
            .route("/api/locale/history/cleanup", post(cleanup_handler))
            .route("/api/locale/history/export", get(export_handler))
            .route("/api/locale/history/import", post(import_handler))
            .route("/api/locale/history/stats", get(stats_handler))
            .route("/api/locale/history/trends", get(trends_handler))
            .route("/api/locale/history/search", get(search_handler))
            .route("/api/locale/consistency", get(consistency_handler))
            .route("/api/locale/sync/fix", post(fix_sync_handler))
            .route("/api/locale/events", get(events_handler))
            .route(
                "/webhooks/whatsapp",
                get(webhook_verify_handler).post(webhook_receive_handler),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.lifecycle),
                track_in_flight,
            ))
            .with_state(state);

        apply_http_layers(router, &self.config)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight
    /// requests for up to the configured drain timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let lifecycle = Arc::clone(&self.lifecycle);

        lifecycle.set_ready();
        info!("serving HTTP connections");

        let signal_lifecycle = Arc::clone(&lifecycle);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal_lifecycle.trigger_shutdown();
            })
            .await?;

        if lifecycle.wait_for_drain(self.config.drain_timeout).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = lifecycle.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}

//! Locale store HTTP server.
//!
//! Wires a [`LocaleStore`] to the HTTP surface, starts the maintenance and
//! telemetry workers, and serves until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use locale_store_core::{Locale, SystemClock};
use locale_store_server::config::{HistoryConfig, LocalStoreConfig, StoreConfig};
use locale_store_server::history::start_maintenance;
use locale_store_server::network::{LocaleServer, NetworkConfig, WebhookConfig};
use locale_store_server::telemetry::{LogSink, TelemetryReporter};
use locale_store_server::LocaleStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "locale-server", about = "Serves locale preferences and detection history over HTTP")]
struct Args {
    /// Bind address.
    #[arg(long, env = "LOCALE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port. 0 picks a free port.
    #[arg(long, env = "LOCALE_PORT", default_value_t = 8080)]
    port: u16,

    /// JSON snapshot file for the local store. Omit to keep data in memory.
    #[arg(long, env = "LOCALE_DATA_FILE")]
    data_file: Option<PathBuf>,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "LOCALE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "LOCALE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOCALE_LOG_JSON")]
    log_json: bool,

    /// Port for the Prometheus scrape endpoint. Disabled when unset.
    #[arg(long, env = "LOCALE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// WhatsApp app secret for webhook signature checks.
    #[arg(long, env = "WHATSAPP_APP_SECRET", requires = "webhook_verify_token")]
    webhook_secret: Option<String>,

    /// Token expected by the webhook subscription handshake.
    #[arg(long, env = "WHATSAPP_VERIFY_TOKEN", requires = "webhook_secret")]
    webhook_verify_token: Option<String>,

    /// Locale served when nothing is stored.
    #[arg(long, env = "LOCALE_DEFAULT", default_value = "en")]
    default_locale: Locale,

    /// Maximum detection records kept.
    #[arg(long, env = "LOCALE_MAX_RECORDS", default_value_t = 100)]
    max_records: usize,

    /// Seconds between scheduled maintenance checks.
    #[arg(long, env = "LOCALE_MAINTENANCE_INTERVAL_SECS", default_value_t = 3600)]
    maintenance_interval_secs: u64,
}

impl Args {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            history: HistoryConfig {
                max_records: self.max_records,
                ..HistoryConfig::default()
            },
            local: LocalStoreConfig {
                persist_path: self.data_file.clone(),
                ..LocalStoreConfig::default()
            },
            default_locale: self.default_locale,
            maintenance_interval: Duration::from_secs(self.maintenance_interval_secs),
            ..StoreConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        let webhook = match (&self.webhook_secret, &self.webhook_verify_token) {
            (Some(app_secret), Some(verify_token)) => Some(WebhookConfig {
                app_secret: app_secret.clone(),
                verify_token: verify_token.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            webhook,
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(port) = args.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()?;
        info!(port, "prometheus exporter listening");
    }

    let config = args.store_config();
    let telemetry_config = config.telemetry.clone();
    let maintenance_interval = config.maintenance_interval;
    let store = Arc::new(LocaleStore::new(config, Arc::new(SystemClock))?);

    let mut maintenance = start_maintenance(Arc::clone(store.history()), maintenance_interval);
    let mut telemetry = TelemetryReporter::start(Arc::new(LogSink), &telemetry_config);
    telemetry.attach(store.events());

    let mut server = LocaleServer::new(args.network_config(), Arc::clone(&store));
    let port = server.start().await?;
    info!(port, effective_locale = %store.effective_locale(), "locale server started");

    let result = server.serve(shutdown_signal()).await;

    maintenance.stop().await;
    telemetry.stop().await;
    store.shutdown();
    info!("locale server stopped");

    result
}

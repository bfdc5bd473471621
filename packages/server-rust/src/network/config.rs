//! Network configuration types for the locale server.

use std::time::Duration;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// How long to wait for in-flight requests after shutdown is signalled.
    pub drain_timeout: Duration,
    /// WhatsApp webhook settings. Webhook routes answer 404 when unset.
    pub webhook: Option<WebhookConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            webhook: None,
        }
    }
}

/// Webhook verification secrets.
///
/// No `Default` impl because secrets have no sensible defaults.
#[derive(Clone)]
pub struct WebhookConfig {
    /// App secret used to compute `X-Hub-Signature-256`.
    pub app_secret: String,
    /// Token echoed back by the subscription handshake.
    pub verify_token: String,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("app_secret", &"<redacted>")
            .field("verify_token", &"<redacted>")
            .finish()
    }
}

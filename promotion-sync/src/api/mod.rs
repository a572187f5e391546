//! API module - webhook listener handlers and middleware.

pub mod handlers;
pub mod middleware;
pub mod routes;

use crate::services::webhook_service::WebhookService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub webhook_service: Arc<WebhookService>,
    /// Shared secret for `X-JFrog-Event-Auth`; signatures are not checked when unset
    pub webhook_secret: Option<String>,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(webhook_service: Arc<WebhookService>) -> Self {
        Self {
            webhook_service,
            webhook_secret: None,
            metrics_handle: None,
        }
    }

    /// Require signed webhook deliveries.
    pub fn set_webhook_secret(&mut self, secret: impl Into<String>) {
        self.webhook_secret = Some(secret.into());
    }

    /// Set the Prometheus metrics handle for rendering /metrics output.
    pub fn set_metrics_handle(&mut self, handle: PrometheusHandle) {
        self.metrics_handle = Some(Arc::new(handle));
    }
}

pub type SharedState = Arc<AppState>;

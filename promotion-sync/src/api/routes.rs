//! Route definitions for the webhook listener.

use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::tracing::correlation_id_middleware;
use super::SharedState;
use crate::services::metrics_service::metrics_middleware;

/// Create the listener router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .nest(
            "/api/v1/webhooks",
            handlers::webhooks::router().layer(DefaultBodyLimit::max(1024 * 1024)), // 1 MB
        )
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
}

//! Health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::api::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub webhook_auth: bool,
}

/// Health check endpoint - basic liveness check
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        webhook_auth: state.webhook_secret.is_some(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [("content-type", "text/plain; charset=utf-8")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}

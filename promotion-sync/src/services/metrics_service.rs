//! Prometheus metrics for promotion replication and the webhook listener.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};

use crate::models::report::PairOutcome;

/// Initialize the Prometheus metrics recorder and return the handle for rendering.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Axum middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    histogram!("rbps_http_request_duration_seconds", "method" => method.clone(), "path" => path.clone(), "status" => status.clone()).record(duration);
    counter!("rbps_http_responses_total", "method" => method, "path" => path, "status" => status).increment(1);

    response
}

/// Record a promotion applied to the target.
pub fn record_promotion_replicated(environment: &str, executor: &str) {
    counter!("rbps_promotions_replicated_total", "environment" => environment.to_string(), "executor" => executor.to_string()).increment(1);
}

/// Record a promotion the executor failed to apply.
pub fn record_promotion_failed(environment: &str) {
    counter!("rbps_promotion_failures_total", "environment" => environment.to_string())
        .increment(1);
}

/// Record a timestamp alignment that failed after a successful promotion.
pub fn record_alignment_warning(environment: &str) {
    counter!("rbps_alignment_warnings_total", "environment" => environment.to_string())
        .increment(1);
}

/// Record the outcome of one bundle version.
pub fn record_pair_outcome(mode: &str, outcome: &PairOutcome) {
    counter!("rbps_pair_outcomes_total", "mode" => mode.to_string(), "outcome" => outcome.label())
        .increment(1);
}

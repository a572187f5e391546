//! Request span and correlation ID middleware for the webhook listener.
//!
//! Every webhook delivery runs inside an `http_request` span so the
//! replication logs of one delivery (and the OTLP spans, when enabled) can
//! be tied back to it.

use axum::{
    extract::Request,
    http::{header::HeaderValue, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// The header name for correlation IDs.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// W3C Trace Context header.
const TRACEPARENT_HEADER: &str = "traceparent";

/// Extension that holds the correlation ID for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the ID from `X-Correlation-ID`, then from the trace id of a
    /// `traceparent` header, and generate one otherwise.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        header(CORRELATION_ID_HEADER)
            .map(|id| Self(id.to_string()))
            .or_else(|| {
                header(TRACEPARENT_HEADER)
                    .and_then(|tp| tp.split('-').nth(1))
                    .filter(|trace_id| !trace_id.is_empty())
                    .map(|trace_id| Self(trace_id.to_string()))
            })
            .unwrap_or_else(Self::generate)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wrap the request in a span carrying its correlation ID and echo the ID
/// back on the response.
pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_headers(request.headers());
    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    request.extensions_mut().insert(correlation_id.clone());

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let mut response = next.run(request).await;

        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }

        tracing::info!(status = %response.status().as_u16(), "Request completed");
        response
    }
    .instrument(span)
    .await
}

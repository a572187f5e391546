//! Application error types and result alias.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::lifecycle_client::LifecycleError;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Stage of a pair's processing at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Discover,
    FetchSource,
    FetchTarget,
    Correlate,
    Preflight,
    Promote,
    Align,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStage::Discover => write!(f, "discover"),
            SyncStage::FetchSource => write!(f, "fetch_source"),
            SyncStage::FetchTarget => write!(f, "fetch_target"),
            SyncStage::Correlate => write!(f, "correlate"),
            SyncStage::Preflight => write!(f, "preflight"),
            SyncStage::Promote => write!(f, "promote"),
            SyncStage::Align => write!(f, "align"),
        }
    }
}

/// Errors raised while reconciling or replaying promotions.
///
/// Every variant carries the bundle coordinates so a failure can be
/// diagnosed from the log line alone.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("{stage} failed for {bundle}/{version}: {source}")]
    Fetch {
        stage: SyncStage,
        bundle: String,
        version: String,
        #[source]
        source: LifecycleError,
    },

    #[error("no promotion to '{environment}' found in history of {bundle}/{version}")]
    NoMatchingPromotion {
        bundle: String,
        version: String,
        environment: String,
    },

    #[error("promotion of {bundle}/{version} to '{environment}' failed: {source}")]
    Execution {
        bundle: String,
        version: String,
        environment: String,
        #[source]
        source: LifecycleError,
    },

    #[error("timestamp alignment of {bundle}/{version} promotion to '{environment}' failed: {source}")]
    Align {
        bundle: String,
        version: String,
        environment: String,
        #[source]
        source: LifecycleError,
    },
}

impl SyncError {
    pub fn stage(&self) -> SyncStage {
        match self {
            SyncError::Fetch { stage, .. } => *stage,
            SyncError::NoMatchingPromotion { .. } => SyncStage::Correlate,
            SyncError::Execution { .. } => SyncStage::Promote,
            SyncError::Align { .. } => SyncStage::Align,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Webhook signature missing or invalid
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg.clone()),
            AppError::Authentication(msg) => (StatusCode::UNAUTHORIZED, "AUTH_ERROR", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "JSON_ERROR",
                "Invalid JSON".to_string(),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(error = %self, code = code, "Request error");

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_carries_context() {
        let err = SyncError::NoMatchingPromotion {
            bundle: "app".to_string(),
            version: "1.0".to_string(),
            environment: "QA".to_string(),
        };
        assert_eq!(err.stage(), SyncStage::Correlate);
        let msg = err.to_string();
        assert!(msg.contains("app/1.0"));
        assert!(msg.contains("QA"));
    }

    #[test]
    fn test_fetch_error_reports_stage() {
        let err = SyncError::Fetch {
            stage: SyncStage::FetchTarget,
            bundle: "app".to_string(),
            version: "1.0".to_string(),
            source: LifecycleError::AuthError("expired".to_string()),
        };
        assert_eq!(err.stage(), SyncStage::FetchTarget);
        assert!(err.to_string().starts_with("fetch_target failed for app/1.0"));
    }

    #[test]
    fn test_malformed_json_maps_to_bad_request() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = AppError::Validation("webhook data is missing 'environment'".to_string());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_authentication_maps_to_unauthorized() {
        let err = AppError::Authentication("bad signature".to_string());
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}

//! JFrog Release Bundle v2 webhook receiver.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::api::SharedState;
use crate::error::{AppError, Result, SyncStage};
use crate::models::bundle::BundleVersionRef;
use crate::models::report::PairOutcome;
use crate::services::webhook_service::WebhookTrigger;

type HmacSha256 = Hmac<Sha256>;

/// Header JFrog puts the payload signature in.
pub const SIGNATURE_HEADER: &str = "X-JFrog-Event-Auth";

pub const RELEASE_BUNDLE_DOMAIN: &str = "release_bundle_v2";
pub const PROMOTION_COMPLETED_EVENT: &str = "promotion_completed";

/// Create webhook routes
pub fn router() -> Router<SharedState> {
    Router::new().route("/release-bundle", post(release_bundle_webhook))
}

/// Webhook envelope as sent by the JFrog Platform
#[derive(Debug, Deserialize)]
pub struct JfrogWebhookEvent {
    pub domain: String,
    pub event_type: String,
    #[serde(default)]
    pub data: ReleaseBundleEventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBundleEventData {
    pub release_bundle_name: Option<String>,
    pub release_bundle_version: Option<String>,
    pub environment: Option<String>,
    pub project_key: Option<String>,
    pub repository_key: Option<String>,
}

impl JfrogWebhookEvent {
    pub fn is_promotion_completed(&self) -> bool {
        self.domain == RELEASE_BUNDLE_DOMAIN && self.event_type == PROMOTION_COMPLETED_EVENT
    }

    pub fn to_trigger(&self) -> Result<WebhookTrigger> {
        let field = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AppError::Validation(format!("webhook data is missing '{}'", name)))
        };
        Ok(WebhookTrigger {
            bundle_name: field(&self.data.release_bundle_name, "release_bundle_name")?,
            bundle_version: field(&self.data.release_bundle_version, "release_bundle_version")?,
            environment_hint: field(&self.data.environment, "environment")?,
            repository_key: self.data.repository_key.clone().filter(|k| !k.is_empty()),
            project_key: self.data.project_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub bundle: BundleVersionRef,
    pub outcome: PairOutcome,
}

/// Verify the hex HMAC-SHA256 of `payload` against `signature`.
/// A `sha256=` prefix on the signature is accepted.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> Result<()> {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(signature)
        .map_err(|_| AppError::Authentication("malformed webhook signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::Authentication("webhook signature mismatch".into()))
}

/// Hex HMAC-SHA256 of `payload`, as JFrog computes it.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// HTTP status of a webhook reply: an uncorrelated event is 404, any other
/// failure is 502.
fn outcome_status(outcome: &PairOutcome) -> StatusCode {
    match outcome {
        PairOutcome::Failed {
            stage: SyncStage::Correlate,
            ..
        } => StatusCode::NOT_FOUND,
        PairOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    }
}

/// Receive a promotion webhook and replicate the promotion to the target.
pub async fn release_bundle_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Authentication(format!("missing {} header", SIGNATURE_HEADER)))?;
        verify_signature(secret, &body, signature)?;
    }

    let event: JfrogWebhookEvent = serde_json::from_slice(&body)?;
    if !event.is_promotion_completed() {
        tracing::debug!(
            domain = %event.domain,
            event_type = %event.event_type,
            "Ignoring webhook event"
        );
        return Ok((StatusCode::ACCEPTED, Json(json!({ "status": "ignored" }))).into_response());
    }

    let trigger = event.to_trigger()?;
    let outcome = state.webhook_service.handle(&trigger).await;
    let status = outcome_status(&outcome);

    Ok((
        status,
        Json(WebhookResponse {
            bundle: trigger.bundle(),
            outcome,
        }),
    )
        .into_response())
}

//! JFrog Lifecycle REST API client.
//!
//! This module provides a client for the `/lifecycle/api/v2` endpoints a
//! promotion sync needs: audit history, Release Bundle discovery, promotion
//! and promotion timestamp alignment. Transient failures on idempotent reads
//! are retried here with exponential backoff; callers never retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::models::bundle::{BundleSummary, BundleVersionRef};
use crate::models::promotion::{PromotionHistory, PromotionRecord};
use crate::services::lifecycle_api::{
    PromotionExecutor, PromotionReceipt, PromotionRequest, PromotionSource, TimestampAligner,
};

/// Errors that can occur when talking to a JPD or the JFrog CLI
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Command exited with status {status:?}: {stderr}")]
    CommandFailed { status: Option<i32>, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication method for a JPD
#[derive(Debug, Clone)]
pub enum LifecycleAuth {
    /// Access token sent as a bearer token
    AccessToken(String),
    /// Basic username/password authentication
    BasicAuth { username: String, password: String },
}

/// Retry configuration for exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay in milliseconds before first retry
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, delay_ms: u64) -> u64 {
        std::cmp::min(
            (delay_ms as f64 * self.backoff_multiplier) as u64,
            self.max_delay_ms,
        )
    }
}

/// Lifecycle client configuration
#[derive(Debug, Clone)]
pub struct LifecycleClientConfig {
    /// Base URL of the JPD (e.g. `https://jpd1.jfrog.io`)
    pub base_url: String,
    /// Authentication credentials
    pub auth: LifecycleAuth,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Delay between requests in milliseconds (for throttling)
    pub throttle_delay_ms: u64,
    /// Retry configuration for transient failures
    pub retry_config: RetryConfig,
}

impl Default for LifecycleClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth: LifecycleAuth::AccessToken(String::new()),
            timeout_secs: 30,
            throttle_delay_ms: 0,
            retry_config: RetryConfig::default(),
        }
    }
}

/// Lifecycle REST API client bound to one JPD
pub struct LifecycleClient {
    client: Client,
    base_url: Url,
    config: LifecycleClientConfig,
}

// ============ API Response Types ============

#[derive(Debug, Default, Deserialize)]
pub struct AuditResponse {
    #[serde(default)]
    pub audits: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditEvent {
    pub subject_type: Option<String>,
    pub event_status: Option<String>,
    pub subject_reference: Option<String>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    pub created_millis: Option<i64>,
    #[serde(default)]
    pub context: Option<AuditContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditContext {
    pub environment: Option<String>,
    pub included_repository_keys: Option<Vec<String>>,
    pub excluded_repository_keys: Option<Vec<String>>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    pub promotion_created_millis: Option<i64>,
}

impl AuditEvent {
    /// Whether this audit entry is a completed, locally-originated promotion.
    ///
    /// Federation mirror events carry a `FED-` subject reference and are
    /// replicated by Artifactory itself.
    pub fn is_replicable_promotion(&self) -> bool {
        if self.subject_type.as_deref() != Some("PROMOTION") {
            return false;
        }
        if let Some(status) = self.event_status.as_deref() {
            if status != "COMPLETED" {
                return false;
            }
        }
        !self
            .subject_reference
            .as_deref()
            .map(|reference| reference.starts_with("FED-"))
            .unwrap_or(false)
    }

    /// Project this audit entry onto a [`PromotionRecord`]. Returns `None`
    /// when the entry names no environment.
    pub fn to_record(&self, bundle: &BundleVersionRef) -> Option<PromotionRecord> {
        let context = self.context.clone().unwrap_or_default();
        let environment = context.environment.filter(|env| !env.is_empty())?;
        let mut record = PromotionRecord::new(
            bundle.clone(),
            environment,
            context.included_repository_keys.unwrap_or_default(),
            context.excluded_repository_keys.unwrap_or_default(),
        );
        record.created_millis = self.created_millis.or(context.promotion_created_millis);
        record.recorded_millis = context.promotion_created_millis;
        record.promotion_id = self.subject_reference.clone();
        Some(record)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBundleNamesResponse {
    #[serde(default)]
    pub release_bundles: Vec<ReleaseBundleNameItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseBundleNameItem {
    pub release_bundle_name: Option<String>,
    pub repository_key: Option<String>,
    pub project_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBundleVersionsResponse {
    #[serde(default)]
    pub release_bundles: Vec<ReleaseBundleVersionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseBundleVersionItem {
    pub release_bundle_version: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromoteRequestBody<'a> {
    pub environment: &'a str,
    pub included_repository_keys: Vec<&'a str>,
    pub excluded_repository_keys: Vec<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PromotionResponse {
    pub environment: Option<String>,
    pub promotion_id: Option<String>,
}

/// The API reports millis as either a number or a numeric string.
fn de_opt_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

impl LifecycleClient {
    /// Create a new Lifecycle client with the given configuration
    pub fn new(config: LifecycleClientConfig) -> Result<Self, LifecycleError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| LifecycleError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(LifecycleError::InvalidUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Build an endpoint URL from path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, LifecycleError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LifecycleError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Build an authenticated request
    fn auth_request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            LifecycleAuth::AccessToken(token) => builder.bearer_auth(token),
            LifecycleAuth::BasicAuth { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }

    /// Make a GET request with retry logic
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, LifecycleError> {
        self.request_with_retry(|| {
            self.auth_request(self.client.get(url.clone()).query(query))
                .send()
        })
        .await
    }

    /// Execute a request with retry logic and exponential backoff
    async fn request_with_retry<T, F, Fut>(&self, request_fn: F) -> Result<T, LifecycleError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let retry_config = &self.config.retry_config;
        let mut attempt = 0;
        let mut delay_ms = retry_config.initial_delay_ms;

        loop {
            if self.config.throttle_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.throttle_delay_ms)).await;
            }

            match request_fn().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 {
                        let retry_after = retry_after_secs(&response);

                        if attempt < retry_config.max_retries {
                            let wait_time = retry_after
                                .map(|s| s.saturating_mul(1000).min(retry_config.max_delay_ms))
                                .unwrap_or(delay_ms);
                            tracing::warn!(
                                "Rate limited, waiting {}ms before retry (attempt {}/{})",
                                wait_time,
                                attempt + 1,
                                retry_config.max_retries
                            );
                            tokio::time::sleep(Duration::from_millis(wait_time)).await;
                            attempt += 1;
                            delay_ms = retry_config.next_delay(delay_ms);
                            continue;
                        }
                        return Err(LifecycleError::RateLimited { retry_after });
                    }

                    if status.is_server_error() && attempt < retry_config.max_retries {
                        tracing::warn!(
                            "Server error {}, retrying in {}ms (attempt {}/{})",
                            status,
                            delay_ms,
                            attempt + 1,
                            retry_config.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt += 1;
                        delay_ms = retry_config.next_delay(delay_ms);
                        continue;
                    }

                    return self.handle_response(response).await;
                }
                Err(e) => {
                    if (e.is_connect() || e.is_timeout()) && attempt < retry_config.max_retries {
                        tracing::warn!(
                            "Network error: {}, retrying in {}ms (attempt {}/{})",
                            e,
                            delay_ms,
                            attempt + 1,
                            retry_config.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt += 1;
                        delay_ms = retry_config.next_delay(delay_ms);
                        continue;
                    }
                    return Err(LifecycleError::HttpError(e));
                }
            }
        }
    }

    /// Make a POST request. Not retried: promotions are not idempotent.
    async fn post<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        url: Url,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T, LifecycleError> {
        let request = self
            .auth_request(self.client.post(url).query(query))
            .json(body);
        self.send_once(request).await
    }

    /// Send a write-through GET exactly once.
    async fn get_once<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, LifecycleError> {
        self.send_once(self.auth_request(self.client.get(url).query(query)))
            .await
    }

    async fn send_once<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, LifecycleError> {
        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Handle the HTTP response. Empty success bodies decode as JSON `null`.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, LifecycleError> {
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            let body = if text.trim().is_empty() { "null" } else { text.as_str() };
            Ok(serde_json::from_str(body)?)
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(LifecycleError::AuthError(format!(
                "Authentication failed with status {}",
                status
            )))
        } else if status.as_u16() == 404 {
            Err(LifecycleError::NotFound(response.url().path().to_string()))
        } else if status.as_u16() == 429 {
            Err(LifecycleError::RateLimited {
                retry_after: retry_after_secs(&response),
            })
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(LifecycleError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }

    // ============ API Methods ============

    /// Ping the JPD to check it is reachable and the credentials work
    pub async fn ping(&self) -> Result<bool, LifecycleError> {
        let url = self.endpoint(&["artifactory", "api", "system", "ping"])?;
        let response = self.auth_request(self.client.get(url)).send().await?;
        Ok(response.status().is_success())
    }

    /// Raw audit trail of a bundle version
    pub async fn get_audit(
        &self,
        bundle: &BundleVersionRef,
        repository_key: Option<&str>,
    ) -> Result<AuditResponse, LifecycleError> {
        let url = self.endpoint(&[
            "lifecycle",
            "api",
            "v2",
            "audit",
            &bundle.name,
            &bundle.version,
        ])?;
        let mut query = vec![("project", bundle.project_or_default().to_string())];
        if let Some(repository_key) = repository_key {
            query.push(("repository_key", repository_key.to_string()));
        }
        let response: Option<AuditResponse> = self.get(url, &query).await?;
        Ok(response.unwrap_or_default())
    }

    /// Completed promotion history of a bundle version, oldest first.
    /// A version the JPD has never seen has an empty history.
    pub async fn get_promotion_history(
        &self,
        bundle: &BundleVersionRef,
        repository_key: Option<&str>,
    ) -> Result<PromotionHistory, LifecycleError> {
        let audit = match self.get_audit(bundle, repository_key).await {
            Ok(audit) => audit,
            Err(LifecycleError::NotFound(_)) => {
                tracing::debug!(instance = self.base_url(), bundle = %bundle, "No audit trail");
                return Ok(PromotionHistory::default());
            }
            Err(e) => return Err(e),
        };

        let records = audit
            .audits
            .iter()
            .filter(|event| event.is_replicable_promotion())
            .filter_map(|event| {
                let record = event.to_record(bundle);
                if record.is_none() {
                    tracing::warn!(
                        bundle = %bundle,
                        subject_reference = ?event.subject_reference,
                        "Promotion audit entry has no environment, skipping"
                    );
                }
                record
            })
            .collect();

        Ok(PromotionHistory::from_unordered(records))
    }

    /// List Release Bundle names with their project and repository keys
    pub async fn list_release_bundle_names(
        &self,
    ) -> Result<ReleaseBundleNamesResponse, LifecycleError> {
        let url = self.endpoint(&["lifecycle", "api", "v2", "release_bundle", "names"])?;
        let response: Option<ReleaseBundleNamesResponse> = self.get(url, &[]).await?;
        Ok(response.unwrap_or_default())
    }

    /// List the versions of one Release Bundle
    pub async fn list_release_bundle_versions(
        &self,
        bundle_name: &str,
        project_key: &str,
    ) -> Result<ReleaseBundleVersionsResponse, LifecycleError> {
        let url = self.endpoint(&[
            "lifecycle",
            "api",
            "v2",
            "release_bundle",
            "records",
            bundle_name,
        ])?;
        let response: Option<ReleaseBundleVersionsResponse> = self
            .get(url, &[("project", project_key.to_string())])
            .await?;
        Ok(response.unwrap_or_default())
    }

    /// Promote a bundle version to an environment
    pub async fn promote_release_bundle(
        &self,
        request: &PromotionRequest,
    ) -> Result<Option<PromotionResponse>, LifecycleError> {
        let url = self.endpoint(&[
            "lifecycle",
            "api",
            "v2",
            "promotion",
            "records",
            &request.bundle.name,
            &request.bundle.version,
        ])?;
        let body = PromoteRequestBody {
            environment: &request.environment,
            included_repository_keys: request
                .included_repositories
                .iter()
                .map(String::as_str)
                .collect(),
            excluded_repository_keys: request
                .excluded_repositories
                .iter()
                .map(String::as_str)
                .collect(),
        };
        let query = [
            ("project", request.bundle.project_or_default().to_string()),
            ("async", "false".to_string()),
        ];
        self.post(url, &query, &body).await
    }

    /// Rewrite the creation time of the newest promotion record of a bundle
    /// version. This is a write, so it is sent once.
    pub async fn update_promotion_created_millis(
        &self,
        bundle: &BundleVersionRef,
        created_millis: i64,
    ) -> Result<serde_json::Value, LifecycleError> {
        let url = self.endpoint(&[
            "lifecycle",
            "api",
            "v2",
            "promotion",
            "records",
            &bundle.name,
            &bundle.version,
        ])?;
        let query = [
            ("project", bundle.project_or_default().to_string()),
            ("operation", "copy".to_string()),
            ("promotion_created_millis", created_millis.to_string()),
        ];
        let response: Option<serde_json::Value> = self.get_once(url, &query).await?;
        Ok(response.unwrap_or(serde_json::Value::Null))
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

#[async_trait]
impl PromotionSource for LifecycleClient {
    async fn fetch_promotion_history(
        &self,
        bundle: &BundleVersionRef,
        repository_key: Option<&str>,
    ) -> Result<PromotionHistory, LifecycleError> {
        self.get_promotion_history(bundle, repository_key).await
    }

    async fn list_bundles(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<BundleSummary>, LifecycleError> {
        let response = self.list_release_bundle_names().await?;
        let bundles = response
            .release_bundles
            .into_iter()
            .filter_map(|item| {
                let name = item.release_bundle_name.filter(|name| !name.is_empty());
                let Some(name) = name else {
                    tracing::warn!(
                        instance = self.base_url(),
                        "Skipping Release Bundle entry without a name"
                    );
                    return None;
                };
                Some(BundleSummary {
                    name,
                    project_key: item.project_key,
                    repository_key: item.repository_key,
                })
            })
            .filter(|bundle| match project_key {
                Some(project) => bundle.project_or_default() == project,
                None => true,
            })
            .collect();
        Ok(bundles)
    }

    async fn list_versions(
        &self,
        bundle_name: &str,
        project_key: Option<&str>,
    ) -> Result<Vec<String>, LifecycleError> {
        let project = project_key.unwrap_or(crate::models::bundle::DEFAULT_PROJECT_KEY);
        let response = self.list_release_bundle_versions(bundle_name, project).await?;
        Ok(response
            .release_bundles
            .into_iter()
            .filter_map(|item| item.release_bundle_version)
            .filter(|version| !version.is_empty())
            .collect())
    }

    fn instance_url(&self) -> &str {
        self.base_url()
    }
}

#[async_trait]
impl PromotionExecutor for LifecycleClient {
    async fn promote(&self, request: &PromotionRequest) -> Result<PromotionReceipt, LifecycleError> {
        let response = self.promote_release_bundle(request).await?.unwrap_or_default();
        Ok(PromotionReceipt {
            promotion_id: response.promotion_id,
        })
    }

    fn executor_type(&self) -> &'static str {
        "rest"
    }
}

/// Offset added to the source timestamp when rewriting a target record, so
/// the replica sorts strictly after the event it copies.
pub const ALIGNMENT_OFFSET_MILLIS: i64 = 1;

#[async_trait]
impl TimestampAligner for LifecycleClient {
    async fn set_promotion_timestamp(
        &self,
        bundle: &BundleVersionRef,
        promotion_id: Option<&str>,
        created_millis: i64,
    ) -> Result<(), LifecycleError> {
        let millis = created_millis.saturating_add(ALIGNMENT_OFFSET_MILLIS);
        tracing::debug!(
            bundle = %bundle,
            promotion_id = ?promotion_id,
            promotion_created_millis = millis,
            "Aligning promotion timestamp"
        );
        self.update_promotion_created_millis(bundle, millis).await?;
        Ok(())
    }
}

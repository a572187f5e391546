//! Common test utilities for promotion sync integration tests
//!
//! This module provides shared infrastructure for testing:
//! - `FakeJpd`, an in-memory JPD implementing every collaborator trait
//! - `MockLifecycleServer`, an axum server speaking the Lifecycle REST API

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use rb_promotion_sync::models::bundle::{BundleSummary, BundleVersionRef};
use rb_promotion_sync::models::promotion::{PromotionHistory, PromotionRecord};
use rb_promotion_sync::services::lifecycle_api::{
    PromotionExecutor, PromotionReceipt, PromotionRequest, PromotionSource, TimestampAligner,
};
use rb_promotion_sync::services::lifecycle_client::{
    LifecycleAuth, LifecycleClient, LifecycleClientConfig, LifecycleError, RetryConfig,
};

type HistoryKey = (String, String);

/// In-memory JPD. Promotions applied to it are appended to its own history,
/// so it can serve as both source and target of a replication.
pub struct FakeJpd {
    url: String,
    bundles: Mutex<Vec<BundleSummary>>,
    histories: Mutex<HashMap<HistoryKey, Vec<PromotionRecord>>>,
    clock: Mutex<i64>,
    pub promote_calls: AtomicUsize,
    pub align_calls: AtomicUsize,
    fail_environment: Mutex<Option<String>>,
}

impl FakeJpd {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            bundles: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            clock: Mutex::new(1_000),
            promote_calls: AtomicUsize::new(0),
            align_calls: AtomicUsize::new(0),
            fail_environment: Mutex::new(None),
        })
    }

    fn key(bundle: &BundleVersionRef) -> HistoryKey {
        (bundle.name.clone(), bundle.version.clone())
    }

    fn tick(&self) -> i64 {
        let mut clock = self.clock.lock().unwrap();
        *clock += 10;
        *clock
    }

    /// Register a bundle name for discovery
    pub fn add_bundle(&self, name: &str, project_key: Option<&str>) {
        self.bundles.lock().unwrap().push(BundleSummary {
            name: name.to_string(),
            project_key: project_key.map(str::to_string),
            repository_key: Some("release-bundles-v2".to_string()),
        });
    }

    /// Record a promotion performed directly on this JPD
    pub fn record_promotion(&self, bundle: &BundleVersionRef, environment: &str, repos: &[&str]) {
        let at = self.tick();
        let record = PromotionRecord::new(
            bundle.clone(),
            environment,
            repos.iter().copied(),
            Vec::<&str>::new(),
        )
        .with_created_millis(at)
        .with_recorded_millis(at);
        self.histories
            .lock()
            .unwrap()
            .entry(Self::key(bundle))
            .or_default()
            .push(record);
    }

    /// Make every promotion to `environment` fail
    pub fn fail_promotions_to(&self, environment: &str) {
        *self.fail_environment.lock().unwrap() = Some(environment.to_string());
    }

    pub fn history(&self, bundle: &BundleVersionRef) -> Vec<PromotionRecord> {
        self.histories
            .lock()
            .unwrap()
            .get(&Self::key(bundle))
            .cloned()
            .unwrap_or_default()
    }

    pub fn environments(&self, bundle: &BundleVersionRef) -> Vec<String> {
        self.history(bundle)
            .into_iter()
            .map(|record| record.environment)
            .collect()
    }

    pub fn promote_count(&self) -> usize {
        self.promote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromotionSource for FakeJpd {
    async fn fetch_promotion_history(
        &self,
        bundle: &BundleVersionRef,
        _repository_key: Option<&str>,
    ) -> Result<PromotionHistory, LifecycleError> {
        Ok(PromotionHistory::from_unordered(self.history(bundle)))
    }

    async fn list_bundles(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<BundleSummary>, LifecycleError> {
        Ok(self
            .bundles
            .lock()
            .unwrap()
            .iter()
            .filter(|bundle| project_key.map_or(true, |p| bundle.project_or_default() == p))
            .cloned()
            .collect())
    }

    async fn list_versions(
        &self,
        bundle_name: &str,
        _project_key: Option<&str>,
    ) -> Result<Vec<String>, LifecycleError> {
        let mut versions: Vec<String> = self
            .histories
            .lock()
            .unwrap()
            .keys()
            .filter(|(name, _)| name == bundle_name)
            .map(|(_, version)| version.clone())
            .collect();
        versions.sort();
        Ok(versions)
    }

    fn instance_url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PromotionExecutor for FakeJpd {
    async fn promote(&self, request: &PromotionRequest) -> Result<PromotionReceipt, LifecycleError> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_environment.lock().unwrap().as_deref() == Some(request.environment.as_str()) {
            return Err(LifecycleError::ApiError {
                status: 400,
                message: format!("environment {} does not exist", request.environment),
            });
        }
        let at = self.tick();
        let record = PromotionRecord {
            bundle: request.bundle.clone(),
            environment: request.environment.clone(),
            included_repositories: request.included_repositories.clone(),
            excluded_repositories: request.excluded_repositories.clone(),
            created_millis: Some(at),
            recorded_millis: Some(at),
            promotion_id: None,
        };
        self.histories
            .lock()
            .unwrap()
            .entry(Self::key(&request.bundle))
            .or_default()
            .push(record);
        Ok(PromotionReceipt::default())
    }

    fn executor_type(&self) -> &'static str {
        "fake"
    }
}

#[async_trait]
impl TimestampAligner for FakeJpd {
    async fn set_promotion_timestamp(
        &self,
        bundle: &BundleVersionRef,
        _promotion_id: Option<&str>,
        created_millis: i64,
    ) -> Result<(), LifecycleError> {
        self.align_calls.fetch_add(1, Ordering::SeqCst);
        let mut histories = self.histories.lock().unwrap();
        let latest = histories
            .get_mut(&Self::key(bundle))
            .and_then(|records| records.last_mut())
            .ok_or_else(|| LifecycleError::NotFound(bundle.to_string()))?;
        latest.created_millis = Some(created_millis);
        Ok(())
    }
}

/// A request seen by the mock Lifecycle server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

/// Canned responses and request log of the mock Lifecycle server
#[derive(Default)]
pub struct MockLifecycleState {
    pub requests: Mutex<Vec<RecordedRequest>>,
    /// Audit documents keyed by "name/version"
    pub audits: Mutex<HashMap<String, Value>>,
    /// Number of failed responses to return before serving audits
    pub audit_failures: AtomicUsize,
    /// When set, audit failures are 429s carrying this `Retry-After` value
    /// instead of 503s
    pub audit_retry_after: Mutex<Option<String>>,
    /// Status returned for promotions
    pub promote_status: Mutex<Option<StatusCode>>,
    /// Status returned for timestamp alignment
    pub align_status: Mutex<Option<StatusCode>>,
}

impl MockLifecycleState {
    pub fn requests_to(&self, method: &str, path_prefix: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .cloned()
            .collect()
    }
}

/// Axum stand-in for the Lifecycle REST API on an ephemeral port
pub struct MockLifecycleServer {
    pub addr: SocketAddr,
    pub state: Arc<MockLifecycleState>,
}

impl MockLifecycleServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockLifecycleState::default());
        let app = Router::new()
            .route("/artifactory/api/system/ping", get(|| async { "OK" }))
            .route("/lifecycle/api/v2/audit/:name/:version", get(audit))
            .route("/lifecycle/api/v2/release_bundle/names", get(names))
            .route("/lifecycle/api/v2/release_bundle/records/:name", get(versions))
            .route(
                "/lifecycle/api/v2/promotion/records/:name/:version",
                get(align).post(promote),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_audit(&self, name: &str, version: &str, audit: Value) {
        self.state
            .audits
            .lock()
            .unwrap()
            .insert(format!("{}/{}", name, version), audit);
    }

    /// Client with fast retries pointed at this server
    pub fn client(&self) -> LifecycleClient {
        LifecycleClient::new(LifecycleClientConfig {
            base_url: self.url(),
            auth: LifecycleAuth::AccessToken("test-token".to_string()),
            timeout_secs: 5,
            throttle_delay_ms: 0,
            retry_config: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
            },
        })
        .unwrap()
    }
}

fn record(
    state: &MockLifecycleState,
    method: &str,
    path: String,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Option<Value>,
) {
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path,
        query: query.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
}

async fn audit(
    State(state): State<Arc<MockLifecycleState>>,
    Path((name, version)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/lifecycle/api/v2/audit/{}/{}", name, version);
    record(&state, "GET", path, &query, &headers, None);

    if state
        .audit_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        if let Some(retry_after) = state.audit_retry_after.lock().unwrap().clone() {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after)],
            )
                .into_response();
        }
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match state
        .audits
        .lock()
        .unwrap()
        .get(&format!("{}/{}", name, version))
    {
        Some(audit) => Json(audit.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn names(
    State(state): State<Arc<MockLifecycleState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    record(
        &state,
        "GET",
        "/lifecycle/api/v2/release_bundle/names".to_string(),
        &query,
        &headers,
        None,
    );
    Json(json!({
        "release_bundles": [
            {"release_bundle_name": "app", "project_key": "default", "repository_key": "release-bundles-v2"},
            {"release_bundle_name": "web-app", "project_key": "web", "repository_key": "web-release-bundles-v2"},
            {"release_bundle_name": "", "project_key": "default"}
        ]
    }))
}

async fn versions(
    State(state): State<Arc<MockLifecycleState>>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let path = format!("/lifecycle/api/v2/release_bundle/records/{}", name);
    record(&state, "GET", path, &query, &headers, None);
    Json(json!({
        "release_bundles": [
            {"release_bundle_version": "1.0"},
            {"release_bundle_version": "2.0"}
        ]
    }))
}

async fn promote(
    State(state): State<Arc<MockLifecycleState>>,
    Path((name, version)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/lifecycle/api/v2/promotion/records/{}/{}", name, version);
    record(&state, "POST", path, &query, &headers, Some(body.clone()));

    if let Some(status) = *state.promote_status.lock().unwrap() {
        return (status, "promotion rejected").into_response();
    }
    Json(json!({
        "promotion_id": "PRM-1",
        "environment": body["environment"],
        "created_millis": 1700000009000_i64
    }))
    .into_response()
}

async fn align(
    State(state): State<Arc<MockLifecycleState>>,
    Path((name, version)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> StatusCode {
    let path = format!("/lifecycle/api/v2/promotion/records/{}/{}", name, version);
    record(&state, "GET", path, &query, &headers, None);
    state.align_status.lock().unwrap().unwrap_or(StatusCode::OK)
}

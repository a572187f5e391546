//! Collaborator seams between the promotion sync core and a JPD.
//!
//! The reconciler and replay driver only see these traits. `LifecycleClient`
//! implements all three against the REST API and `JfCliExecutor` implements
//! [`PromotionExecutor`] through the JFrog CLI, so either can drive a replay.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::bundle::{BundleSummary, BundleVersionRef};
use crate::models::promotion::{PromotionHistory, PromotionRecord};
use crate::services::lifecycle_client::LifecycleError;

/// Read side of a JPD: promotion history and bundle discovery.
#[async_trait]
pub trait PromotionSource: Send + Sync {
    /// Full promotion history of one bundle version, oldest first
    async fn fetch_promotion_history(
        &self,
        bundle: &BundleVersionRef,
        repository_key: Option<&str>,
    ) -> Result<PromotionHistory, LifecycleError>;

    /// Release Bundle names, optionally restricted to one project
    async fn list_bundles(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<BundleSummary>, LifecycleError>;

    /// Versions of one Release Bundle
    async fn list_versions(
        &self,
        bundle_name: &str,
        project_key: Option<&str>,
    ) -> Result<Vec<String>, LifecycleError>;

    /// Base URL of the instance, for logging
    fn instance_url(&self) -> &str;
}

/// A promotion to perform on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionRequest {
    pub bundle: BundleVersionRef,
    pub environment: String,
    pub included_repositories: BTreeSet<String>,
    pub excluded_repositories: BTreeSet<String>,
}

impl PromotionRequest {
    pub fn from_record(record: &PromotionRecord) -> Self {
        Self {
            bundle: record.bundle.clone(),
            environment: record.environment.clone(),
            included_repositories: record.included_repositories.clone(),
            excluded_repositories: record.excluded_repositories.clone(),
        }
    }
}

/// What the executor learned about the promotion it created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionReceipt {
    pub promotion_id: Option<String>,
}

/// Applies a promotion to the target JPD.
#[async_trait]
pub trait PromotionExecutor: Send + Sync {
    async fn promote(&self, request: &PromotionRequest) -> Result<PromotionReceipt, LifecycleError>;

    /// Human-readable executor name
    fn executor_type(&self) -> &'static str;
}

/// Rewrites the creation time of a freshly replicated promotion record.
///
/// The record rewritten is the newest one of `bundle`; `promotion_id` is the
/// executor's receipt and is informational only (logged, never matched).
#[async_trait]
pub trait TimestampAligner: Send + Sync {
    async fn set_promotion_timestamp(
        &self,
        bundle: &BundleVersionRef,
        promotion_id: Option<&str>,
        created_millis: i64,
    ) -> Result<(), LifecycleError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock executor for testing trait contracts
    struct MockExecutor {
        calls: Mutex<Vec<PromotionRequest>>,
        fail: bool,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl PromotionExecutor for MockExecutor {
        async fn promote(
            &self,
            request: &PromotionRequest,
        ) -> Result<PromotionReceipt, LifecycleError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(LifecycleError::ApiError {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(PromotionReceipt {
                promotion_id: Some(format!("PRM-{}", self.calls.lock().unwrap().len())),
            })
        }

        fn executor_type(&self) -> &'static str {
            "mock"
        }
    }

    fn record() -> PromotionRecord {
        PromotionRecord::new(
            BundleVersionRef::new("app", "1.0").with_project("web"),
            "PROD",
            ["b", "a"],
            ["c"],
        )
        .with_created_millis(42)
    }

    #[test]
    fn test_request_from_record_drops_timestamps() {
        let request = PromotionRequest::from_record(&record());
        assert_eq!(request.environment, "PROD");
        assert_eq!(request.bundle.project_key.as_deref(), Some("web"));
        assert_eq!(
            request.included_repositories.iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(request.excluded_repositories.contains("c"));
    }

    #[tokio::test]
    async fn test_executor_trait_object() {
        let executor: Box<dyn PromotionExecutor> = Box::new(MockExecutor::new());
        let receipt = executor
            .promote(&PromotionRequest::from_record(&record()))
            .await
            .unwrap();
        assert_eq!(receipt.promotion_id.as_deref(), Some("PRM-1"));
        assert_eq!(executor.executor_type(), "mock");
    }

    #[tokio::test]
    async fn test_executor_failure_propagates() {
        let executor = MockExecutor::new().failing();
        let result = executor
            .promote(&PromotionRequest::from_record(&record()))
            .await;
        assert!(matches!(result, Err(LifecycleError::ApiError { status: 500, .. })));
        assert_eq!(executor.calls.lock().unwrap().len(), 1);
    }
}

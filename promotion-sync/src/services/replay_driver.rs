//! Sequential replay of missing promotions onto the target JPD.
//!
//! Events are applied strictly in the order given. The first executor
//! failure stops the pair, since later promotions may depend on earlier
//! ones. A failed timestamp alignment only produces a warning: the
//! promotion itself already exists on the target.

use std::sync::Arc;

use crate::error::{SyncError, SyncStage};
use crate::models::bundle::BundleVersionRef;
use crate::models::promotion::PromotionRecord;
use crate::models::report::PairOutcome;
use crate::services::lifecycle_api::{
    PromotionExecutor, PromotionRequest, PromotionSource, TimestampAligner,
};
use crate::services::metrics_service;

/// Applies promotions through an executor and aligns their timestamps.
#[derive(Clone)]
pub struct ReplayDriver {
    executor: Arc<dyn PromotionExecutor>,
    aligner: Arc<dyn TimestampAligner>,
    dry_run: bool,
}

impl ReplayDriver {
    pub fn new(executor: Arc<dyn PromotionExecutor>, aligner: Arc<dyn TimestampAligner>) -> Self {
        Self {
            executor,
            aligner,
            dry_run: false,
        }
    }

    /// Report planned promotions instead of applying them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Apply `events` to the target in order.
    pub async fn replay(&self, bundle: &BundleVersionRef, events: &[PromotionRecord]) -> PairOutcome {
        if events.is_empty() {
            tracing::info!(bundle = %bundle, "Target is already in sync");
            return PairOutcome::InSync;
        }

        if self.dry_run {
            for event in events {
                tracing::info!(
                    bundle = %bundle,
                    promotion = %event.identity(),
                    created_at = ?event.created_at(),
                    "Dry run: would replicate promotion"
                );
            }
            return PairOutcome::Planned {
                count: events.len(),
            };
        }

        tracing::info!(
            bundle = %bundle,
            count = events.len(),
            executor = self.executor.executor_type(),
            "Replicating missing promotions"
        );

        let mut applied = 0;
        let mut alignment_warnings = 0;
        for event in events {
            match self.apply(event).await {
                Ok(aligned) => {
                    applied += 1;
                    if !aligned {
                        alignment_warnings += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        bundle = %bundle,
                        applied,
                        remaining = events.len() - applied,
                        error = %e,
                        "Aborting replay for bundle version"
                    );
                    return PairOutcome::failed(&e, applied);
                }
            }
        }

        PairOutcome::Replicated {
            count: applied,
            alignment_warnings,
        }
    }

    /// Apply a single webhook-correlated event unless the target already
    /// ends with the same promotion.
    ///
    /// A promotion replicated to the target fires the target's own webhook;
    /// comparing against the target's latest record stops that echo.
    pub async fn replay_if_new(
        &self,
        target: &dyn PromotionSource,
        event: &PromotionRecord,
        repository_key: Option<&str>,
    ) -> PairOutcome {
        let bundle = &event.bundle;
        let target_history = match target.fetch_promotion_history(bundle, repository_key).await {
            Ok(history) => history,
            Err(source) => {
                let error = SyncError::Fetch {
                    stage: SyncStage::Preflight,
                    bundle: bundle.name.clone(),
                    version: bundle.version.clone(),
                    source,
                };
                tracing::error!(bundle = %bundle, error = %error, "Pre-flight check failed");
                return PairOutcome::failed(&error, 0);
            }
        };

        if let Some(latest) = target_history.latest() {
            if latest.is_same_promotion(event) {
                tracing::info!(
                    bundle = %bundle,
                    promotion = %event.identity(),
                    target = target.instance_url(),
                    "Target's latest promotion already matches, skipping"
                );
                return PairOutcome::InSync;
            }
        }

        self.replay(bundle, std::slice::from_ref(event)).await
    }

    /// Promote one event and align its timestamp. Returns whether the
    /// alignment succeeded (or was not needed).
    async fn apply(&self, event: &PromotionRecord) -> Result<bool, SyncError> {
        let bundle = &event.bundle;
        let request = PromotionRequest::from_record(event);

        tracing::info!(
            bundle = %bundle,
            promotion = %event.identity(),
            "Promoting on target"
        );

        let receipt = match self.executor.promote(&request).await {
            Ok(receipt) => receipt,
            Err(source) => {
                metrics_service::record_promotion_failed(&event.environment);
                return Err(SyncError::Execution {
                    bundle: bundle.name.clone(),
                    version: bundle.version.clone(),
                    environment: event.environment.clone(),
                    source,
                });
            }
        };
        metrics_service::record_promotion_replicated(
            &event.environment,
            self.executor.executor_type(),
        );

        let Some(created_millis) = event.created_millis else {
            tracing::warn!(
                bundle = %bundle,
                environment = %event.environment,
                "Skipping timestamp alignment: source timestamp not available"
            );
            return Ok(false);
        };

        if let Err(source) = self
            .aligner
            .set_promotion_timestamp(bundle, receipt.promotion_id.as_deref(), created_millis)
            .await
        {
            let warning = SyncError::Align {
                bundle: bundle.name.clone(),
                version: bundle.version.clone(),
                environment: event.environment.clone(),
                source,
            };
            metrics_service::record_alignment_warning(&event.environment);
            tracing::warn!(error = %warning, "Promotion applied but timestamp not aligned");
            return Ok(false);
        }

        tracing::debug!(
            bundle = %bundle,
            environment = %event.environment,
            created_millis,
            "Promotion timestamp aligned"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bundle::BundleSummary;
    use crate::models::promotion::PromotionHistory;
    use crate::services::lifecycle_api::PromotionReceipt;
    use crate::services::lifecycle_client::LifecycleError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl PromotionExecutor for RecordingExecutor {
        async fn promote(
            &self,
            request: &PromotionRequest,
        ) -> Result<PromotionReceipt, LifecycleError> {
            if self.fail_on.as_deref() == Some(request.environment.as_str()) {
                return Err(LifecycleError::CommandFailed {
                    status: Some(1),
                    stderr: "environment does not exist".to_string(),
                });
            }
            self.calls.lock().unwrap().push(request.environment.clone());
            Ok(PromotionReceipt::default())
        }

        fn executor_type(&self) -> &'static str {
            "recording"
        }
    }

    #[derive(Default)]
    struct RecordingAligner {
        calls: Mutex<Vec<i64>>,
        fail: bool,
    }

    #[async_trait]
    impl TimestampAligner for RecordingAligner {
        async fn set_promotion_timestamp(
            &self,
            _bundle: &BundleVersionRef,
            _promotion_id: Option<&str>,
            created_millis: i64,
        ) -> Result<(), LifecycleError> {
            if self.fail {
                return Err(LifecycleError::ApiError {
                    status: 400,
                    message: "unsupported".to_string(),
                });
            }
            self.calls.lock().unwrap().push(created_millis);
            Ok(())
        }
    }

    struct StaticSource {
        history: PromotionHistory,
    }

    #[async_trait]
    impl PromotionSource for StaticSource {
        async fn fetch_promotion_history(
            &self,
            _bundle: &BundleVersionRef,
            _repository_key: Option<&str>,
        ) -> Result<PromotionHistory, LifecycleError> {
            Ok(self.history.clone())
        }

        async fn list_bundles(
            &self,
            _project_key: Option<&str>,
        ) -> Result<Vec<BundleSummary>, LifecycleError> {
            Ok(vec![])
        }

        async fn list_versions(
            &self,
            _bundle_name: &str,
            _project_key: Option<&str>,
        ) -> Result<Vec<String>, LifecycleError> {
            Ok(vec![])
        }

        fn instance_url(&self) -> &str {
            "https://target.example.com"
        }
    }

    fn bundle() -> BundleVersionRef {
        BundleVersionRef::new("app", "1.0")
    }

    fn event(env: &str, at: Option<i64>) -> PromotionRecord {
        let mut record = PromotionRecord::new(bundle(), env, ["X"], Vec::<&str>::new());
        record.created_millis = at;
        record
    }

    fn driver(
        executor: Arc<RecordingExecutor>,
        aligner: Arc<RecordingAligner>,
    ) -> ReplayDriver {
        ReplayDriver::new(executor, aligner)
    }

    #[tokio::test]
    async fn test_applies_in_order_and_aligns() {
        let executor = Arc::new(RecordingExecutor::default());
        let aligner = Arc::new(RecordingAligner::default());
        let outcome = driver(executor.clone(), aligner.clone())
            .replay(
                &bundle(),
                &[event("DEV", Some(100)), event("PROD", Some(200))],
            )
            .await;

        assert_eq!(
            outcome,
            PairOutcome::Replicated {
                count: 2,
                alignment_warnings: 0
            }
        );
        assert_eq!(*executor.calls.lock().unwrap(), vec!["DEV", "PROD"]);
        assert_eq!(*aligner.calls.lock().unwrap(), vec![100, 200]);
    }

    #[tokio::test]
    async fn test_empty_events_are_in_sync() {
        let executor = Arc::new(RecordingExecutor::default());
        let outcome = driver(executor.clone(), Arc::new(RecordingAligner::default()))
            .replay(&bundle(), &[])
            .await;
        assert_eq!(outcome, PairOutcome::InSync);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_aborts_remaining() {
        let executor = Arc::new(RecordingExecutor {
            fail_on: Some("QA".to_string()),
            ..Default::default()
        });
        let outcome = driver(executor.clone(), Arc::new(RecordingAligner::default()))
            .replay(
                &bundle(),
                &[
                    event("DEV", Some(1)),
                    event("QA", Some(2)),
                    event("PROD", Some(3)),
                ],
            )
            .await;

        match outcome {
            PairOutcome::Failed { stage, applied, reason } => {
                assert_eq!(stage, SyncStage::Promote);
                assert_eq!(applied, 1);
                assert!(reason.contains("QA"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*executor.calls.lock().unwrap(), vec!["DEV"]);
    }

    #[tokio::test]
    async fn test_alignment_failure_is_a_warning() {
        let executor = Arc::new(RecordingExecutor::default());
        let aligner = Arc::new(RecordingAligner {
            fail: true,
            ..Default::default()
        });
        let outcome = driver(executor.clone(), aligner)
            .replay(&bundle(), &[event("DEV", Some(1)), event("PROD", Some(2))])
            .await;
        assert_eq!(
            outcome,
            PairOutcome::Replicated {
                count: 2,
                alignment_warnings: 2
            }
        );
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_timestamp_skips_alignment() {
        let aligner = Arc::new(RecordingAligner::default());
        let outcome = driver(Arc::new(RecordingExecutor::default()), aligner.clone())
            .replay(&bundle(), &[event("DEV", None)])
            .await;
        assert_eq!(
            outcome,
            PairOutcome::Replicated {
                count: 1,
                alignment_warnings: 1
            }
        );
        assert!(aligner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_invokes_nothing() {
        let executor = Arc::new(RecordingExecutor::default());
        let aligner = Arc::new(RecordingAligner::default());
        let replay = driver(executor.clone(), aligner.clone()).with_dry_run(true);
        assert!(replay.is_dry_run());
        let outcome = replay
            .replay(&bundle(), &[event("DEV", Some(1)), event("PROD", Some(2))])
            .await;
        assert_eq!(outcome, PairOutcome::Planned { count: 2 });
        assert!(executor.calls.lock().unwrap().is_empty());
        assert!(aligner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_if_new_skips_echo() {
        let executor = Arc::new(RecordingExecutor::default());
        let target = StaticSource {
            history: PromotionHistory::new(vec![event("DEV", Some(1)), event("QA", Some(5))]),
        };
        let outcome = driver(executor.clone(), Arc::new(RecordingAligner::default()))
            .replay_if_new(&target, &event("QA", Some(9)), None)
            .await;
        assert_eq!(outcome, PairOutcome::InSync);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_if_new_compares_latest_only() {
        let executor = Arc::new(RecordingExecutor::default());
        let target = StaticSource {
            history: PromotionHistory::new(vec![event("QA", Some(1)), event("PROD", Some(5))]),
        };
        let outcome = driver(executor.clone(), Arc::new(RecordingAligner::default()))
            .replay_if_new(&target, &event("QA", Some(9)), None)
            .await;
        assert_eq!(
            outcome,
            PairOutcome::Replicated {
                count: 1,
                alignment_warnings: 0
            }
        );
        assert_eq!(*executor.calls.lock().unwrap(), vec!["QA"]);
    }
}

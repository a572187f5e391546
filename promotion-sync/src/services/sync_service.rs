//! Batch reconciliation across every Release Bundle version on the source.

use std::sync::Arc;

use crate::error::{SyncError, SyncStage};
use crate::models::bundle::{BundleSummary, BundleVersionRef};
use crate::models::report::{PairOutcome, SyncReport};
use crate::services::lifecycle_api::PromotionSource;
use crate::services::lifecycle_client::LifecycleError;
use crate::services::metrics_service;
use crate::services::reconciler::{missing_promotions, ReconcileFilters};
use crate::services::replay_driver::ReplayDriver;

/// Placeholder version for discovery failures that happen before any
/// version of a bundle is known.
pub const ALL_VERSIONS: &str = "*";

/// Walks source bundles and replays missing promotions onto the target.
pub struct SyncService {
    source: Arc<dyn PromotionSource>,
    target: Arc<dyn PromotionSource>,
    driver: ReplayDriver,
    filters: ReconcileFilters,
}

impl SyncService {
    pub fn new(
        source: Arc<dyn PromotionSource>,
        target: Arc<dyn PromotionSource>,
        driver: ReplayDriver,
    ) -> Self {
        Self {
            source,
            target,
            driver,
            filters: ReconcileFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: ReconcileFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Reconcile every bundle version on the source.
    ///
    /// Only a failure to list bundle names aborts the run; every other
    /// failure is recorded against its pair and the run continues.
    pub async fn run(&self) -> Result<SyncReport, LifecycleError> {
        tracing::info!(
            source = self.source.instance_url(),
            target = self.target.instance_url(),
            environment = ?self.filters.environment,
            project = ?self.filters.project,
            dry_run = self.driver.is_dry_run(),
            "Starting promotion sync"
        );

        let bundles = self
            .source
            .list_bundles(self.filters.project.as_deref())
            .await?;
        tracing::info!(count = bundles.len(), "Discovered Release Bundles");

        let mut report = SyncReport::default();
        for bundle in &bundles {
            if bundle.repository_key.as_deref().map_or(true, str::is_empty) {
                tracing::warn!(bundle = %bundle.name, "Skipping Release Bundle without a repository key");
                continue;
            }
            if let Some(project) = &self.filters.project {
                if bundle.project_or_default() != project {
                    continue;
                }
            }
            self.sync_bundle(bundle, &mut report).await;
        }

        tracing::info!(
            pairs = report.pairs.len(),
            replicated = report.promotions_replicated(),
            failures = report.failures(),
            "Promotion sync finished"
        );
        Ok(report)
    }

    async fn sync_bundle(&self, bundle: &BundleSummary, report: &mut SyncReport) {
        let versions = match self
            .source
            .list_versions(&bundle.name, bundle.project_key.as_deref())
            .await
        {
            Ok(versions) => versions,
            Err(source) => {
                let error = SyncError::Fetch {
                    stage: SyncStage::Discover,
                    bundle: bundle.name.clone(),
                    version: ALL_VERSIONS.to_string(),
                    source,
                };
                tracing::error!(error = %error, "Failed to list bundle versions");
                self.record(report, bundle.version(ALL_VERSIONS), PairOutcome::failed(&error, 0));
                return;
            }
        };

        tracing::debug!(bundle = %bundle.name, versions = versions.len(), "Listed versions");
        for version in versions {
            let pair = bundle.version(version);
            let outcome = self.sync_pair(&pair, bundle.repository_key.as_deref()).await;
            self.record(report, pair, outcome);
        }
    }

    /// Reconcile and replay a single bundle version.
    pub async fn sync_pair(
        &self,
        bundle: &BundleVersionRef,
        repository_key: Option<&str>,
    ) -> PairOutcome {
        let source_history = match self
            .source
            .fetch_promotion_history(bundle, repository_key)
            .await
        {
            Ok(history) => history,
            Err(source) => return fetch_failure(SyncStage::FetchSource, bundle, source),
        };

        let target_history = match self
            .target
            .fetch_promotion_history(bundle, repository_key)
            .await
        {
            Ok(history) => history,
            Err(source) => return fetch_failure(SyncStage::FetchTarget, bundle, source),
        };

        let missing = missing_promotions(&source_history, &target_history, &self.filters);
        tracing::info!(
            bundle = %bundle,
            source_promotions = source_history.len(),
            target_promotions = target_history.len(),
            missing = missing.len(),
            "Reconciled promotion histories"
        );

        self.driver.replay(bundle, &missing).await
    }

    fn record(&self, report: &mut SyncReport, bundle: BundleVersionRef, outcome: PairOutcome) {
        metrics_service::record_pair_outcome("batch", &outcome);
        report.push(bundle, outcome);
    }
}

fn fetch_failure(stage: SyncStage, bundle: &BundleVersionRef, source: LifecycleError) -> PairOutcome {
    let error = SyncError::Fetch {
        stage,
        bundle: bundle.name.clone(),
        version: bundle.version.clone(),
        source,
    };
    tracing::error!(bundle = %bundle, error = %error, "Failed to fetch promotion history");
    PairOutcome::failed(&error, 0)
}

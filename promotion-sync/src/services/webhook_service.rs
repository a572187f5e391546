//! Single bundle-version replication driven by a promotion webhook.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncStage};
use crate::models::bundle::BundleVersionRef;
use crate::models::report::PairOutcome;
use crate::services::correlator::correlate;
use crate::services::lifecycle_api::PromotionSource;
use crate::services::metrics_service;
use crate::services::reconciler::{missing_promotions, ReconcileFilters};
use crate::services::replay_driver::ReplayDriver;

/// What a promotion webhook tells us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub bundle_name: String,
    pub bundle_version: String,
    /// Environment the source promotion targeted
    pub environment_hint: String,
    pub repository_key: Option<String>,
    pub project_key: Option<String>,
}

impl WebhookTrigger {
    pub fn bundle(&self) -> BundleVersionRef {
        let bundle = BundleVersionRef::new(&self.bundle_name, &self.bundle_version);
        match self.project_key.as_deref().filter(|p| !p.is_empty()) {
            Some(project) => bundle.with_project(project),
            None => bundle,
        }
    }
}

/// Replicates the promotion behind one webhook to the target.
pub struct WebhookService {
    source: Arc<dyn PromotionSource>,
    target: Arc<dyn PromotionSource>,
    driver: ReplayDriver,
    full_sync: bool,
}

impl WebhookService {
    pub fn new(
        source: Arc<dyn PromotionSource>,
        target: Arc<dyn PromotionSource>,
        driver: ReplayDriver,
    ) -> Self {
        Self {
            source,
            target,
            driver,
            full_sync: false,
        }
    }

    /// Reconcile the whole history of the bundle version instead of only
    /// the correlated event.
    pub fn with_full_sync(mut self, full_sync: bool) -> Self {
        self.full_sync = full_sync;
        self
    }

    pub async fn handle(&self, trigger: &WebhookTrigger) -> PairOutcome {
        let bundle = trigger.bundle();
        tracing::info!(
            bundle = %bundle,
            environment = %trigger.environment_hint,
            full_sync = self.full_sync,
            "Handling promotion webhook"
        );

        let outcome = match self.process(&bundle, trigger).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(bundle = %bundle, error = %error, "Webhook replication failed");
                PairOutcome::failed(&error, 0)
            }
        };
        metrics_service::record_pair_outcome("webhook", &outcome);
        outcome
    }

    async fn process(
        &self,
        bundle: &BundleVersionRef,
        trigger: &WebhookTrigger,
    ) -> Result<PairOutcome, SyncError> {
        let repository_key = trigger.repository_key.as_deref();
        let source_history = self
            .source
            .fetch_promotion_history(bundle, repository_key)
            .await
            .map_err(|source| SyncError::Fetch {
                stage: SyncStage::FetchSource,
                bundle: bundle.name.clone(),
                version: bundle.version.clone(),
                source,
            })?;

        if self.full_sync {
            let target_history = self
                .target
                .fetch_promotion_history(bundle, repository_key)
                .await
                .map_err(|source| SyncError::Fetch {
                    stage: SyncStage::FetchTarget,
                    bundle: bundle.name.clone(),
                    version: bundle.version.clone(),
                    source,
                })?;
            let missing =
                missing_promotions(&source_history, &target_history, &ReconcileFilters::default());
            return Ok(self.driver.replay(bundle, &missing).await);
        }

        let event = correlate(bundle, &source_history, &trigger.environment_hint)?;
        tracing::debug!(
            bundle = %bundle,
            promotion = %event.identity(),
            created_at = ?event.created_at(),
            "Correlated webhook to promotion"
        );
        Ok(self
            .driver
            .replay_if_new(self.target.as_ref(), event, repository_key)
            .await)
    }
}

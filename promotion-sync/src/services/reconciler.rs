//! Batch reconciliation of promotion histories.
//!
//! Treats each history as a multiset of promotion identities and computes
//! which source occurrences the target lacks. The emitted events keep the
//! source's chronological order so re-promotions replay in sequence.

use std::collections::HashMap;

use crate::models::bundle::BundleVersionRef;
use crate::models::promotion::{PromotionHistory, PromotionIdentity, PromotionRecord};

/// Optional scoping applied before counting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileFilters {
    /// Only reconcile promotions to this environment
    pub environment: Option<String>,
    /// Only reconcile bundle versions belonging to this project
    pub project: Option<String>,
}

impl ReconcileFilters {
    /// Whether a bundle version falls inside the project filter.
    pub fn includes_bundle(&self, bundle: &BundleVersionRef) -> bool {
        match &self.project {
            Some(project) => bundle.project_or_default() == project,
            None => true,
        }
    }

    fn scope(&self, history: &PromotionHistory) -> PromotionHistory {
        match &self.environment {
            Some(environment) => history.filter_environment(environment),
            None => history.clone(),
        }
    }
}

/// Compute the promotions the target must replay to cover the source.
///
/// For every identity class, `max(0, source - target)` occurrences are
/// missing. The first `target` occurrences of a class in the source are
/// considered present; the later ones are emitted, in source order.
pub fn missing_promotions(
    source: &PromotionHistory,
    target: &PromotionHistory,
    filters: &ReconcileFilters,
) -> Vec<PromotionRecord> {
    if let Some(bundle) = source.records.first().map(|record| &record.bundle) {
        if !filters.includes_bundle(bundle) {
            return Vec::new();
        }
    }

    let source = filters.scope(source);
    let target = filters.scope(target);
    let target_counts = target.occurrence_counts();

    let mut seen: HashMap<PromotionIdentity, usize> = HashMap::new();
    let mut missing = Vec::new();
    for record in source.iter() {
        let identity = record.identity();
        let present = target_counts.get(&identity).copied().unwrap_or(0);
        let occurrence = seen.entry(identity).or_insert(0);
        *occurrence += 1;
        if *occurrence > present {
            missing.push(record.clone());
        }
    }
    missing
}

//! Per-pair outcomes reported by batch and webhook runs.

use serde::Serialize;

use crate::error::{SyncError, SyncStage};
use crate::models::bundle::BundleVersionRef;

/// Result of processing one bundle version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairOutcome {
    /// Target already holds every source promotion
    InSync,
    /// `count` promotions were applied to the target
    Replicated {
        count: usize,
        alignment_warnings: usize,
    },
    /// Dry run: `count` promotions would have been applied
    Planned { count: usize },
    /// Processing stopped at `stage` after `applied` promotions
    Failed {
        stage: SyncStage,
        applied: usize,
        reason: String,
    },
}

impl PairOutcome {
    pub fn failed(error: &SyncError, applied: usize) -> Self {
        PairOutcome::Failed {
            stage: error.stage(),
            applied,
            reason: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PairOutcome::Failed { .. })
    }

    /// Short label, used for metrics and text output
    pub fn label(&self) -> &'static str {
        match self {
            PairOutcome::InSync => "in_sync",
            PairOutcome::Replicated { .. } => "replicated",
            PairOutcome::Planned { .. } => "planned",
            PairOutcome::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairOutcome::InSync => write!(f, "in sync, no action needed"),
            PairOutcome::Replicated {
                count,
                alignment_warnings: 0,
            } => write!(f, "{} promotion(s) replicated", count),
            PairOutcome::Replicated {
                count,
                alignment_warnings,
            } => write!(
                f,
                "{} promotion(s) replicated, {} timestamp alignment warning(s)",
                count, alignment_warnings
            ),
            PairOutcome::Planned { count } => write!(f, "{} promotion(s) would be replicated", count),
            PairOutcome::Failed {
                stage,
                applied,
                reason,
            } => write!(
                f,
                "failed at {} after {} promotion(s): {}",
                stage, applied, reason
            ),
        }
    }
}

/// Outcome for one bundle version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairReport {
    pub bundle: BundleVersionRef,
    pub outcome: PairOutcome,
}

/// Outcomes of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pairs: Vec<PairReport>,
}

impl SyncReport {
    pub fn push(&mut self, bundle: BundleVersionRef, outcome: PairOutcome) {
        self.pairs.push(PairReport { bundle, outcome });
    }

    pub fn failures(&self) -> usize {
        self.pairs.iter().filter(|pair| pair.outcome.is_failure()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }

    /// Total promotions applied across all pairs, including partial failures.
    pub fn promotions_replicated(&self) -> usize {
        self.pairs
            .iter()
            .map(|pair| match &pair.outcome {
                PairOutcome::Replicated { count, .. } => *count,
                PairOutcome::Failed { applied, .. } => *applied,
                _ => 0,
            })
            .sum()
    }

    pub fn count(&self, label: &str) -> usize {
        self.pairs
            .iter()
            .filter(|pair| pair.outcome.label() == label)
            .count()
    }
}

//! Promotion record model.
//!
//! A [`PromotionRecord`] is a read-only projection of one promotion event
//! fetched from a JPD. Two records describe *the same promotion* when their
//! [`PromotionIdentity`] is equal: the environment plus the included and
//! excluded repository sets. Timestamps and the instance-assigned promotion
//! identifier never take part in identity, because source and target assign
//! their own.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::bundle::BundleVersionRef;

/// Comparison key of a promotion (its identity-equivalence class).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromotionIdentity {
    pub environment: String,
    pub included_repositories: BTreeSet<String>,
    pub excluded_repositories: BTreeSet<String>,
}

impl std::fmt::Display for PromotionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.environment)?;
        if !self.included_repositories.is_empty() {
            let keys: Vec<&str> = self.included_repositories.iter().map(String::as_str).collect();
            write!(f, " +[{}]", keys.join(","))?;
        }
        if !self.excluded_repositories.is_empty() {
            let keys: Vec<&str> = self.excluded_repositories.iter().map(String::as_str).collect();
            write!(f, " -[{}]", keys.join(","))?;
        }
        Ok(())
    }
}

/// One promotion of a Release Bundle version to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub bundle: BundleVersionRef,
    pub environment: String,
    pub included_repositories: BTreeSet<String>,
    pub excluded_repositories: BTreeSet<String>,
    /// When the promotion event was created on its origin instance (epoch millis).
    pub created_millis: Option<i64>,
    /// When the origin instance recorded the promotion (epoch millis).
    pub recorded_millis: Option<i64>,
    /// Origin-assigned reference (audit `subject_reference`).
    pub promotion_id: Option<String>,
}

impl PromotionRecord {
    /// Build a normalized record. Repository lists are folded into sets;
    /// comma-joined entries are split and blank keys dropped.
    pub fn new<I, E, S, T>(
        bundle: BundleVersionRef,
        environment: impl Into<String>,
        included: I,
        excluded: E,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            bundle,
            environment: environment.into(),
            included_repositories: normalize_repository_keys(included),
            excluded_repositories: normalize_repository_keys(excluded),
            created_millis: None,
            recorded_millis: None,
            promotion_id: None,
        }
    }

    pub fn with_created_millis(mut self, millis: i64) -> Self {
        self.created_millis = Some(millis);
        self
    }

    pub fn with_recorded_millis(mut self, millis: i64) -> Self {
        self.recorded_millis = Some(millis);
        self
    }

    pub fn with_promotion_id(mut self, promotion_id: impl Into<String>) -> Self {
        self.promotion_id = Some(promotion_id.into());
        self
    }

    pub fn identity(&self) -> PromotionIdentity {
        PromotionIdentity {
            environment: self.environment.clone(),
            included_repositories: self.included_repositories.clone(),
            excluded_repositories: self.excluded_repositories.clone(),
        }
    }

    /// Identity equality: same environment and same repository sets.
    pub fn is_same_promotion(&self, other: &PromotionRecord) -> bool {
        self.environment == other.environment
            && self.included_repositories == other.included_repositories
            && self.excluded_repositories == other.excluded_repositories
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_millis
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }
}

/// Fold raw repository key lists into a set.
///
/// The Lifecycle API sometimes reports `["a,b", "c"]` instead of
/// `["a", "b", "c"]`; both normalize to `{a, b, c}`.
pub fn normalize_repository_keys<I, S>(keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Ordered promotion history of one bundle version, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionHistory {
    pub records: Vec<PromotionRecord>,
}

impl PromotionHistory {
    pub fn new(records: Vec<PromotionRecord>) -> Self {
        Self { records }
    }

    /// Build a history from records in arbitrary order. Sorting is stable,
    /// so records sharing a timestamp keep the order the server gave them.
    pub fn from_unordered(mut records: Vec<PromotionRecord>) -> Self {
        records.sort_by_key(|record| record.created_millis.or(record.recorded_millis).unwrap_or(0));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PromotionRecord> {
        self.records.iter()
    }

    /// Most recent promotion, if any.
    pub fn latest(&self) -> Option<&PromotionRecord> {
        self.records.last()
    }

    /// Keep only promotions to `environment`.
    pub fn filter_environment(&self, environment: &str) -> PromotionHistory {
        PromotionHistory {
            records: self
                .records
                .iter()
                .filter(|record| record.environment == environment)
                .cloned()
                .collect(),
        }
    }

    /// Occurrence count per identity class.
    pub fn occurrence_counts(&self) -> HashMap<PromotionIdentity, usize> {
        occurrence_counts(&self.records)
    }
}

impl<'a> IntoIterator for &'a PromotionHistory {
    type Item = &'a PromotionRecord;
    type IntoIter = std::slice::Iter<'a, PromotionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Multiset view of a history: identity class → number of occurrences.
pub fn occurrence_counts(records: &[PromotionRecord]) -> HashMap<PromotionIdentity, usize> {
    let mut counts = HashMap::new();
    for record in records {
        *counts.entry(record.identity()).or_insert(0) += 1;
    }
    counts
}

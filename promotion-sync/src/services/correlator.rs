//! Single-event correlation for webhook-triggered replication.
//!
//! A webhook only says "bundle X version Y was promoted to ENV". When two
//! promotions to the same environment race, the audit trail holds several
//! candidates; the most recently created one is taken as the event that
//! fired the webhook.

use crate::error::SyncError;
use crate::models::bundle::BundleVersionRef;
use crate::models::promotion::{PromotionHistory, PromotionRecord};

/// Select the promotion a webhook refers to.
///
/// Among records whose environment equals `environment_hint`, returns the
/// one with the latest creation time. Records without a timestamp rank
/// lowest; on equal timestamps the later history entry wins.
pub fn correlate<'a>(
    bundle: &BundleVersionRef,
    history: &'a PromotionHistory,
    environment_hint: &str,
) -> Result<&'a PromotionRecord, SyncError> {
    history
        .iter()
        .enumerate()
        .filter(|(_, record)| record.environment == environment_hint)
        .max_by_key(|(index, record)| (record.created_millis.unwrap_or(i64::MIN), *index))
        .map(|(_, record)| record)
        .ok_or_else(|| SyncError::NoMatchingPromotion {
            bundle: bundle.name.clone(),
            version: bundle.version.clone(),
            environment: environment_hint.to_string(),
        })
}

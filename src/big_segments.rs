use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sparse big-segment membership for one context key, keyed by segment reference
/// (`"<segment key>.g<generation>"`). A reference that is absent is not a membership.
pub type BigSegmentMembership = HashMap<String, bool>;

/// How trustworthy the big-segment data behind an evaluation was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    Healthy,
    /// The store has not been updated recently enough.
    Stale,
    /// The store could not be queried.
    StoreError,
    /// A big segment was referenced but no store is configured, or the segment has no
    /// generation.
    NotConfigured,
}

impl BigSegmentsStatus {
    fn severity(self) -> u8 {
        match self {
            BigSegmentsStatus::Healthy => 0,
            BigSegmentsStatus::Stale => 1,
            BigSegmentsStatus::NotConfigured => 2,
            BigSegmentsStatus::StoreError => 3,
        }
    }

    /// Combines two statuses observed during one evaluation, keeping the worse one.
    pub(crate) fn merge(self, other: BigSegmentsStatus) -> BigSegmentsStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

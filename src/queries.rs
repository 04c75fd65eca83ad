use std::sync::Arc;

use async_trait::async_trait;

use crate::big_segments::{BigSegmentMembership, BigSegmentsStatus};
use crate::flag::Flag;
use crate::segment::Segment;

/// Read access to the flag and segment data an evaluation depends on.
///
/// Implementations typically wrap a feature store and its cache. Every method may suspend; the
/// evaluator awaits each lookup in declared order and never caches answers across evaluations.
/// Absence is not an error: it means no such item exists.
#[async_trait]
pub trait Queries: Send + Sync {
    /// Retrieve the flag with key `flag_key`.
    async fn flag(&self, flag_key: &str) -> Option<Arc<Flag>>;

    /// Retrieve the segment with key `segment_key`.
    async fn segment(&self, segment_key: &str) -> Option<Arc<Segment>>;

    /// Retrieve the big-segment membership of the context with key `context_key`, together
    /// with the store's health.
    ///
    /// A store that fails to answer should return an empty membership with
    /// [BigSegmentsStatus::StoreError]. None means no big-segment store is configured.
    async fn big_segment_membership(
        &self,
        _context_key: &str,
    ) -> Option<(BigSegmentMembership, BigSegmentsStatus)> {
        None
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use itertools::Itertools;
use log::{debug, warn};

use crate::big_segments::{BigSegmentMembership, BigSegmentsStatus};
use crate::config::EvaluatorConfig;
use crate::detail::{EvalResult, ReasonKind};
use crate::error::{ErrorKind, Malformed};
use crate::flag::Flag;
use crate::queries::Queries;
use crate::rule::Clause;
use crate::segment::Segment;
use crate::variation::BucketResult;
use crate::Context;

/// The result of evaluating one prerequisite flag on behalf of another flag.
#[derive(Clone, Debug)]
pub struct PrerequisiteEvent {
    /// Key of the flag whose prerequisite this was.
    pub target_flag_key: String,
    pub context: Context,
    pub prerequisite_flag: Arc<Flag>,
    pub prerequisite_result: EvalResult,
}

/// Receives every completed prerequisite evaluation, so that an event layer can report them.
pub trait PrerequisiteEventRecorder: Send + Sync {
    fn record(&self, event: PrerequisiteEvent);
}

/// Evaluates flags against contexts.
///
/// The evaluator holds only shared references and keeps no state between calls, so one instance
/// may serve any number of concurrent evaluations. It knows nothing about analytics events;
/// callers that need them for prerequisites pass a [PrerequisiteEventRecorder].
pub struct Evaluator<'a> {
    queries: &'a dyn Queries,
    config: EvaluatorConfig,
    recorder: Option<&'a dyn PrerequisiteEventRecorder>,
}

impl<'a> Evaluator<'a> {
    pub fn new(queries: &'a dyn Queries) -> Self {
        Evaluator {
            queries,
            config: EvaluatorConfig::default(),
            recorder: None,
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recorder(mut self, recorder: &'a dyn PrerequisiteEventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Evaluates `flag` for `context`.
    ///
    /// This never fails: malformed flag or segment data produces a result whose reason is
    /// [ReasonKind::Error]. Suspends only while awaiting [Queries] lookups.
    pub async fn evaluate(&self, flag: &Flag, context: &Context) -> EvalResult {
        let evaluation = Evaluation {
            queries: self.queries,
            recorder: self.recorder,
            max_depth: self.config.max_depth,
            context,
            state: Mutex::default(),
        };

        let path = Chain::root(&flag.key);
        let mut result = match evaluation.eval_flag(flag, &path).await {
            Ok(result) => result,
            Err(Malformed(message)) => {
                warn!("flag '{}' could not be evaluated: {}", flag.key, message);
                return EvalResult::error(ErrorKind::MalformedFlag, message);
            }
        };

        result.reason.big_segments_status = evaluation.big_segments_status();
        result
    }
}

/// A path of visited flag or segment keys, newest first.
///
/// Each link lives on the stack frame that pushed it, so a child sees its ancestors while
/// siblings never see each other.
struct Chain<'c> {
    key: &'c str,
    parent: Option<&'c Chain<'c>>,
    depth: usize,
}

impl<'c> Chain<'c> {
    fn root(key: &'c str) -> Self {
        Chain {
            key,
            parent: None,
            depth: 0,
        }
    }

    /// A link below `parent`. Without a parent the link is the first segment under a flag
    /// rule, which is already one level below the flag.
    fn extend(parent: Option<&'c Chain<'c>>, key: &'c str) -> Self {
        Chain {
            key,
            parent,
            depth: parent.map_or(1, |p| p.depth + 1),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &'c str> + '_ {
        std::iter::successors(Some(self), |link| link.parent).map(|link| link.key)
    }

    fn contains(&self, key: &str) -> bool {
        self.iter().any(|k| k == key)
    }

    /// The path from the root to `key`, for diagnostics.
    fn describe(&self, key: &str) -> String {
        let mut keys: Vec<&str> = self.iter().collect();
        keys.reverse();
        keys.push(key);
        keys.into_iter().join(" -> ")
    }
}

// Big-segment memberships are fetched once per context key within one evaluation.
#[derive(Default)]
struct EvalState {
    big_segments_status: Option<BigSegmentsStatus>,
    memberships: HashMap<String, Option<Arc<BigSegmentMembership>>>,
}

/// Everything one call to [Evaluator::evaluate] works with.
struct Evaluation<'a> {
    queries: &'a dyn Queries,
    recorder: Option<&'a dyn PrerequisiteEventRecorder>,
    max_depth: usize,
    context: &'a Context,
    // Never locked across an await.
    state: Mutex<EvalState>,
}

impl<'a> Evaluation<'a> {
    fn eval_flag<'b>(
        &'b self,
        flag: &'b Flag,
        path: &'b Chain<'b>,
    ) -> BoxFuture<'b, Result<EvalResult, Malformed>> {
        async move {
            if !flag.on {
                return flag.off_value(ReasonKind::Off);
            }

            if let Some(failed) = self.check_prerequisites(flag, path).await? {
                return Ok(failed);
            }

            if let Some(index) = flag.target_match(self.context) {
                return flag.variation(index, ReasonKind::TargetMatch);
            }

            for (rule_index, rule) in flag.rules.iter().enumerate() {
                if self.clauses_match(&rule.clauses, None).await? {
                    let BucketResult {
                        variation_index,
                        in_experiment,
                    } = rule
                        .variation_or_rollout
                        .resolve(self.context, &flag.key, &flag.salt)?;
                    let reason = ReasonKind::RuleMatch {
                        rule_index,
                        rule_id: rule.id.clone(),
                        in_experiment,
                    };
                    return flag.variation(variation_index, reason);
                }
            }

            let BucketResult {
                variation_index,
                in_experiment,
            } = flag
                .fallthrough
                .resolve(self.context, &flag.key, &flag.salt)?;
            flag.variation(variation_index, ReasonKind::Fallthrough { in_experiment })
        }
        .boxed()
    }

    /// Evaluates prerequisites in order, returning the off result for the first one that is not
    /// satisfied.
    async fn check_prerequisites(
        &self,
        flag: &Flag,
        path: &Chain<'_>,
    ) -> Result<Option<EvalResult>, Malformed> {
        for prereq in &flag.prerequisites {
            if path.contains(&prereq.key) {
                return Err(Malformed::new(format!(
                    "prerequisite relationship to '{}' caused a circular reference ({})",
                    prereq.key,
                    path.describe(&prereq.key)
                )));
            }

            let failed = || {
                flag.off_value(ReasonKind::PrerequisiteFailed {
                    prerequisite_key: prereq.key.clone(),
                })
            };

            let Some(prereq_flag) = self.queries.flag(&prereq.key).await else {
                debug!("prerequisite '{}' of flag '{}' not found", prereq.key, flag.key);
                return failed().map(Some);
            };

            let child = Chain::extend(Some(path), &prereq.key);
            self.check_depth(&child)?;
            let result = self.eval_flag(&prereq_flag, &child).await?;

            let satisfied = prereq_flag.on && result.variation_index == Some(prereq.variation);
            if let Some(recorder) = self.recorder {
                recorder.record(PrerequisiteEvent {
                    target_flag_key: flag.key.clone(),
                    context: self.context.clone(),
                    prerequisite_flag: prereq_flag.clone(),
                    prerequisite_result: result,
                });
            }

            if !satisfied {
                return failed().map(Some);
            }
        }
        Ok(None)
    }

    /// True when every clause matches. `segments` is the chain of segments being evaluated
    /// around these clauses, if any.
    async fn clauses_match(
        &self,
        clauses: &[Clause],
        segments: Option<&Chain<'_>>,
    ) -> Result<bool, Malformed> {
        for clause in clauses {
            let matched = if clause.is_segment_match() {
                self.segment_match(clause, segments).await?
            } else {
                clause.matches_non_segment(self.context)?
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn segment_match(
        &self,
        clause: &Clause,
        segments: Option<&Chain<'_>>,
    ) -> Result<bool, Malformed> {
        let mut any_match = false;
        for segment_key in clause.segment_keys() {
            if let Some(chain) = segments.filter(|chain| chain.contains(segment_key)) {
                return Err(Malformed::new(format!(
                    "segment rule referencing '{}' caused a circular reference ({})",
                    segment_key,
                    chain.describe(segment_key)
                )));
            }

            let Some(segment) = self.queries.segment(segment_key).await else {
                debug!("segment '{}' not found", segment_key);
                continue;
            };

            let child = Chain::extend(segments, segment_key);
            self.check_depth(&child)?;
            if self.segment_contains(&segment, &child).await? {
                any_match = true;
                break;
            }
        }
        Ok(clause.maybe_negate(any_match))
    }

    fn segment_contains<'b>(
        &'b self,
        segment: &'b Segment,
        path: &'b Chain<'b>,
    ) -> BoxFuture<'b, Result<bool, Malformed>> {
        async move {
            if segment.unbounded {
                return Ok(self.big_segment_contains(segment).await);
            }

            // included wins over excluded
            if segment.is_included(self.context) {
                return Ok(true);
            }
            if segment.is_excluded(self.context) {
                return Ok(false);
            }

            for rule in &segment.rules {
                if self.clauses_match(&rule.clauses, Some(path)).await?
                    && rule.weight_admits(self.context, &segment.key, &segment.salt)?
                {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .boxed()
    }

    async fn big_segment_contains(&self, segment: &Segment) -> bool {
        let Some(generation) = segment.generation else {
            debug!("big segment '{}' has no generation", segment.key);
            self.record_status(BigSegmentsStatus::NotConfigured);
            return false;
        };
        let Some(context_key) = self.context.key_for_kind(&segment.unbounded_context_kind()) else {
            return false;
        };

        let membership = match self.cached_membership(context_key) {
            Some(membership) => membership,
            None => {
                let (membership, status) =
                    match self.queries.big_segment_membership(context_key).await {
                        Some((membership, status)) => (Some(Arc::new(membership)), status),
                        None => (None, BigSegmentsStatus::NotConfigured),
                    };
                if status != BigSegmentsStatus::Healthy {
                    debug!("big segment membership for '{}' is {:?}", context_key, status);
                }
                self.record_status(status);
                self.cache_membership(context_key, membership.clone());
                membership
            }
        };

        let Some(membership) = membership else {
            return false;
        };
        let included = membership.get(&segment.big_segment_ref(generation)).copied();
        included.unwrap_or(false)
    }

    fn check_depth(&self, chain: &Chain<'_>) -> Result<(), Malformed> {
        if chain.depth > self.max_depth {
            return Err(Malformed::new(format!(
                "'{}' is nested more than {} levels deep",
                chain.key, self.max_depth
            )));
        }
        Ok(())
    }

    fn cached_membership(&self, context_key: &str) -> Option<Option<Arc<BigSegmentMembership>>> {
        self.lock_state().memberships.get(context_key).cloned()
    }

    fn cache_membership(&self, context_key: &str, membership: Option<Arc<BigSegmentMembership>>) {
        self.lock_state()
            .memberships
            .insert(context_key.to_owned(), membership);
    }

    fn record_status(&self, status: BigSegmentsStatus) {
        let mut state = self.lock_state();
        state.big_segments_status = Some(match state.big_segments_status {
            Some(current) => current.merge(status),
            None => status,
        });
    }

    fn big_segments_status(&self) -> Option<BigSegmentsStatus> {
        self.lock_state().big_segments_status
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EvalState> {
        // the state stays consistent even if a holder panicked
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

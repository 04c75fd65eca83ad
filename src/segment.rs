use serde::Deserialize;

use crate::bucketing::{bucket_with_prefix, BucketPrefix};
use crate::error::Malformed;
use crate::rule::Clause;
use crate::variation::VariationWeight;
use crate::{Context, Kind, Reference};

/// A reusable set of contexts, referenced from `segmentMatch` clauses.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub key: String,
    #[serde(default)]
    pub version: u64,

    // Keys of kind "user".
    #[serde(default)]
    pub(crate) included: Vec<String>,
    #[serde(default)]
    pub(crate) excluded: Vec<String>,
    #[serde(default)]
    pub(crate) included_contexts: Vec<SegmentTarget>,
    #[serde(default)]
    pub(crate) excluded_contexts: Vec<SegmentTarget>,

    #[serde(default)]
    pub(crate) rules: Vec<SegmentRule>,
    #[serde(default)]
    pub(crate) salt: String,

    /// Membership is held in an external big-segment store rather than in this definition.
    #[serde(default)]
    pub unbounded: bool,
    #[serde(default)]
    pub(crate) unbounded_context_kind: Option<Kind>,
    #[serde(default)]
    pub generation: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SegmentTarget {
    pub(crate) context_kind: Kind,
    #[serde(default)]
    pub(crate) values: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SegmentRule {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) clauses: Vec<Clause>,
    #[serde(default)]
    pub(crate) weight: Option<VariationWeight>,
    #[serde(default)]
    pub(crate) bucket_by: Option<Reference>,
    #[serde(default)]
    pub(crate) rollout_context_kind: Option<Kind>,
}

impl Segment {
    pub(crate) fn is_included(&self, context: &Context) -> bool {
        Self::listed(context, &self.included, &self.included_contexts)
    }

    pub(crate) fn is_excluded(&self, context: &Context) -> bool {
        Self::listed(context, &self.excluded, &self.excluded_contexts)
    }

    fn listed(context: &Context, user_keys: &[String], targets: &[SegmentTarget]) -> bool {
        let user_listed = context
            .key_for_kind(&Kind::user())
            .map_or(false, |key| user_keys.iter().any(|k| k == key));

        user_listed
            || targets.iter().any(|target| {
                context
                    .key_for_kind(&target.context_kind)
                    .map_or(false, |key| target.values.iter().any(|v| v == key))
            })
    }

    /// The kind whose key is looked up in the big-segment store.
    pub(crate) fn unbounded_context_kind(&self) -> Kind {
        self.unbounded_context_kind.clone().unwrap_or_default()
    }

    /// The membership-map key for this segment at `generation`.
    pub(crate) fn big_segment_ref(&self, generation: i64) -> String {
        format!("{}.g{}", self.key, generation)
    }
}

impl SegmentRule {
    /// Whether the rule's rollout admits `context`. Rules without a weight admit everyone whose
    /// clauses match.
    pub(crate) fn weight_admits(
        &self,
        context: &Context,
        segment_key: &str,
        salt: &str,
    ) -> Result<bool, Malformed> {
        let Some(weight) = self.weight else {
            return Ok(true);
        };

        let key_ref = Reference::new("key");
        let bucket_by = self.bucket_by.as_ref().unwrap_or(&key_ref);
        if !bucket_by.is_valid() {
            return Err(Malformed::new(format!(
                "invalid bucketBy reference '{}' in rule of segment '{}'",
                bucket_by, segment_key
            )));
        }

        let kind = self.rollout_context_kind.clone().unwrap_or_default();
        let (bucket, _) = bucket_with_prefix(
            context,
            BucketPrefix::KeyAndSalt(segment_key, salt),
            bucket_by,
            false,
            &kind,
        );
        Ok(bucket < weight / 100_000.0)
    }
}

#[cfg(test)]
mod tests {
    use spectral::prelude::*;

    use super::*;
    use crate::big_segments::{BigSegmentMembership, BigSegmentsStatus};
    use crate::rule::Op;
    use crate::test_common::TestQueries;
    use crate::{AttributeValue, ContextBuilder, Evaluator, Flag, MultiContextBuilder, Reason};
    use maplit::hashmap;

    fn new_segment() -> Segment {
        Segment {
            key: "segkey".to_string(),
            salt: "salty".to_string(),
            version: 1,
            ..Segment::default()
        }
    }

    async fn segment_match(queries: &TestQueries, context: &Context) -> Option<AttributeValue> {
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        Evaluator::new(queries).evaluate(&flag, context).await.value
    }

    async fn assert_segment_match(segment: &Segment, context: Context, expected: bool) {
        let queries = TestQueries::with_segments(vec![segment.clone()]);
        assert_that!(segment_match(&queries, &context).await)
            .contains_value(AttributeValue::Bool(expected));
    }

    fn jane_rule(weight: Option<f64>, bucket_by: Option<&str>) -> SegmentRule {
        SegmentRule {
            id: None,
            clauses: vec![Clause::new_match("name", Op::In, vec!["Jane".into()])],
            weight,
            bucket_by: bucket_by.map(Reference::new),
            rollout_context_kind: None,
        }
    }

    fn thirty_percent_rule(bucket_by: Option<&str>) -> SegmentRule {
        SegmentRule {
            id: None,
            clauses: vec![Clause::new_match("key", Op::Matches, vec![".".into()])],
            weight: Some(30_000.0),
            bucket_by: bucket_by.map(Reference::new),
            rollout_context_kind: None,
        }
    }

    fn user(key: &str) -> Context {
        ContextBuilder::new(key).build().unwrap()
    }

    #[test]
    fn segment_rule_parse() {
        let rule: SegmentRule =
            serde_json::from_str(r#"{"clauses": [], "weight": null, "bucketBy": null}"#)
                .expect("should parse");
        assert_eq!(
            rule,
            SegmentRule {
                clauses: vec![],
                ..jane_rule(None, None)
            }
        );

        let rule: SegmentRule = serde_json::from_str(
            r#"{
                "id": "r",
                "clauses":[{"attribute": "name", "op": "in", "values": ["Jane"]}],
                "weight": 10000,
                "bucketBy": "country",
                "rolloutContextKind": "org"
            }"#,
        )
        .expect("should parse");
        assert_eq!(
            rule,
            SegmentRule {
                id: Some("r".into()),
                rollout_context_kind: Some(Kind::try_from("org").unwrap()),
                ..jane_rule(Some(10_000.0), Some("country"))
            }
        );
    }

    #[test]
    fn parses_context_lists_and_big_segment_fields() {
        let segment: Segment = serde_json::from_str(
            r#"{
                "key": "s", "version": 3, "salt": "x",
                "includedContexts": [{"contextKind": "org", "values": ["o1"]}],
                "unbounded": true, "unboundedContextKind": "org", "generation": 2
            }"#,
        )
        .unwrap();
        assert!(segment.unbounded);
        assert_eq!(segment.unbounded_context_kind().as_str(), "org");
        assert_eq!(segment.big_segment_ref(2), "s.g2");

        let org = ContextBuilder::new("o1").kind("org").build().unwrap();
        assert!(segment.is_included(&org));
        assert!(!segment.is_included(&user("o1")));
    }

    #[tokio::test]
    async fn segment_match_clause_falls_through_if_segment_not_found() {
        let mut segment = new_segment();
        segment.included.push("foo".to_string());
        segment.key = "different-key".to_string();
        assert_segment_match(&segment, user("foo"), false).await;
    }

    #[tokio::test]
    async fn can_match_just_one_segment_from_list() {
        let mut segment = new_segment();
        segment.included.push("foo".to_string());
        let queries = TestQueries::with_segments(vec![segment]);
        let flag = Flag::new_boolean_flag_with_segment_match(vec![
            "different-segkey",
            "segkey",
            "another-segkey",
        ]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("foo")).await;
        assert_that!(result.value).contains_value(AttributeValue::Bool(true));
    }

    #[tokio::test]
    async fn context_is_explicitly_included() {
        let mut segment = new_segment();
        segment.included.push("foo".to_string());
        segment.included.push("bar".to_string());
        assert_segment_match(&segment, user("bar"), true).await;
    }

    #[tokio::test]
    async fn included_contexts_match_by_kind() {
        let mut segment = new_segment();
        segment.included_contexts.push(SegmentTarget {
            context_kind: Kind::try_from("org").unwrap(),
            values: vec!["o1".into()],
        });
        let multi = MultiContextBuilder::new()
            .add_context(user("u1"))
            .add_context(ContextBuilder::new("o1").kind("org").build().unwrap())
            .build()
            .unwrap();
        assert_segment_match(&segment, multi, true).await;
        assert_segment_match(&segment, user("o1"), false).await;
    }

    #[tokio::test]
    async fn context_is_matched_by_segment_rule() {
        let mut segment = new_segment();
        segment.rules.push(jane_rule(None, None));
        let jane = ContextBuilder::new("foo").name("Jane").build().unwrap();
        let joan = ContextBuilder::new("foo").name("Joan").build().unwrap();
        assert_segment_match(&segment, jane, true).await;
        assert_segment_match(&segment, joan, false).await;
    }

    #[tokio::test]
    async fn context_is_explicitly_excluded() {
        let mut segment = new_segment();
        segment.rules.push(jane_rule(None, None));
        segment.excluded.push("foo".to_string());
        segment.excluded_contexts.push(SegmentTarget {
            context_kind: Kind::user(),
            values: vec!["bar".into()],
        });
        let jane = ContextBuilder::new("foo").name("Jane").build().unwrap();
        let bar_jane = ContextBuilder::new("bar").name("Jane").build().unwrap();
        assert_segment_match(&segment, jane, false).await;
        assert_segment_match(&segment, bar_jane, false).await;
    }

    #[tokio::test]
    async fn includes_override_excludes() {
        let mut segment = new_segment();
        segment.included.push("bar".to_string());
        segment.excluded.push("foo".to_string());
        segment.excluded.push("bar".to_string());
        assert_segment_match(&segment, user("bar"), true).await;
    }

    #[tokio::test]
    async fn does_not_match_if_no_includes_or_rules_match() {
        let mut segment = new_segment();
        segment.rules.push(jane_rule(None, None));
        segment.included.push("key".to_string());
        let bob = ContextBuilder::new("other-key").name("Bob").build().unwrap();
        assert_segment_match(&segment, bob, false).await;
    }

    #[tokio::test]
    async fn rule_weight_admits_or_rejects() {
        let jane = || ContextBuilder::new("key").name("Jane").build().unwrap();

        let mut segment = new_segment();
        segment.rules.push(jane_rule(Some(99_999.0), None));
        assert_segment_match(&segment, jane(), true).await;

        let mut segment = new_segment();
        segment.rules.push(jane_rule(Some(1.0), None));
        assert_segment_match(&segment, jane(), false).await;
    }

    #[tokio::test]
    async fn rule_can_have_percentage_rollout() {
        let mut segment = new_segment();
        segment.rules.push(thirty_percent_rule(None));

        // segkey.salty.userKeyA buckets to 0.14574753, userKeyZ to 0.45679215
        assert_segment_match(&segment, user("userKeyA"), true).await;
        assert_segment_match(&segment, user("userKeyZ"), false).await;
    }

    #[tokio::test]
    async fn rule_can_have_percentage_rollout_by_any_attribute() {
        let mut segment = new_segment();
        segment.rules.push(thirty_percent_rule(Some("name")));
        let a = ContextBuilder::new("x").name("userKeyA").build().unwrap();
        let z = ContextBuilder::new("x").name("userKeyZ").build().unwrap();
        assert_segment_match(&segment, a, true).await;
        assert_segment_match(&segment, z, false).await;
    }

    #[tokio::test]
    async fn invalid_rule_bucket_by_is_malformed() {
        let mut segment = new_segment();
        segment.rules.push(thirty_percent_rule(Some("//")));
        let queries = TestQueries::with_segments(vec![segment]);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("userKeyA")).await;
        assert!(result.is_error());
    }

    fn big_segment() -> Segment {
        Segment {
            unbounded: true,
            generation: Some(2),
            // lists are ignored for unbounded segments
            included: vec!["included".into()],
            ..new_segment()
        }
    }

    fn membership(member: bool) -> BigSegmentMembership {
        hashmap! {"segkey.g2".to_string() => member}
    }

    #[tokio::test]
    async fn big_segment_membership_decides() {
        let queries = TestQueries::with_segments(vec![big_segment()])
            .with_big_segments(membership(true), BigSegmentsStatus::Healthy);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("anyone")).await;
        assert_that!(result.value).contains_value(AttributeValue::Bool(true));
        assert_that!(result.reason.big_segments_status).contains_value(BigSegmentsStatus::Healthy);

        let queries = TestQueries::with_segments(vec![big_segment()])
            .with_big_segments(membership(false), BigSegmentsStatus::Stale);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("included")).await;
        assert_that!(result.value).contains_value(AttributeValue::Bool(false));
        assert_that!(result.reason.big_segments_status).contains_value(BigSegmentsStatus::Stale);
    }

    #[tokio::test]
    async fn big_segment_without_store_is_not_configured() {
        let queries = TestQueries::with_segments(vec![big_segment()]);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("anyone")).await;
        assert_that!(result.value).contains_value(AttributeValue::Bool(false));
        assert_that!(result.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::NotConfigured);
    }

    #[tokio::test]
    async fn big_segment_without_generation_is_not_configured() {
        let segment = Segment {
            generation: None,
            ..big_segment()
        };
        let queries = TestQueries::with_segments(vec![segment])
            .with_big_segments(membership(true), BigSegmentsStatus::Healthy);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("anyone")).await;
        assert_that!(result.value).contains_value(AttributeValue::Bool(false));
        assert_that!(result.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::NotConfigured);
        assert_eq!(queries.big_segment_queries(), 0);
    }

    #[tokio::test]
    async fn big_segment_store_error_still_yields_a_value() {
        let queries = TestQueries::with_segments(vec![big_segment()])
            .with_big_segments(BigSegmentMembership::new(), BigSegmentsStatus::StoreError);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("anyone")).await;
        assert!(!result.is_error());
        assert_that!(result.value).contains_value(AttributeValue::Bool(false));
        assert_that!(result.reason.big_segments_status)
            .contains_value(BigSegmentsStatus::StoreError);
        assert!(matches!(result.reason.kind, crate::ReasonKind::Fallthrough { .. }));
    }

    #[tokio::test]
    async fn regular_segments_leave_big_segment_status_unset() {
        let mut segment = new_segment();
        segment.included.push("foo".into());
        let queries = TestQueries::with_segments(vec![segment]);
        let flag = Flag::new_boolean_flag_with_segment_match(vec!["segkey"]);
        let result = Evaluator::new(&queries).evaluate(&flag, &user("foo")).await;
        assert_that!(result.reason).is_equal_to(Reason::from(crate::ReasonKind::RuleMatch {
            rule_index: 0,
            rule_id: "rule".into(),
            in_experiment: false,
        }));
    }
}

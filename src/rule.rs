use chrono::{self, Utc};
use log::{error, warn};
use regex::Regex;
use serde::Deserialize;

use crate::error::Malformed;
use crate::variation::VariationOrRollout;
use crate::{AttributeValue, Context, Kind, Reference};

/// A single condition of a flag or segment rule.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    #[serde(default)]
    pub(crate) attribute: Reference,
    #[serde(default)]
    pub(crate) negate: bool,
    pub(crate) op: Op,
    #[serde(default)]
    pub(crate) values: Vec<AttributeValue>,
    // Absent means "user". Ignored when the attribute is `kind`.
    #[serde(default)]
    pub(crate) context_kind: Option<Kind>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub(crate) clauses: Vec<Clause>,
    #[serde(flatten)]
    pub variation_or_rollout: VariationOrRollout,
    #[serde(default)]
    pub track_events: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Op {
    In,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Before,
    After,
    SegmentMatch,
    SemVerEqual,
    SemVerGreaterThan,
    SemVerLessThan,
    /// Any operator this version does not know. It never matches.
    #[serde(other)]
    Unknown,
}

impl Clause {
    pub(crate) fn is_segment_match(&self) -> bool {
        self.op == Op::SegmentMatch
    }

    /// The segment keys listed by a `segmentMatch` clause. Non-string values are skipped.
    pub(crate) fn segment_keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(AttributeValue::as_str)
    }

    pub(crate) fn maybe_negate(&self, v: bool) -> bool {
        if self.negate {
            !v
        } else {
            v
        }
    }

    /// Matches every operator except `segmentMatch`, which needs segment lookups and is handled
    /// by the evaluator.
    pub(crate) fn matches_non_segment(&self, context: &Context) -> Result<bool, Malformed> {
        if !self.attribute.is_valid() {
            return Err(Malformed::new(format!(
                "invalid clause attribute reference '{}'",
                self.attribute
            )));
        }

        if self.attribute.is_kind() {
            let any_match = context
                .kinds()
                .into_iter()
                .any(|kind| self.matches_any(&AttributeValue::String(kind.to_string())));
            return Ok(self.maybe_negate(any_match));
        }

        let default_kind = Kind::user();
        let kind = self.context_kind.as_ref().unwrap_or(&default_kind);

        // a missing or null attribute never matches, whatever `negate` says
        let context_value = match context.value_for_kind(&self.attribute, kind) {
            Some(v) if !v.is_null() => v,
            _ => return Ok(false),
        };

        let any_match = context_value.any(|v| self.matches_any(v));
        Ok(self.maybe_negate(any_match))
    }

    fn matches_any(&self, context_value: &AttributeValue) -> bool {
        self.values
            .iter()
            .any(|clause_value| self.op.matches(context_value, clause_value))
    }

    #[cfg(test)]
    pub(crate) fn new_match(attribute: &str, op: Op, values: Vec<AttributeValue>) -> Self {
        Clause {
            attribute: Reference::new(attribute),
            negate: false,
            op,
            values,
            context_kind: None,
        }
    }
}

impl Op {
    pub(crate) fn matches(&self, lhs: &AttributeValue, rhs: &AttributeValue) -> bool {
        match self {
            Op::In => lhs == rhs,

            // string ops
            Op::StartsWith => string_op(lhs, rhs, |l, r| l.starts_with(r)),
            Op::EndsWith => string_op(lhs, rhs, |l, r| l.ends_with(r)),
            Op::Contains => string_op(lhs, rhs, |l, r| l.contains(r)),
            Op::Matches => string_op(lhs, rhs, |l, r| match Regex::new(r) {
                Ok(re) => re.is_match(l),
                Err(e) => {
                    warn!("invalid regex for 'matches' operator ({}): {}", e, r);
                    false
                }
            }),

            // numeric ops
            Op::LessThan => numeric_op(lhs, rhs, |l, r| l < r),
            Op::LessThanOrEqual => numeric_op(lhs, rhs, |l, r| l <= r),
            Op::GreaterThan => numeric_op(lhs, rhs, |l, r| l > r),
            Op::GreaterThanOrEqual => numeric_op(lhs, rhs, |l, r| l >= r),

            Op::Before => time_op(lhs, rhs, |l, r| l < r),
            Op::After => time_op(lhs, rhs, |l, r| l > r),

            Op::SemVerEqual => semver_op(lhs, rhs, |l, r| l == r),
            Op::SemVerLessThan => semver_op(lhs, rhs, |l, r| l < r),
            Op::SemVerGreaterThan => semver_op(lhs, rhs, |l, r| l > r),

            Op::SegmentMatch => {
                error!("segmentMatch is resolved by the evaluator, not by value comparison");
                false
            }
            Op::Unknown => false,
        }
    }
}

fn string_op<F: Fn(&str, &str) -> bool>(lhs: &AttributeValue, rhs: &AttributeValue, f: F) -> bool {
    match (lhs.as_str(), rhs.as_str()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn numeric_op<F: Fn(f64, f64) -> bool>(lhs: &AttributeValue, rhs: &AttributeValue, f: F) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn time_op<F: Fn(chrono::DateTime<Utc>, chrono::DateTime<Utc>) -> bool>(
    lhs: &AttributeValue,
    rhs: &AttributeValue,
    f: F,
) -> bool {
    match (lhs.to_datetime(), rhs.to_datetime()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

fn semver_op<F: Fn(semver::Version, semver::Version) -> bool>(
    lhs: &AttributeValue,
    rhs: &AttributeValue,
    f: F,
) -> bool {
    match (lhs.to_semver(), rhs.to_semver()) {
        (Some(l), Some(r)) => f(l, r),
        _ => false,
    }
}

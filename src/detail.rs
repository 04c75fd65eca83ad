use serde::Serialize;

use crate::big_segments::BigSegmentsStatus;
use crate::error::ErrorKind;
use crate::util::is_false;
use crate::variation::VariationIndex;
use crate::AttributeValue;

/// The outcome of evaluating a flag: the chosen value and why it was chosen.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalResult {
    /// One of the flag's variations, or None when the flag is off without an off variation or
    /// evaluation failed.
    pub value: Option<AttributeValue>,

    /// Index of [EvalResult::value] in the flag's variations. None whenever no variation was
    /// selected, which is different from index 0.
    pub variation_index: Option<VariationIndex>,

    pub reason: Reason,

    /// Human-readable diagnostics for error results.
    pub message: Option<String>,
}

impl EvalResult {
    /// A result with no value and no variation index.
    pub fn empty(reason: impl Into<Reason>) -> Self {
        EvalResult {
            value: None,
            variation_index: None,
            reason: reason.into(),
            message: None,
        }
    }

    /// An error result. Callers use this for conditions they detect themselves, such as an
    /// unknown flag key.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        EvalResult {
            message: Some(message.into()),
            ..EvalResult::empty(ReasonKind::Error { error_kind: kind })
        }
    }

    pub fn is_error(&self) -> bool {
        self.reason.is_error()
    }

    /// Substitutes the caller's default value when evaluation failed. The reason is kept so the
    /// failure stays observable.
    pub fn or_default_on_error(mut self, default: AttributeValue) -> Self {
        if self.is_error() {
            self.value = Some(default);
            self.variation_index = None;
        }
        self
    }
}

/// Why a flag evaluated to a particular value.
///
/// Serializes to the standard reason JSON, e.g.
/// `{"kind":"RULE_MATCH","ruleIndex":0,"ruleId":"x","inExperiment":true}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reason {
    #[serde(flatten)]
    pub kind: ReasonKind,
    /// Present when a big segment was consulted anywhere during the evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub big_segments_status: Option<BigSegmentsStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum ReasonKind {
    /// The flag was off and returned its off value.
    Off,
    /// The context key was individually targeted.
    TargetMatch,
    /// The context matched one of the flag's rules.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Zero-based index of the [crate::FlagRule] that matched.
        rule_index: usize,
        #[serde(skip_serializing_if = "String::is_empty")]
        rule_id: String,
        /// True if the variation came from an experiment rollout and the selected
        /// [crate::WeightedVariation] is tracked.
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    /// A prerequisite was missing, off, or did not return the required variation.
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed { prerequisite_key: String },
    /// The context matched no target and no rule.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        #[serde(skip_serializing_if = "is_false")]
        in_experiment: bool,
    },
    /// The flag could not be evaluated; the caller should use its default value.
    #[serde(rename_all = "camelCase")]
    Error { error_kind: ErrorKind },
}

impl Reason {
    pub fn is_error(&self) -> bool {
        matches!(self.kind, ReasonKind::Error { .. })
    }

    /// Whether the evaluation enrolled the context in an experiment.
    pub fn is_in_experiment(&self) -> bool {
        match self.kind {
            ReasonKind::RuleMatch { in_experiment, .. } => in_experiment,
            ReasonKind::Fallthrough { in_experiment } => in_experiment,
            _ => false,
        }
    }
}

impl From<ReasonKind> for Reason {
    fn from(kind: ReasonKind) -> Self {
        Reason {
            kind,
            big_segments_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case(ReasonKind::Off, json!({"kind": "OFF"}); "off")]
    #[test_case(ReasonKind::Fallthrough { in_experiment: false }, json!({"kind": "FALLTHROUGH"}); "fallthrough")]
    #[test_case(
        ReasonKind::Fallthrough { in_experiment: true },
        json!({"kind": "FALLTHROUGH", "inExperiment": true});
        "fallthrough in experiment"
    )]
    #[test_case(ReasonKind::TargetMatch, json!({"kind": "TARGET_MATCH"}); "target match")]
    #[test_case(
        ReasonKind::RuleMatch { rule_index: 1, rule_id: "x".into(), in_experiment: false },
        json!({"kind": "RULE_MATCH", "ruleIndex": 1, "ruleId": "x"});
        "rule match"
    )]
    #[test_case(
        ReasonKind::RuleMatch { rule_index: 1, rule_id: "x".into(), in_experiment: true },
        json!({"kind": "RULE_MATCH", "ruleIndex": 1, "ruleId": "x", "inExperiment": true});
        "rule match in experiment"
    )]
    #[test_case(
        ReasonKind::PrerequisiteFailed { prerequisite_key: "x".into() },
        json!({"kind": "PREREQUISITE_FAILED", "prerequisiteKey": "x"});
        "prerequisite failed"
    )]
    #[test_case(
        ReasonKind::Error { error_kind: ErrorKind::MalformedFlag },
        json!({"kind": "ERROR", "errorKind": "MALFORMED_FLAG"});
        "error"
    )]
    fn reason_serialization(kind: ReasonKind, expected: serde_json::Value) {
        let actual = serde_json::to_value(Reason::from(kind)).unwrap();
        assert_json_eq!(actual, expected);
    }

    #[test]
    fn big_segments_status_is_serialized_when_present() {
        let reason = Reason {
            kind: ReasonKind::Fallthrough {
                in_experiment: false,
            },
            big_segments_status: Some(BigSegmentsStatus::StoreError),
        };
        assert_json_eq!(
            serde_json::to_value(reason).unwrap(),
            json!({"kind": "FALLTHROUGH", "bigSegmentsStatus": "STORE_ERROR"})
        );
    }

    #[test]
    fn error_results() {
        let result = EvalResult::error(ErrorKind::FlagNotFound, "no flag 'x'");
        assert!(result.is_error());
        assert_that!(result.value).is_none();
        assert_that!(result.variation_index).is_none();
        assert_that!(result.message).contains_value("no flag 'x'".to_string());

        let with_default = result.or_default_on_error("fallback".into());
        assert_that!(with_default.value).contains_value(AttributeValue::from("fallback"));
        assert!(with_default.is_error(), "the reason is preserved");
    }

    #[test]
    fn defaults_are_not_applied_to_successful_results() {
        let result = EvalResult {
            value: Some(true.into()),
            variation_index: Some(1),
            ..EvalResult::empty(ReasonKind::TargetMatch)
        };
        assert_that!(result.clone().or_default_on_error(false.into())).is_equal_to(result);

        let off = EvalResult::empty(ReasonKind::Off);
        asserting!("an off flag without off variation is not an error")
            .that(&off.clone().or_default_on_error(false.into()).value)
            .is_none();
    }

    #[test]
    fn experiment_reasons() {
        assert!(Reason::from(ReasonKind::Fallthrough {
            in_experiment: true
        })
        .is_in_experiment());
        assert!(!Reason::from(ReasonKind::RuleMatch {
            rule_index: 0,
            rule_id: "r".into(),
            in_experiment: false
        })
        .is_in_experiment());
        assert!(!Reason::from(ReasonKind::Off).is_in_experiment());
    }
}

use itertools::Itertools;
use serde::Deserialize;

use crate::detail::{EvalResult, Reason, ReasonKind};
use crate::error::Malformed;
use crate::rule::FlagRule;
use crate::variation::{VariationIndex, VariationOrRollout};
use crate::{AttributeValue, Context, Kind};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub key: String,
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub(crate) on: bool,

    // Legacy per-user targets; their kind is always "user".
    #[serde(default)]
    pub(crate) targets: Vec<Target>,
    #[serde(default)]
    pub(crate) context_targets: Vec<Target>,
    #[serde(default)]
    pub(crate) rules: Vec<FlagRule>,
    #[serde(default)]
    pub(crate) prerequisites: Vec<Prereq>,

    pub(crate) fallthrough: VariationOrRollout,
    #[serde(default)]
    pub(crate) off_variation: Option<VariationIndex>,
    #[serde(default)]
    pub(crate) variations: Vec<AttributeValue>,

    #[serde(flatten)]
    client_visibility: ClientVisibility,

    #[serde(default)]
    pub(crate) salt: String,

    #[serde(default)]
    pub track_events: bool,
    #[serde(default)]
    pub track_events_fallthrough: bool,
    #[serde(default)]
    pub debug_events_until_date: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Prereq {
    pub key: String,
    pub variation: VariationIndex,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Target {
    #[serde(default)]
    pub(crate) context_kind: Kind,
    #[serde(default)]
    pub(crate) values: Vec<String>,
    pub(crate) variation: VariationIndex,
}

/// Which client-side SDKs may see the flag.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSideAvailability {
    pub using_mobile_key: bool,
    pub using_environment_id: bool,
}

// Older payloads carry a bare `clientSide` boolean instead of `clientSideAvailability`. When
// both are present the newer field wins.
#[derive(Clone, Debug, Deserialize)]
#[serde(from = "RawClientVisibility")]
struct ClientVisibility {
    client_side_availability: ClientSideAvailability,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientVisibility {
    #[serde(default)]
    client_side: Option<bool>,
    #[serde(default)]
    client_side_availability: Option<ClientSideAvailability>,
}

impl From<RawClientVisibility> for ClientVisibility {
    fn from(raw: RawClientVisibility) -> Self {
        let client_side_availability =
            raw.client_side_availability
                .unwrap_or_else(|| ClientSideAvailability {
                    using_environment_id: raw.client_side.unwrap_or_default(),
                    using_mobile_key: true,
                });
        ClientVisibility {
            client_side_availability,
        }
    }
}

impl Flag {
    /// The result selecting variation `index` for `reason`. An index outside the variations is
    /// a malformed flag.
    pub(crate) fn variation(
        &self,
        index: VariationIndex,
        reason: ReasonKind,
    ) -> Result<EvalResult, Malformed> {
        let value = self.variations.get(index).ok_or_else(|| {
            Malformed::new(format!(
                "flag '{}' has no variation {} ({} defined)",
                self.key,
                index,
                self.variations.len()
            ))
        })?;

        Ok(EvalResult {
            value: Some(value.clone()),
            variation_index: Some(index),
            ..EvalResult::empty(reason)
        })
    }

    /// The off variation for `reason`, or an empty result when the flag has none.
    pub(crate) fn off_value(&self, reason: ReasonKind) -> Result<EvalResult, Malformed> {
        match self.off_variation {
            Some(index) => self.variation(index, reason),
            None => Ok(EvalResult::empty(reason)),
        }
    }

    /// The lowest variation whose targets list the context's key.
    ///
    /// Without context targets the legacy user targets decide. Otherwise the context targets
    /// decide, and one of kind "user" stands for the legacy target with the same variation.
    /// Targets sharing a variation are checked in declared order.
    pub(crate) fn target_match(&self, context: &Context) -> Option<VariationIndex> {
        if self.context_targets.is_empty() {
            return self
                .targets
                .iter()
                .sorted_by_key(|target| target.variation)
                .find_map(|target| target.match_variation(context));
        }

        self.context_targets
            .iter()
            .sorted_by_key(|target| target.variation)
            .find_map(|context_target| {
                if context_target.context_kind.is_user() {
                    self.targets
                        .iter()
                        .filter(|target| target.variation == context_target.variation)
                        .find_map(|target| target.match_variation(context))
                } else {
                    context_target.match_variation(context)
                }
            })
    }

    pub fn using_environment_id(&self) -> bool {
        self.client_visibility
            .client_side_availability
            .using_environment_id
    }

    pub fn using_mobile_key(&self) -> bool {
        self.client_visibility
            .client_side_availability
            .using_mobile_key
    }

    /// Whether an evaluation that produced `reason` should be reported with full event detail.
    pub fn is_experimentation_enabled(&self, reason: &Reason) -> bool {
        match &reason.kind {
            _ if reason.is_in_experiment() => true,
            ReasonKind::Fallthrough { .. } => self.track_events_fallthrough,
            ReasonKind::RuleMatch { rule_index, .. } => self
                .rules
                .get(*rule_index)
                .map(|rule| rule.track_events)
                .unwrap_or(false),
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn new_boolean_flag_with_segment_match(segment_keys: Vec<&str>) -> Self {
        use crate::rule::{Clause, Op};

        Self {
            key: "feature".to_string(),
            version: 1,
            on: true,
            targets: vec![],
            context_targets: vec![],
            rules: vec![FlagRule {
                id: "rule".to_string(),
                clauses: vec![Clause::new_match(
                    "key",
                    Op::SegmentMatch,
                    segment_keys.into_iter().map(AttributeValue::from).collect(),
                )],
                variation_or_rollout: VariationOrRollout::Variation { variation: 1 },
                track_events: false,
            }],
            prerequisites: vec![],
            fallthrough: VariationOrRollout::Variation { variation: 0 },
            off_variation: Some(0),
            variations: vec![AttributeValue::Bool(false), AttributeValue::Bool(true)],
            client_visibility: ClientVisibility {
                client_side_availability: ClientSideAvailability {
                    using_mobile_key: false,
                    using_environment_id: false,
                },
            },
            salt: "xyz".to_string(),
            track_events: false,
            track_events_fallthrough: false,
            debug_events_until_date: None,
        }
    }
}

impl Target {
    fn match_variation(&self, context: &Context) -> Option<VariationIndex> {
        let key = context.key_for_kind(&self.context_kind)?;
        self.values
            .iter()
            .any(|value| value == key)
            .then_some(self.variation)
    }
}

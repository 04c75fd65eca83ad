use serde::Deserialize;

use crate::bucketing::{bucket_with_prefix, BucketPrefix};
use crate::error::Malformed;
use crate::{Context, Kind, Reference};

pub type VariationIndex = usize;

/// The variation chosen by a rule or fallthrough, and whether choosing it enrolled the
/// context in an experiment.
#[derive(Debug, PartialEq)]
pub(crate) struct BucketResult {
    pub variation_index: VariationIndex,
    pub in_experiment: bool,
}

impl From<VariationIndex> for BucketResult {
    fn from(variation_index: VariationIndex) -> Self {
        BucketResult {
            variation_index,
            in_experiment: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RolloutKind {
    #[default]
    Rollout,
    /// Disables secondary-key bucketing and reports `inExperiment` for tracked variations.
    Experiment,
}

/// A weighted distribution over variations.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default)]
    pub kind: RolloutKind,
    /// Attribute to hash; `key` when absent. Experiments always hash `key`.
    #[serde(default)]
    pub bucket_by: Option<Reference>,
    /// Which part of a multi-context to bucket; `user` when absent.
    #[serde(default)]
    pub context_kind: Option<Kind>,
    #[serde(default)]
    pub variations: Vec<WeightedVariation>,
    /// When present, replaces the flag key and salt in the hash input.
    #[serde(default)]
    pub seed: Option<i64>,
}

/// Weights are in thousandths of a percent: 100000 is the whole population.
pub type VariationWeight = f64;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WeightedVariation {
    pub variation: VariationIndex,
    pub weight: VariationWeight,
    #[serde(default)]
    pub untracked: bool,
}

// Data errors can produce rules with neither a variation nor a rollout, or with both. Neither is
// kept as Malformed so the flag still deserializes; when both are present the variation wins
// because it is tried first.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VariationOrRollout {
    Variation { variation: VariationIndex },
    Rollout { rollout: Rollout },
    Malformed(serde_json::Value),
}

impl Rollout {
    fn select(
        &self,
        context: &Context,
        flag_key: &str,
        salt: &str,
    ) -> Result<BucketResult, Malformed> {
        let last = self
            .variations
            .last()
            .ok_or_else(|| Malformed::new("rollout has no variations"))?;

        let is_experiment = self.kind == RolloutKind::Experiment;
        let key_ref = Reference::new("key");
        let bucket_by = match (&self.bucket_by, is_experiment) {
            (Some(reference), false) => reference,
            _ => &key_ref,
        };
        if !bucket_by.is_valid() {
            return Err(Malformed::new(format!(
                "invalid bucketBy reference '{}' in rollout",
                bucket_by
            )));
        }

        let default_kind = Kind::user();
        let context_kind = self.context_kind.as_ref().unwrap_or(&default_kind);
        let (bucket, found) = bucket_with_prefix(
            context,
            BucketPrefix::new(flag_key, salt, self.seed),
            bucket_by,
            is_experiment,
            context_kind,
        );

        let chosen = select_weighted(&self.variations, bucket).unwrap_or(last);
        Ok(BucketResult {
            variation_index: chosen.variation,
            in_experiment: is_experiment && found && !chosen.untracked,
        })
    }
}

/// The first variation whose cumulative weight exceeds `bucket`, or None when the weights
/// run out first.
fn select_weighted(variations: &[WeightedVariation], bucket: f64) -> Option<&WeightedVariation> {
    let mut upper_bound = 0.0;
    variations.iter().find(|wv| {
        upper_bound += wv.weight / 100_000.0;
        bucket < upper_bound
    })
}

impl VariationOrRollout {
    /// Picks a variation for the context. Weights that sum to less than 100000 leave a gap at
    /// the top of the range, which falls to the last listed variation.
    pub(crate) fn resolve(
        &self,
        context: &Context,
        flag_key: &str,
        salt: &str,
    ) -> Result<BucketResult, Malformed> {
        match self {
            VariationOrRollout::Variation { variation } => Ok((*variation).into()),
            VariationOrRollout::Rollout { rollout } => rollout.select(context, flag_key, salt),
            VariationOrRollout::Malformed(_) => Err(Malformed::new(
                "variation/rollout object with no variation or rollout",
            )),
        }
    }
}

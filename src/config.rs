use serde::Deserialize;

const DEFAULT_MAX_DEPTH: usize = 50;

/// Tuning for an [crate::Evaluator].
///
/// Deserializes from camelCase JSON (`{"maxDepth": 20}`) so it can live inside a host's own
/// options file; missing fields take their defaults.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    /// How many prerequisites, or nested segments, may be chained below a flag before the
    /// evaluation is treated as malformed. Cycles are caught regardless of this limit.
    pub max_depth: usize,
}

impl EvaluatorConfig {
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

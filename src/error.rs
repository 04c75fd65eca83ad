use serde::{Deserialize, Serialize};

/// Carried by [crate::ReasonKind::Error] when a flag could not be evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The caller evaluated a flag before its data source was ready.
    #[error("client not ready")]
    ClientNotReady,
    /// No flag exists with the requested key. Produced by the caller, never by the evaluator.
    #[error("flag not found")]
    FlagNotFound,
    /// The flag or segment data is internally inconsistent: a variation index out of range, an
    /// invalid attribute reference, an empty rollout, or a circular or overly deep chain of
    /// prerequisites or segments.
    #[error("malformed flag")]
    MalformedFlag,
    /// The caller supplied no usable context. Produced by the caller.
    #[error("user not specified")]
    UserNotSpecified,
    /// The result value did not have the type the caller asked for. Produced by the caller.
    #[error("wrong type")]
    WrongType,
    /// An unexpected failure; see the logs.
    #[error("exception")]
    Exception,
}

/// A malformed-data condition found part way through an evaluation. It unwinds to the
/// evaluator, which turns it into an [ErrorKind::MalformedFlag] result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub(crate) struct Malformed(pub(crate) String);

impl Malformed {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Malformed(message.into())
    }
}

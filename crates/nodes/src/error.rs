//! Action-level error types.

use thiserror::Error;

use crate::ActionKind;

/// Errors returned by an [`ActionInvoker`](crate::ActionInvoker).
///
/// The engine uses the variant to decide retry behaviour:
/// - `Transient`: the node visit is retried after an exponential back-off.
/// - `Permanent`: the instance is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Transient failure (timeout, rate limit, provider outage).
    #[error("transient action failure: {0}")]
    Transient(String),

    /// Non-retryable failure (invalid recipient, rejected template).
    #[error("permanent action failure: {0}")]
    Permanent(String),
}

impl ActionError {
    /// The human-readable reason without the variant prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Permanent(reason) => reason,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// An action's parameters failed schema validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid `{field}` for action `{kind}`: {reason}")]
pub struct ParamError {
    pub kind: ActionKind,
    pub field: &'static str,
    pub reason: String,
}

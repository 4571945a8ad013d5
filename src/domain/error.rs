// ============================================================
// Layer 3 - Readout Errors
// ============================================================
// Every failure the registry can report is one of these.
// They fall into two families:
//
//   Configuration - the request itself is malformed
//                   (no base readout, ambiguous key, bad shapes)
//   Lookup        - a name was given that nothing answers to
//                   (unknown data key, unknown predictor kind,
//                    a per-key map without the key)
//
// None of them are retried. The application layer wraps them
// with anyhow context before they reach the user.
//
// Reference: Rust Book §9 (Recoverable Errors with Result)
//            thiserror crate documentation

use std::fmt;

use crate::domain::options::Reduction;

/// Broad classification of a [`ReadoutError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Lookup,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => f.write_str("configuration error"),
            ErrorKind::Lookup        => f.write_str("lookup error"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadoutError {
    #[error("configuration error: no base readout type was given and the variant does not bind one")]
    MissingBaseReadout,

    #[error("grid mean predictor {0} does not exist")]
    UnknownGridMeanPredictor(String),

    #[error("configuration error: a data key is required when {registered} readouts are registered")]
    UnresolvedDataKey { registered: usize },

    #[error("no readout registered for data key '{0}'")]
    UnknownDataKey(String),

    #[error("'{map}' has no entry for data key '{key}'")]
    MissingEntry { map: &'static str, key: String },

    #[error("reduction method '{0}' is not recognized. Valid values are [mean, sum, none]")]
    UnknownReduction(String),

    #[error("reduction '{0}' is not supported by this regularizer")]
    UnsupportedReduction(Reduction),

    #[error("the anchor readout does not own a {component}")]
    MissingAnchorParameter { component: &'static str },

    #[error("invalid readout configuration: {0}")]
    InvalidConfig(String),
}

impl ReadoutError {
    /// Which family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadoutError::UnknownGridMeanPredictor(_)
            | ReadoutError::UnknownDataKey(_)
            | ReadoutError::MissingEntry { .. } => ErrorKind::Lookup,
            _ => ErrorKind::Configuration,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ReadoutError::InvalidConfig(message.into())
    }
}

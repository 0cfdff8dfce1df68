//! Feature gate error types.

use thiserror::Error;

/// Errors raised while evaluating feature gates.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("control plane version query failed: {0}")]
    VersionQuery(String),

    #[error("invalid control plane version: {0:?}")]
    InvalidVersion(String),

    #[error("invalid threshold for {feature}: {value:?}")]
    InvalidThreshold { feature: &'static str, value: String },
}

pub type GateResult<T> = Result<T, GateError>;

/// Failure reported by a publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The control plane accepted the object but dropped fields; the
    /// identifiers name the features whose fields were dropped.
    #[error("control plane dropped fields for features {0:?}")]
    DroppedFields(Vec<String>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

use thiserror::Error;

/// Errors produced by identifier operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid component id: {0}")]
    InvalidId(String),

    #[error("invalid version in component id: {0}")]
    InvalidVersion(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

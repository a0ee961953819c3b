use thiserror::Error;

use tickvault_store::StoreError;

/// Validation errors for domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("security id cannot be empty")]
    EmptySecurityId,

    #[error("security type is unknown")]
    UnknownSecurityType,

    #[error("invalid interval code {value}, expected one of 1, 10, 24, 31, 60, 7, 4")]
    InvalidInterval { value: i64 },

    #[error("timestamp is not in a recognized format: '{value}'")]
    InvalidTimestamp { value: String },
}

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("security {id} is not registered")]
    UnknownSecurity { id: String },

    #[error("instrument type '{value}' is not supported")]
    UnsupportedInstrumentType { value: String },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("one or more parallel operations failed:\n{0}")]
    Aggregate(String),
}

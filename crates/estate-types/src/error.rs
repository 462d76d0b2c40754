use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid entity reference {value:?}: {reason}")]
    InvalidReference { value: String, reason: String },

    #[error("invalid version token: {0:?}")]
    InvalidVersion(String),

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(i64),
}

use std::io;
use std::time::Duration;

use estate_store::StoreError;

/// Errors produced by the embedded document database.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// I/O error on the journal or data directory.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Journal record encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Insert of an `_id` that is already present.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// A collection lock could not be taken within the operation timeout.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: &'static str, elapsed: Duration },

    /// Credentials missing or rejected by the access list.
    #[error("authentication failed for {0}")]
    AuthFailed(String),

    /// Database or collection name outside the portable alphabet.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("invalid document store configuration: {0}")]
    InvalidConfig(String),

    /// The client was closed.
    #[error("client is closed")]
    Closed,
}

pub type DocumentResult<T> = Result<T, DocumentError>;

impl From<DocumentError> for StoreError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Io(e) => StoreError::Io(e),
            DocumentError::Timeout { operation, elapsed } => StoreError::Timeout {
                operation: operation.to_string(),
                elapsed,
            },
            DocumentError::Serialization(_) | DocumentError::DuplicateKey(_) => {
                StoreError::Io(io::Error::other(err.to_string()))
            }
            other => StoreError::StoreUnavailable(other.to_string()),
        }
    }
}

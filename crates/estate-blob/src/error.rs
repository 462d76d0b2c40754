use std::io;

use estate_store::StoreError;
use thiserror::Error;

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("invalid container name: {0:?}")]
    InvalidContainerName(String),

    #[error("invalid blob name: {0:?}")]
    InvalidBlobName(String),

    /// A conditional put found the blob in the wrong state.
    #[error("precondition {condition} failed for blob {name}")]
    PreconditionFailed { name: String, condition: &'static str },

    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid blob store configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

impl From<BlobError> for StoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Io(e) => StoreError::Io(e),
            BlobError::PreconditionFailed { .. } => {
                StoreError::Io(io::Error::other(err.to_string()))
            }
            other => StoreError::StoreUnavailable(other.to_string()),
        }
    }
}

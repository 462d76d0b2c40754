use std::time::Duration;

use estate_codec::CodecError;
use estate_types::{EntityReference, Version};

/// Errors from entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Read, update, or required-existence check on an absent entity.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityReference),

    /// Create of a reference that is already stored.
    #[error("entity already exists: {0}")]
    EntityAlreadyExists(EntityReference),

    /// Stored version differs from the version the caller last read.
    #[error("concurrent modification of {reference}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        reference: EntityReference,
        expected: Version,
        actual: Version,
    },

    /// Stored or streamed state is malformed (data corruption).
    #[error("cannot decode state of {}: {source}", describe(.reference))]
    Decoding {
        reference: Option<EntityReference>,
        #[source]
        source: CodecError,
    },

    /// Connection, authentication, provisioning failure, or use after
    /// passivation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A backend call did not complete within its configured timeout.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// Transport or disk failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(reference: &Option<EntityReference>) -> String {
    match reference {
        Some(r) => r.to_string(),
        None => "<unknown entity>".into(),
    }
}

impl StoreError {
    /// Decoding failure attributed to a known entity.
    pub fn decoding(reference: &EntityReference, source: CodecError) -> Self {
        Self::Decoding {
            reference: Some(reference.clone()),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::EntityAlreadyExists(_))
    }

    /// Returns `true` for errors the caller can act on without treating the
    /// store as broken: identity collisions, missing entities, and version
    /// conflicts.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound(_)
                | Self::EntityAlreadyExists(_)
                | Self::ConcurrentModification { .. }
        )
    }
}

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => Self::Io(e),
            CodecError::Line { line, source } => match *source {
                CodecError::Io(e) => Self::Io(e),
                inner => Self::Decoding {
                    reference: None,
                    source: CodecError::Line {
                        line,
                        source: Box::new(inner),
                    },
                },
            },
            other => Self::Decoding {
                reference: None,
                source: other,
            },
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> EntityReference {
        EntityReference::new(s).unwrap()
    }

    #[test]
    fn decoding_message_names_entity() {
        let err = StoreError::decoding(&r("user-1"), CodecError::NotUtf8);
        assert!(err.to_string().contains("user-1"));
        let err = StoreError::from(CodecError::NotUtf8);
        assert!(err.to_string().contains("<unknown entity>"));
    }

    #[test]
    fn codec_io_maps_to_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(StoreError::from(CodecError::Io(io)), StoreError::Io(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let wrapped = CodecError::Line {
            line: 3,
            source: Box::new(CodecError::Io(io)),
        };
        assert!(matches!(StoreError::from(wrapped), StoreError::Io(_)));
    }

    #[test]
    fn line_errors_stay_decoding() {
        let wrapped = CodecError::Line {
            line: 7,
            source: Box::new(CodecError::NotUtf8),
        };
        let err = StoreError::from(wrapped);
        assert!(matches!(err, StoreError::Decoding { .. }));
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn recoverable_classification() {
        assert!(StoreError::EntityNotFound(r("a")).is_recoverable());
        assert!(StoreError::EntityAlreadyExists(r("a")).is_recoverable());
        assert!(!StoreError::StoreUnavailable("down".into()).is_recoverable());
        assert!(!StoreError::Timeout {
            operation: "get".into(),
            elapsed: Duration::from_secs(1)
        }
        .is_recoverable());
    }
}

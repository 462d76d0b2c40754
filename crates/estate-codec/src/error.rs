use thiserror::Error;

/// Errors produced while encoding or decoding entity state.
///
/// Every variant except [`CodecError::Io`] means the serialized data itself
/// is malformed; callers treat those as corruption, not as transport
/// failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed state record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("state record is not valid UTF-8")]
    NotUtf8,

    #[error("backup record at line {line}: {source}")]
    Line {
        line: u64,
        #[source]
        source: Box<CodecError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Returns `true` if this error came from the transport rather than the
    /// data.
    pub fn is_io(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Json(e) => e.is_io(),
            Self::Line { source, .. } => source.is_io(),
            _ => false,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

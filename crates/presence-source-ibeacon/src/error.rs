use thiserror::Error;

/// Failure to turn a raw advertisement into a sample. Always recovered by
/// dropping the advertisement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("advertisement too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("invalid hex in {field}: {value:?}")]
    InvalidHex { field: &'static str, value: String },

    #[error("sender address must be 6 bytes, got {0}")]
    BadSender(usize),
}

/// Failure reading from an advertisement source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// One input record could not be parsed. The source stays usable.
    #[error("malformed advertisement: {0}")]
    Malformed(String),

    /// The underlying device or stream is temporarily gone. Retry later.
    #[error("advertisement source unavailable: {0}")]
    Unavailable(String),

    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether the caller should retry after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

//! Error types for memocache

use std::fmt;

/// Result type alias for memocache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for key inspection
///
/// Computation failures never show up here: `Memo::try_call` hands the
/// wrapped function's own error back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed canonical key bytes
    Parse(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => Error::Parse("truncated key".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::Parse(format!("{:?} at {} trailing bytes", e.code, e.input.len()))
            }
        }
    }
}

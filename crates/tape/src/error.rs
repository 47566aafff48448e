//! Tape layer error types.

use coldstore_core::ErrorKind;
use thiserror::Error;

/// Tape library and inventory errors.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resource busy: {0}")]
    Busy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid inventory state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TapeError {
    /// Classify into the wire-level error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TapeError::Io(_) => ErrorKind::Io,
            TapeError::Busy(_) => ErrorKind::Busy,
            TapeError::NotFound(_) => ErrorKind::NotFound,
            TapeError::InvalidState(_) => ErrorKind::General,
            TapeError::Internal(_) => ErrorKind::General,
        }
    }
}

/// Result type for tape operations.
pub type TapeResult<T> = std::result::Result<T, TapeError>;

//! Filesystem layer error types.

use coldstore_core::{ErrorKind, FileState};
use thiserror::Error;

/// Managed-filesystem operation errors.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt tape attribute: {0}")]
    CorruptAttr(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: FileState, to: FileState },

    #[error("lock protocol violation: {0}")]
    LockViolation(String),

    #[error("filesystem not managed: {0}")]
    NotManaged(String),

    #[error("event protocol violation: {0}")]
    EventProtocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FsError {
    /// Classify into the wire-level error kind. Leaf I/O failures are
    /// translated exactly once, here.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            FsError::Io(_) => ErrorKind::Io,
            FsError::NotFound(_) => ErrorKind::NotFound,
            FsError::CorruptAttr(_) => ErrorKind::CorruptAttr,
            FsError::InvalidTransition { .. } => ErrorKind::General,
            FsError::LockViolation(_) => ErrorKind::General,
            FsError::NotManaged(_) => ErrorKind::General,
            FsError::EventProtocol(_) => ErrorKind::General,
            FsError::Internal(_) => ErrorKind::General,
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

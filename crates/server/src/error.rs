//! Server error type: everything the engines and handlers can fail with,
//! classified into the wire-level taxonomy exactly once.

use coldstore_catalog::CatalogError;
use coldstore_core::ErrorKind;
use coldstore_fs::FsError;
use coldstore_tape::TapeError;
use thiserror::Error;

/// Server-side operation errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Tape(#[from] TapeError),

    #[error(transparent)]
    Core(#[from] coldstore_core::Error),

    #[error("i/o error: {0}")]
    Io(std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("key mismatch")]
    KeyMismatch,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cancelled by shutdown")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ServerError {
    /// Classify into the wire-level error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Catalog(e) => e.kind(),
            ServerError::Fs(e) => e.kind(),
            ServerError::Tape(e) => e.kind(),
            ServerError::Core(e) => e.kind(),
            ServerError::Io(_) => ErrorKind::Io,
            ServerError::Config(_) => ErrorKind::Config,
            ServerError::KeyMismatch => ErrorKind::KeyMismatch,
            ServerError::Conflict(_) => ErrorKind::General,
            ServerError::Cancelled => ErrorKind::General,
            ServerError::Protocol(_) => ErrorKind::General,
            ServerError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Result type for server operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

//! Catalog error types.

use coldstore_core::ErrorKind;
use thiserror::Error;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("pool does not exist: {0}")]
    PoolNotExists(String),

    #[error("pool is not empty: {0}")]
    PoolNotEmpty(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    /// Classify into the wire-level error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::Database(_) => ErrorKind::Db,
            CatalogError::PoolNotExists(_) => ErrorKind::PoolNotExists,
            CatalogError::PoolNotEmpty(_) => ErrorKind::PoolNotEmpty,
            CatalogError::Constraint(_) => ErrorKind::General,
            CatalogError::Internal(_) => ErrorKind::Db,
        }
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

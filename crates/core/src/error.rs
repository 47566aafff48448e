//! Error taxonomy shared across client and server.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified error kinds carried on the wire and mapped to exit codes.
///
/// Every server-side failure is translated into one of these kinds before it
/// crosses a process boundary. The client prints a single message keyed by
/// the kind and exits with the matching code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Catch-all for miscategorized internal failures.
    General,
    /// Propagated errno from tape or primary-storage calls.
    Io,
    /// Unexpected transactional-store outcome.
    Db,
    /// Tape-filesystem resource temporarily unavailable; retryable.
    Busy,
    /// File identity no longer resolves.
    NotFound,
    /// Tape attribute failed its type-tag check.
    CorruptAttr,
    /// Named pool does not exist.
    PoolNotExists,
    /// Pool still has cartridges assigned.
    PoolNotEmpty,
    /// Client presented the wrong session key.
    KeyMismatch,
    /// Configuration file missing, unparseable, or constraint-violating.
    Config,
}

impl ErrorKind {
    /// Process exit code for a command that failed with this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::General => 1,
            ErrorKind::Io => 2,
            ErrorKind::Db => 3,
            ErrorKind::Busy => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::CorruptAttr => 6,
            ErrorKind::PoolNotExists => 7,
            ErrorKind::PoolNotEmpty => 8,
            ErrorKind::KeyMismatch => 9,
            ErrorKind::Config => 10,
        }
    }

    /// Short identifier used in log fields and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::General => "general_error",
            ErrorKind::Io => "io_error",
            ErrorKind::Db => "db_error",
            ErrorKind::Busy => "busy",
            ErrorKind::NotFound => "not_found",
            ErrorKind::CorruptAttr => "corrupt_attr",
            ErrorKind::PoolNotExists => "pool_not_exists",
            ErrorKind::PoolNotEmpty => "pool_not_empty",
            ErrorKind::KeyMismatch => "key_mismatch",
            ErrorKind::Config => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt tape attribute: {0}")]
    CorruptAttr(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify this error into its wire-level kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::CorruptAttr(_) => ErrorKind::CorruptAttr,
            Error::InvalidTransition { .. } => ErrorKind::General,
            Error::Protocol(_) => ErrorKind::General,
            Error::Serialization(_) => ErrorKind::General,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::General,
            ErrorKind::Io,
            ErrorKind::Db,
            ErrorKind::Busy,
            ErrorKind::NotFound,
            ErrorKind::CorruptAttr,
            ErrorKind::PoolNotExists,
            ErrorKind::PoolNotEmpty,
            ErrorKind::KeyMismatch,
            ErrorKind::Config,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0), "exit code 0 is reserved for success");
    }

    #[test]
    fn kind_roundtrips_through_serde() {
        let json = serde_json::to_string(&ErrorKind::PoolNotEmpty).unwrap();
        assert_eq!(json, "\"pool_not_empty\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::PoolNotEmpty);
    }
}

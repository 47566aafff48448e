//! Core domain types and shared logic for the coldstore HSM.
//!
//! This crate defines the canonical data model used across all other crates:
//! - File residency states and the allowed transitions between them
//! - The stable file identity (fsid, generation, inode)
//! - The tape attribute record stored on every premigrated file
//! - The error taxonomy and process exit codes
//! - The client/server wire protocol
//! - Configuration types

pub mod attr;
pub mod config;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod state;

pub use attr::{TAPE_ATTR_NAME, TapeAttr};
pub use error::{Error, ErrorKind, Result};
pub use identity::FileUid;
pub use state::{FileState, Operation, RequestState};

/// Buffer size for streaming file data to and from tape.
pub const COPY_BUFFER_SIZE: usize = 512 * 1024;

/// Number of 1 s retries against a busy tape filesystem before giving up.
pub const TAPE_OPERATION_RETRY: u32 = 10;

/// Maximum number of tape copies a file attribute can reference.
pub const MAX_COPIES: usize = 3;

/// Job-state updates and progress notifications are flushed at least this often.
pub const PROGRESS_FLUSH_SECS: u64 = 10;

/// A run of this many consecutive job failures fails the whole request.
pub const FAILURE_RUN_LIMIT: u32 = 10;

/// Sentinel request number terminating streamed info responses.
pub const UNSET_REQUEST: i64 = -1;

/// Sentinel start block when the tape filesystem did not report one.
pub const UNSET_BLOCK: i64 = -1;

/// Name of the per-tape directory holding file data.
pub const TAPE_DATA_DIR: &str = "data";

/// Prefix of file names within a tape's data directory.
pub const TAPE_FILE_PREFIX: &str = "coldstore";

//! Client/server wire protocol.
//!
//! Messages travel as length-prefixed frames over the server's UNIX socket;
//! each frame carries one JSON-encoded [`Request`] or [`Response`]. Streaming
//! responses (info listings) emit one record per frame and terminate with a
//! record whose request number is [`crate::UNSET_REQUEST`].

use crate::error::ErrorKind;
use crate::state::{FileState, Operation, RequestState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session key issued by the server at startup. Every request carries it;
/// a mismatch is rejected with [`ErrorKind::KeyMismatch`].
pub type SessionKey = u64;

/// Requests a client can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Queue files for migration (target `Migrated`) or premigration
    /// (target `Premigrated`), optionally constrained to a tape pool.
    Migrate {
        key: SessionKey,
        files: Vec<PathBuf>,
        target: FileState,
        pool: Option<String>,
    },
    /// Queue files for selective recall to `Premigrated` or `Resident`.
    Recall {
        key: SessionKey,
        files: Vec<PathBuf>,
        target: FileState,
    },
    /// Ask the server to shut down. `forced` cancels in-flight engines at
    /// the next safe point; `finish` lets dispatched work complete but
    /// admits nothing new.
    Stop {
        key: SessionKey,
        forced: bool,
        finish: bool,
    },
    /// Stream request rows, optionally restricted to one request number.
    InfoRequests {
        key: SessionKey,
        reqnum: Option<i64>,
    },
    /// Stream job rows, optionally restricted to one request number.
    InfoJobs {
        key: SessionKey,
        reqnum: Option<i64>,
    },
    /// Stream the tape inventory.
    InfoTapes { key: SessionKey },
    /// Report residency and tape location of the given files.
    InfoFiles {
        key: SessionKey,
        files: Vec<PathBuf>,
    },
    /// Block until progress on a request changed, then report its counts.
    Progress { key: SessionKey, reqnum: i64 },
    PoolCreate { key: SessionKey, pool: String },
    PoolDelete { key: SessionKey, pool: String },
    PoolAdd {
        key: SessionKey,
        pool: String,
        tape_id: String,
    },
    PoolRemove {
        key: SessionKey,
        pool: String,
        tape_id: String,
    },
    /// Bring a filesystem under management.
    AddFilesystem { key: SessionKey, path: PathBuf },
}

impl Request {
    /// Session key carried by this request.
    pub fn key(&self) -> SessionKey {
        match self {
            Request::Migrate { key, .. }
            | Request::Recall { key, .. }
            | Request::Stop { key, .. }
            | Request::InfoRequests { key, .. }
            | Request::InfoJobs { key, .. }
            | Request::InfoTapes { key }
            | Request::InfoFiles { key, .. }
            | Request::Progress { key, .. }
            | Request::PoolCreate { key, .. }
            | Request::PoolDelete { key, .. }
            | Request::PoolAdd { key, .. }
            | Request::PoolRemove { key, .. }
            | Request::AddFilesystem { key, .. } => *key,
        }
    }
}

/// One streamed row describing a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub operation: Operation,
    pub reqnum: i64,
    pub tape_id: String,
    pub pool: Option<String>,
    pub target: FileState,
    pub state: RequestState,
}

/// One streamed row describing a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub operation: Operation,
    pub reqnum: i64,
    pub file_name: PathBuf,
    pub size: i64,
    pub state: FileState,
    pub tape_id: String,
    pub failed: bool,
}

/// One streamed row describing a managed file's residency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_name: PathBuf,
    pub state: Option<FileState>,
    pub size: Option<u64>,
    pub tape_id: Option<String>,
    pub start_block: Option<i64>,
    /// Set when the file could not be inspected.
    pub error: Option<ErrorKind>,
}

/// One streamed row describing a cartridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeRecord {
    pub tape_id: String,
    pub pool: Option<String>,
    pub state: String,
    pub drive_id: Option<String>,
}

/// Progress counts for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub reqnum: i64,
    pub total: u64,
    pub done: u64,
    pub failed: u64,
    pub state: RequestState,
}

/// Responses the server can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The operation succeeded and produced no data.
    Ok,
    /// Work was queued under the given request number.
    Submitted { reqnum: i64 },
    /// Stop status; `success` turns true once in-flight work has drained.
    Stopping { success: bool },
    /// One row of an info-requests stream; `record.reqnum` equal to
    /// [`crate::UNSET_REQUEST`] terminates the stream.
    RequestInfo { record: RequestRecord },
    /// One row of an info-jobs stream; terminated like `RequestInfo`.
    JobInfo { record: JobRecord },
    /// One row of an info-tapes stream; an empty `tape_id` terminates it.
    TapeInfo { record: TapeRecord },
    /// One row of an info-files stream; an empty `file_name` terminates it.
    FileInfo { record: FileRecord },
    /// Progress snapshot for a watched request.
    Progress { record: ProgressRecord },
    /// The request failed with a classified kind.
    Error { kind: ErrorKind, message: String },
}

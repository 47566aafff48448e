//! Database models mapping to the catalog schema.

use coldstore_core::error::Error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// One file-granularity unit of work belonging to a request.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Stable row id, assigned by the database on insert.
    #[sqlx(default)]
    pub id: i64,
    pub operation: String,
    pub file_name: String,
    pub reqnum: i64,
    pub target_state: String,
    pub size: i64,
    /// Filesystem id of the file's stable identity, stored as the i64 bit
    /// pattern of the underlying u64.
    pub fsid: i64,
    pub igen: i64,
    pub ino: i64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub last_upd: OffsetDateTime,
    pub file_state: String,
    pub tape_id: String,
    pub start_block: i64,
    pub failed: bool,
}

/// One (request, tape) scheduling unit.
#[derive(Debug, Clone, FromRow)]
pub struct RequestRow {
    pub operation: String,
    pub reqnum: i64,
    pub target_state: String,
    pub coloc_group: Option<i64>,
    pub tape_id: String,
    pub pool: Option<String>,
    pub time_added: OffsetDateTime,
    pub state: String,
}

/// Persisted view of one cartridge.
#[derive(Debug, Clone, FromRow)]
pub struct TapeRow {
    pub tape_id: String,
    pub pool: Option<String>,
    pub mounted: bool,
    pub drive_id: Option<String>,
    pub state: String,
}

/// Scheduling state of a tape as tracked in `tape_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapeState {
    Free,
    InUse,
    Mounting,
    Unmounting,
}

impl TapeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TapeState::Free => "free",
            TapeState::InUse => "in_use",
            TapeState::Mounting => "mounting",
            TapeState::Unmounting => "unmounting",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "free" => Ok(TapeState::Free),
            "in_use" => Ok(TapeState::InUse),
            "mounting" => Ok(TapeState::Mounting),
            "unmounting" => Ok(TapeState::Unmounting),
            other => Err(Error::Protocol(format!("unknown tape state: {other}"))),
        }
    }
}

impl std::fmt::Display for TapeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated job progress for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub total: u64,
    pub done: u64,
    pub failed: u64,
}

//! Data events and the disposition channel.
//!
//! This is the contract the EventLoop consumes. The kernel-side DMAPI
//! implementation is out of scope; [`crate::PosixFs`] provides the same
//! semantics in user space: every posted event must be answered exactly
//! once, and the thread that triggered a data event stays blocked until the
//! answer arrives.

use crate::error::FsResult;
use async_trait::async_trait;
use coldstore_core::FileUid;
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of a filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A managed filesystem appeared; dispositions must be installed.
    Mount,
    /// Read access to a migrated region.
    Read,
    /// Write access to a managed region.
    Write,
    /// Truncate of a managed region.
    Truncate,
}

/// Opaque token identifying one pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(Uuid);

impl EventToken {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for EventToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One event delivered from the filesystem.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub kind: EventKind,
    pub token: EventToken,
    /// Identity of the touched file; absent for mount events.
    pub uid: Option<FileUid>,
    /// Filesystem id the event originated from.
    pub fsid: u64,
    /// Root path of the filesystem; set for mount events.
    pub fs_root: Option<PathBuf>,
}

/// Answer to a pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// Let the blocked access proceed.
    Continue,
    /// Fail the blocked access with the given errno.
    Abort { errno: i32 },
}

/// The filesystem's event channel.
#[async_trait]
pub trait FileEvents: Send + Sync {
    /// Block until the next event arrives.
    async fn next_event(&self) -> FsResult<DataEvent>;

    /// Answer a pending event. Answering a token twice is an error.
    fn respond(&self, token: EventToken, response: EventResponse) -> FsResult<()>;

    /// Route READ/WRITE/TRUNCATE events of the given filesystem to this
    /// channel.
    fn install_dispositions(&self, fsid: u64) -> FsResult<()>;

    /// Filesystems that were already managed before the loop started;
    /// dispositions for these must be installed before blocking.
    fn mounted_filesystems(&self) -> FsResult<Vec<u64>>;
}

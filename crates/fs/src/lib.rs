//! Managed-filesystem access layer.
//!
//! [`PosixFs`] carries the per-filesystem bookkeeping a DMAPI-capable
//! filesystem would provide in kernel space: stable file identities, the
//! tape attribute channel, region flags that encode residency, invisible
//! I/O, and the data-event channel that turns a read on a stubbed file into
//! a recall request. [`FileHandle`] is the ownership-bound view of one
//! managed file that the engines operate through.

pub mod error;
pub mod events;
pub mod handle;
pub mod posix;

pub use error::{FsError, FsResult};
pub use events::{DataEvent, EventKind, EventResponse, EventToken, FileEvents};
pub use handle::{FileHandle, FileMeta};
pub use posix::PosixFs;

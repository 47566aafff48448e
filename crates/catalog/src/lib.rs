//! Transactional catalog for the coldstore HSM.
//!
//! Three tables back the whole scheduling machinery: `job_queue` (one row per
//! file per user request), `request_queue` (one row per (request, tape)
//! scheduling unit), and `tape_list` (the persisted cartridge view), plus
//! `pools` for tape pool membership. All access goes through prepared
//! statements with bind parameters; a single writer connection serializes
//! writes while readers run concurrently.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{CatalogError, CatalogResult};
pub use models::{JobCounts, JobRow, RequestRow, TapeRow, TapeState};
pub use repos::{JobOrder, JobRepo, PoolRepo, RequestRepo, TapeRepo};
pub use store::{Catalog, SqliteCatalog};

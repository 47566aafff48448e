//! Repository traits for catalog operations.

pub mod jobs;
pub mod pools;
pub mod requests;
pub mod tapes;

pub use jobs::{JobOrder, JobRepo};
pub use pools::PoolRepo;
pub use requests::RequestRepo;
pub use tapes::TapeRepo;

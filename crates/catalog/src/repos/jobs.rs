//! Job queue repository.

use crate::error::CatalogResult;
use crate::models::{JobCounts, JobRow};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Iteration order for the jobs of one (request, tape) group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrder {
    /// Ascending inode number; keeps tape writes roughly append-only.
    Inode,
    /// Ascending tape start block; keeps recall reads sequential.
    StartBlock,
}

/// Repository for job queue operations.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a job row. Returns the assigned row id.
    async fn insert_job(&self, job: &JobRow) -> CatalogResult<i64>;

    /// Jobs of one (request, tape) group in the given order.
    async fn jobs_for_group(
        &self,
        reqnum: i64,
        tape_id: &str,
        order: JobOrder,
    ) -> CatalogResult<Vec<JobRow>>;

    /// Distinct tape ids among a request's jobs.
    async fn distinct_tapes(&self, reqnum: i64) -> CatalogResult<Vec<String>>;

    /// Batch-update the recorded file state of the given jobs.
    async fn set_file_state(
        &self,
        job_ids: &[i64],
        state: &str,
        updated: OffsetDateTime,
    ) -> CatalogResult<()>;

    /// Flag one job as failed.
    async fn mark_job_failed(&self, job_id: i64) -> CatalogResult<()>;

    /// Jobs for info listings, newest request first, optionally restricted
    /// to one request number.
    async fn list_jobs(&self, reqnum: Option<i64>, limit: u32) -> CatalogResult<Vec<JobRow>>;

    /// Progress counts for one request: total jobs, jobs whose recorded state
    /// equals their target, failed jobs.
    async fn job_counts(&self, reqnum: i64) -> CatalogResult<JobCounts>;

    /// Remove the jobs and request rows of a drained, completed request.
    async fn purge_request(&self, reqnum: i64) -> CatalogResult<()>;
}

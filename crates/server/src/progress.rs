//! Batched job-state updates.
//!
//! Engines record per-job completion here; the catalog write and the
//! progress notification go out together, at least every
//! [`coldstore_core::PROGRESS_FLUSH_SECS`] seconds and at the end of each
//! group.

use crate::context::ServerContext;
use crate::error::ServerResult;
use coldstore_catalog::JobRepo;
use coldstore_core::PROGRESS_FLUSH_SECS;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Collects completed job ids of one (request, tape) group.
pub(crate) struct BatchUpdater {
    pending: Vec<i64>,
    last_flush: Instant,
}

impl BatchUpdater {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    /// Record a finished job; flushes when the flush interval elapsed.
    pub async fn push(
        &mut self,
        ctx: &ServerContext,
        job_id: i64,
        state: &str,
    ) -> ServerResult<()> {
        self.pending.push(job_id);
        if self.last_flush.elapsed() >= Duration::from_secs(PROGRESS_FLUSH_SECS) {
            self.flush(ctx, state).await?;
        }
        Ok(())
    }

    /// Write pending job states and wake progress waiters.
    pub async fn flush(&mut self, ctx: &ServerContext, state: &str) -> ServerResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        ctx.catalog
            .set_file_state(&self.pending, state, OffsetDateTime::now_utc())
            .await?;
        self.pending.clear();
        self.last_flush = Instant::now();
        ctx.publish_progress();
        Ok(())
    }
}

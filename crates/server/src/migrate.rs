//! Migration engine: executes migrate / premigrate / stub steps for one
//! (request, tape) group.

use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::progress::BatchUpdater;
use coldstore_catalog::{CatalogError, JobOrder, JobRepo, JobRow};
use coldstore_core::{
    COPY_BUFFER_SIZE, FAILURE_RUN_LIMIT, FileState, RequestState, TAPE_OPERATION_RETRY, TapeAttr,
};
use coldstore_fs::FileHandle;
use coldstore_tape::{TapeError, layout, startblock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Run all jobs of one migration group. Returns the request's final state.
pub async fn run_group(ctx: &Arc<ServerContext>, reqnum: i64, tape_id: &str) -> RequestState {
    match execute(ctx, reqnum, tape_id).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(reqnum, tape_id, error = %e, "Migration group failed");
            RequestState::Failed
        }
    }
}

async fn execute(ctx: &Arc<ServerContext>, reqnum: i64, tape_id: &str) -> ServerResult<RequestState> {
    let jobs = ctx
        .catalog
        .jobs_for_group(reqnum, tape_id, JobOrder::Inode)
        .await?;
    let mount = ctx.config.server.mount_point.clone();
    let mut updates = BatchUpdater::new();
    let mut failure_run = 0u32;
    let mut outcome = RequestState::Completed;

    for job in &jobs {
        if ctx.shutdown.draining() {
            tracing::info!(reqnum, tape_id, "Stopping migration between jobs");
            outcome = RequestState::Failed;
            break;
        }

        let target = FileState::parse(&job.target_state)?;
        match migrate_one(ctx, job, target, &mount).await {
            Ok(()) => {
                failure_run = 0;
                updates.push(ctx, job.id, target.as_str()).await?;
            }
            Err(e) => {
                tracing::warn!(
                    reqnum,
                    tape_id,
                    file = %job.file_name,
                    error = %e,
                    "Migration job failed"
                );
                ctx.catalog.mark_job_failed(job.id).await?;
                ctx.publish_progress();
                failure_run += 1;

                let session_failure = matches!(
                    &e,
                    ServerError::Tape(TapeError::Busy(_))
                        | ServerError::Catalog(CatalogError::Database(_))
                        | ServerError::Cancelled
                );
                if session_failure || failure_run > FAILURE_RUN_LIMIT {
                    outcome = RequestState::Failed;
                    break;
                }
            }
        }
    }

    updates
        .flush(ctx, jobs.first().map(|j| j.target_state.as_str()).unwrap_or("migrated"))
        .await?;
    Ok(outcome)
}

async fn migrate_one(
    ctx: &Arc<ServerContext>,
    job: &JobRow,
    target: FileState,
    mount: &Path,
) -> ServerResult<()> {
    let mut fh = FileHandle::open(&ctx.fs, Path::new(&job.file_name))?;
    fh.lock().await;
    let outcome = migrate_locked(ctx, &mut fh, job, target, mount).await;
    if let Err(e) = fh.unlock() {
        tracing::error!(file = %job.file_name, error = %e, "Unlock failed");
    }
    outcome
}

async fn migrate_locked(
    ctx: &Arc<ServerContext>,
    fh: &mut FileHandle,
    job: &JobRow,
    target: FileState,
    mount: &Path,
) -> ServerResult<()> {
    let meta = fh.stat()?;
    if meta.mtime_sec != job.mtime_sec || meta.mtime_nsec != job.mtime_nsec {
        return Err(ServerError::Conflict(format!(
            "{} was modified since the request was queued",
            job.file_name
        )));
    }

    let state = fh.migration_state()?;
    if state == target || state == FileState::Migrated {
        return Ok(());
    }

    if state == FileState::Resident {
        copy_to_tape(ctx, fh, &job.tape_id, meta.size, mount).await?;
        fh.mark_premigrated()?;
    }

    if target == FileState::Migrated {
        fh.punch_hole()?;
        fh.mark_migrated()?;
    }
    Ok(())
}

/// Stream the primary data to the cartridge, make it durable, and record
/// the tape location in the file's attribute.
async fn copy_to_tape(
    ctx: &Arc<ServerContext>,
    fh: &mut FileHandle,
    tape_id: &str,
    size: u64,
    mount: &Path,
) -> ServerResult<()> {
    ctx.inventory
        .wait_tape_ready(tape_id, TAPE_OPERATION_RETRY, Duration::from_secs(1))
        .await?;
    layout::create_data_dir(mount, tape_id)?;

    let uid = fh.uid();
    let data_path = layout::data_file(mount, tape_id, &uid);
    let mut tape_file = tokio::fs::File::create(&data_path)
        .await
        .map_err(ServerError::Io)?;

    let mut offset = 0u64;
    while offset < size {
        if ctx.shutdown.forced.is_cancelled() {
            return Err(ServerError::Cancelled);
        }
        let chunk = fh.read_invisible(offset, COPY_BUFFER_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        tape_file.write_all(&chunk).await.map_err(ServerError::Io)?;
        offset += chunk.len() as u64;
    }
    tape_file.sync_all().await.map_err(ServerError::Io)?;

    // The start block only becomes known once the data is flushed.
    let start_block = startblock::assign_start_block(mount, tape_id, &uid.tape_file_name(), size)?;
    fh.set_attr(&TapeAttr::single(tape_id, start_block))?;
    layout::create_mirror_link(mount, tape_id, fh.path(), &uid)?;
    Ok(())
}

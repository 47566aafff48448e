//! Recall engine: selective and transparent recalls for one (request, tape)
//! group, in tape-block order.

use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::progress::BatchUpdater;
use coldstore_catalog::{CatalogError, JobOrder, JobRepo, JobRow};
use coldstore_core::{COPY_BUFFER_SIZE, FAILURE_RUN_LIMIT, FileState, RequestState, TAPE_OPERATION_RETRY};
use coldstore_fs::{EventResponse, FileEvents, FileHandle};
use coldstore_tape::{TapeError, layout};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Run all jobs of one recall group. Returns the request's final state.
pub async fn run_group(ctx: &Arc<ServerContext>, reqnum: i64, tape_id: &str) -> RequestState {
    match execute(ctx, reqnum, tape_id).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(reqnum, tape_id, error = %e, "Recall group failed");
            RequestState::Failed
        }
    }
}

async fn execute(ctx: &Arc<ServerContext>, reqnum: i64, tape_id: &str) -> ServerResult<RequestState> {
    let jobs = ctx
        .catalog
        .jobs_for_group(reqnum, tape_id, JobOrder::StartBlock)
        .await?;
    let mount = ctx.config.server.mount_point.clone();
    let mut updates = BatchUpdater::new();
    let mut failure_run = 0u32;
    let mut outcome = RequestState::Completed;

    for job in &jobs {
        if ctx.shutdown.draining() {
            tracing::info!(reqnum, tape_id, "Stopping recall between jobs");
            answer_event(ctx, job, EventResponse::Abort { errno: libc_eio() });
            outcome = RequestState::Failed;
            break;
        }

        let target = FileState::parse(&job.target_state)?;
        match recall_one(ctx, job, target, &mount).await {
            Ok(()) => {
                failure_run = 0;
                updates.push(ctx, job.id, target.as_str()).await?;
                answer_event(ctx, job, EventResponse::Continue);
            }
            Err(e) => {
                tracing::warn!(
                    reqnum,
                    tape_id,
                    file = %job.file_name,
                    error = %e,
                    "Recall job failed"
                );
                ctx.catalog.mark_job_failed(job.id).await?;
                ctx.publish_progress();
                answer_event(ctx, job, EventResponse::Abort { errno: libc_eio() });
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
        .flush(
            ctx,
            jobs.first()
                .map(|j| j.target_state.as_str())
                .unwrap_or("premigrated"),
        )
        .await?;
    Ok(outcome)
}

/// Release the user thread blocked behind a transparent-recall job.
/// Selective recalls have no stashed token and this is a no-op.
fn answer_event(ctx: &Arc<ServerContext>, job: &JobRow, response: EventResponse) {
    if let Some(token) = ctx.take_recall_token(job.id) {
        if let Err(e) = ctx.fs.respond(token, response) {
            tracing::error!(file = %job.file_name, error = %e, "Event response failed");
        }
    }
}

fn libc_eio() -> i32 {
    5
}

async fn recall_one(
    ctx: &Arc<ServerContext>,
    job: &JobRow,
    target: FileState,
    mount: &Path,
) -> ServerResult<()> {
    let mut fh = FileHandle::open(&ctx.fs, Path::new(&job.file_name))?;
    fh.lock().await;
    let outcome = recall_locked(ctx, &mut fh, job, target, mount).await;
    if let Err(e) = fh.unlock() {
        tracing::error!(file = %job.file_name, error = %e, "Unlock failed");
    }
    outcome
}

async fn recall_locked(
    ctx: &Arc<ServerContext>,
    fh: &mut FileHandle,
    job: &JobRow,
    target: FileState,
    mount: &Path,
) -> ServerResult<()> {
    // The state may have moved since the job was queued; a concurrent
    // recall already at or past the target makes this a no-op.
    let state = fh.migration_state()?;
    match target {
        FileState::Premigrated if state != FileState::Migrated => return Ok(()),
        FileState::Resident if state == FileState::Resident => return Ok(()),
        _ => {}
    }

    if state == FileState::Migrated {
        copy_from_tape(ctx, fh, &job.tape_id, mount).await?;
        fh.mark_premigrated()?;
    }

    if target == FileState::Resident {
        fh.remove_attr()?;
        fh.mark_resident()?;
    }
    Ok(())
}

/// Stream the tape copy back into the primary file with invisible writes.
async fn copy_from_tape(
    ctx: &Arc<ServerContext>,
    fh: &mut FileHandle,
    tape_id: &str,
    mount: &Path,
) -> ServerResult<()> {
    ctx.inventory
        .wait_tape_ready(tape_id, TAPE_OPERATION_RETRY, Duration::from_secs(1))
        .await?;

    let data_path = layout::data_file(mount, tape_id, &fh.uid());
    let mut tape_file = tokio::fs::File::open(&data_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ServerError::NotFound(format!("tape copy {}", data_path.display()))
        } else {
            ServerError::Io(e)
        }
    })?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut offset = 0u64;
    loop {
        if ctx.shutdown.forced.is_cancelled() {
            return Err(ServerError::Cancelled);
        }
        let n = tape_file.read(&mut buf).await.map_err(ServerError::Io)?;
        if n == 0 {
            break;
        }
        let written = fh.write_invisible(offset, buf[..n].to_vec()).await?;
        if written != n {
            return Err(ServerError::Io(std::io::Error::other(format!(
                "short write restoring {}: {written} of {n} bytes",
                fh.path().display()
            ))));
        }
        offset += n as u64;
    }
    Ok(())
}

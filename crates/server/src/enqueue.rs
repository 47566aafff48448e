//! Request producers: turn file lists and data events into job and request
//! rows.
//!
//! Every request fans out into one job row per file and one request row per
//! distinct tape among its jobs; each request insertion wakes the scheduler.

use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use coldstore_catalog::{JobRepo, JobRow, PoolRepo, RequestRepo, RequestRow};
use coldstore_core::{FileState, FileUid, Operation, RequestState, UNSET_BLOCK};
use coldstore_fs::{EventToken, FileHandle};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

fn job_row(
    operation: Operation,
    reqnum: i64,
    path: &std::path::Path,
    target: FileState,
    size: i64,
    uid: FileUid,
    mtime: (i64, i64),
    state: FileState,
    tape_id: &str,
    start_block: i64,
) -> JobRow {
    JobRow {
        id: 0,
        operation: operation.as_str().to_string(),
        file_name: path.display().to_string(),
        reqnum,
        target_state: target.as_str().to_string(),
        size,
        fsid: uid.fsid as i64,
        igen: uid.igen as i64,
        ino: uid.ino as i64,
        mtime_sec: mtime.0,
        mtime_nsec: mtime.1,
        last_upd: OffsetDateTime::now_utc(),
        file_state: state.as_str().to_string(),
        tape_id: tape_id.to_string(),
        start_block,
        failed: false,
    }
}

/// Insert one request row per distinct tape among the jobs just added, then
/// wake the scheduler for each.
async fn add_requests(
    ctx: &Arc<ServerContext>,
    operation: Operation,
    reqnum: i64,
    target: FileState,
    pool: Option<&str>,
) -> ServerResult<()> {
    let tapes = ctx.catalog.distinct_tapes(reqnum).await?;
    let now = OffsetDateTime::now_utc();
    for tape_id in tapes {
        ctx.catalog
            .insert_request(&RequestRow {
                operation: operation.as_str().to_string(),
                reqnum,
                target_state: target.as_str().to_string(),
                coloc_group: None,
                tape_id,
                pool: pool.map(|p| p.to_string()),
                time_added: now,
                state: RequestState::New.as_str().to_string(),
            })
            .await?;
        ctx.notify_scheduler();
    }
    Ok(())
}

/// Queue files for migration or premigration, optionally constrained to a
/// tape pool. Files are spread round-robin over the candidate tapes.
pub async fn enqueue_migration(
    ctx: &Arc<ServerContext>,
    files: &[PathBuf],
    target: FileState,
    pool: Option<&str>,
) -> ServerResult<i64> {
    if target == FileState::Resident {
        return Err(ServerError::Protocol(
            "migration target must be premigrated or migrated".into(),
        ));
    }
    let operation = if target == FileState::Migrated {
        Operation::Migrate
    } else {
        Operation::Premigrate
    };

    let tapes = candidate_tapes(ctx, pool).await?;
    let reqnum = ctx.next_reqnum();
    let mut added = 0usize;

    for (index, path) in files.iter().enumerate() {
        let fh = match FileHandle::open(&ctx.fs, path) {
            Ok(fh) => fh,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping file");
                continue;
            }
        };
        let meta = fh.stat()?;
        if !meta.is_regular {
            tracing::warn!(file = %path.display(), "Not a regular file, skipping");
            continue;
        }
        let state = fh.migration_state()?;
        if state == target || state == FileState::Migrated {
            tracing::info!(file = %path.display(), state = %state, "Already at target, skipping");
            continue;
        }

        let tape_id = &tapes[index % tapes.len()];
        ctx.catalog
            .insert_job(&job_row(
                operation,
                reqnum,
                fh.path(),
                target,
                meta.size as i64,
                fh.uid(),
                (meta.mtime_sec, meta.mtime_nsec),
                state,
                tape_id,
                UNSET_BLOCK,
            ))
            .await?;
        added += 1;
    }

    if added == 0 {
        return Err(ServerError::NotFound(
            "no eligible files in migration request".into(),
        ));
    }
    add_requests(ctx, operation, reqnum, target, pool).await?;
    tracing::info!(reqnum, files = added, operation = %operation, "Request queued");
    Ok(reqnum)
}

/// Queue files for selective recall.
pub async fn enqueue_selective_recall(
    ctx: &Arc<ServerContext>,
    files: &[PathBuf],
    target: FileState,
) -> ServerResult<i64> {
    if target == FileState::Migrated {
        return Err(ServerError::Protocol(
            "recall target must be premigrated or resident".into(),
        ));
    }

    let reqnum = ctx.next_reqnum();
    let mut rows = Vec::new();

    for path in files {
        let fh = match FileHandle::open(&ctx.fs, path) {
            Ok(fh) => fh,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping file");
                continue;
            }
        };
        let meta = fh.stat()?;
        if !meta.is_regular {
            tracing::warn!(file = %path.display(), "Not a regular file, skipping");
            continue;
        }
        let state = fh.migration_state()?;
        if state == FileState::Resident {
            tracing::info!(file = %path.display(), "Already resident, skipping");
            continue;
        }

        // A premigrated or migrated file must carry a readable attribute;
        // a corrupt one fails the whole submission before anything queues.
        let attr = fh.get_attr()?;
        let (tape_id, start_block) = attr.primary().ok_or_else(|| {
            ServerError::Conflict(format!(
                "{} has no tape copy recorded",
                path.display()
            ))
        })?;

        rows.push(job_row(
            Operation::SelectiveRecall,
            reqnum,
            fh.path(),
            target,
            meta.size as i64,
            fh.uid(),
            (meta.mtime_sec, meta.mtime_nsec),
            state,
            tape_id,
            start_block,
        ));
    }

    if rows.is_empty() {
        return Err(ServerError::NotFound(
            "no eligible files in recall request".into(),
        ));
    }
    for row in &rows {
        ctx.catalog.insert_job(row).await?;
    }
    add_requests(ctx, Operation::SelectiveRecall, reqnum, target, None).await?;
    tracing::info!(reqnum, files = rows.len(), "Recall request queued");
    Ok(reqnum)
}

/// Queue a transparent recall for one file, triggered by a data event.
/// Returns `None` when the file is already resident and the event can be
/// answered right away.
pub async fn enqueue_transparent_recall(
    ctx: &Arc<ServerContext>,
    uid: FileUid,
    target: FileState,
    token: EventToken,
) -> ServerResult<Option<i64>> {
    let fh = FileHandle::by_uid(&ctx.fs, uid)?;
    let state = fh.migration_state()?;
    if state == FileState::Resident {
        return Ok(None);
    }
    let meta = fh.stat()?;
    let attr = fh.get_attr()?;
    let (tape_id, start_block) = attr
        .primary()
        .ok_or_else(|| ServerError::Conflict(format!("{uid} has no tape copy recorded")))?;

    let reqnum = ctx.next_reqnum();
    let job_id = ctx
        .catalog
        .insert_job(&job_row(
            Operation::TransparentRecall,
            reqnum,
            fh.path(),
            target,
            meta.size as i64,
            uid,
            (meta.mtime_sec, meta.mtime_nsec),
            state,
            tape_id,
            start_block,
        ))
        .await?;
    ctx.stash_recall_token(job_id, token);
    add_requests(ctx, Operation::TransparentRecall, reqnum, target, None).await?;
    tracing::debug!(reqnum, %uid, "Transparent recall queued");
    Ok(Some(reqnum))
}

/// Tapes a migration request may write to: the pool's members, or every
/// usable cartridge when no pool is given.
async fn candidate_tapes(
    ctx: &Arc<ServerContext>,
    pool: Option<&str>,
) -> ServerResult<Vec<String>> {
    match pool {
        Some(pool) => {
            if !ctx.catalog.list_pools().await?.iter().any(|p| p == pool) {
                return Err(ServerError::Catalog(
                    coldstore_catalog::CatalogError::PoolNotExists(pool.to_string()),
                ));
            }
            let tapes = ctx.catalog.tapes_in_pool(pool).await?;
            if tapes.is_empty() {
                return Err(ServerError::Conflict(format!(
                    "pool '{pool}' has no cartridges"
                )));
            }
            Ok(tapes)
        }
        None => {
            let tapes: Vec<String> = ctx
                .inventory
                .cartridges()
                .into_iter()
                .filter(|c| {
                    !matches!(
                        c.state,
                        coldstore_tape::CartridgeState::Unknown
                            | coldstore_tape::CartridgeState::Error
                    )
                })
                .map(|c| c.id)
                .collect();
            if tapes.is_empty() {
                return Err(ServerError::Conflict("no usable cartridges".into()));
            }
            Ok(tapes)
        }
    }
}

//! Transparent-recall event loop.
//!
//! Blocks on the filesystem event channel. Mount events install
//! dispositions; data events on migrated files queue transparent recalls
//! whose completion releases the blocked user thread.

use crate::context::ServerContext;
use crate::enqueue;
use coldstore_core::FileState;
use coldstore_fs::{DataEvent, EventKind, EventResponse, FileEvents};
use std::sync::Arc;

const EIO: i32 = 5;
const EINTR: i32 = 4;

/// Event loop main task.
pub async fn run(ctx: Arc<ServerContext>) {
    // Filesystems managed before this loop started still need their
    // dispositions.
    match ctx.fs.mounted_filesystems() {
        Ok(fsids) => {
            for fsid in fsids {
                if let Err(e) = ctx.fs.install_dispositions(fsid) {
                    tracing::error!(fsid, error = %e, "Disposition recovery failed");
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Disposition recovery failed"),
    }

    loop {
        let event = tokio::select! {
            _ = ctx.shutdown.terminate.cancelled() => break,
            _ = ctx.shutdown.forced.cancelled() => break,
            event = ctx.fs.next_event() => match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(error = %e, "Event channel failed");
                    break;
                }
            },
        };
        handle_event(&ctx, event).await;
    }
    tracing::info!("Event loop stopped");
}

async fn handle_event(ctx: &Arc<ServerContext>, event: DataEvent) {
    match event.kind {
        EventKind::Mount => {
            if let Err(e) = ctx.fs.install_dispositions(event.fsid) {
                tracing::error!(fsid = event.fsid, error = %e, "Disposition install failed");
            }
            if let Err(e) = ctx.fs.respond(event.token, EventResponse::Continue) {
                tracing::error!(error = %e, "Mount event response failed");
            }
        }
        EventKind::Read | EventKind::Write | EventKind::Truncate => {
            // Once shutdown began, new recalls are not admitted; do not
            // leave the accessing thread hanging.
            if !ctx.shutdown.admitting() {
                let _ = ctx.fs.respond(event.token, EventResponse::Abort { errno: EINTR });
                return;
            }

            let Some(uid) = event.uid else {
                tracing::error!(?event, "Data event without file identity");
                let _ = ctx.fs.respond(event.token, EventResponse::Abort { errno: EIO });
                return;
            };
            // Reads come back online as premigrated; writes and truncates
            // invalidate the tape copy and go to resident.
            let target = if event.kind == EventKind::Read {
                FileState::Premigrated
            } else {
                FileState::Resident
            };

            match enqueue::enqueue_transparent_recall(ctx, uid, target, event.token).await {
                Ok(Some(reqnum)) => {
                    tracing::debug!(reqnum, %uid, kind = ?event.kind, "Transparent recall queued");
                }
                Ok(None) => {
                    // Already resident; nothing to recall.
                    if let Err(e) = ctx.fs.respond(event.token, EventResponse::Continue) {
                        tracing::error!(error = %e, "Event response failed");
                    }
                }
                Err(e) => {
                    tracing::error!(%uid, error = %e, "Transparent recall not queued");
                    let _ = ctx.fs.respond(event.token, EventResponse::Abort { errno: EIO });
                }
            }
        }
    }
}

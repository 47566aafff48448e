//! The scheduler: one long-lived task that admits runnable requests onto
//! drives and tapes and dispatches them to the engines.

use crate::context::ServerContext;
use crate::error::ServerResult;
use crate::{migrate, recall};
use coldstore_catalog::{RequestRepo, RequestRow, TapeRepo, TapeState};
use coldstore_core::{Operation, RequestState};
use coldstore_tape::CartridgeState;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// Scheduler main loop. Wakes on request insertion, mount completion,
/// request completion, and shutdown.
pub async fn run(ctx: Arc<ServerContext>) {
    loop {
        if !ctx.shutdown.admitting() {
            break;
        }
        if let Err(e) = admission_pass(&ctx).await {
            tracing::error!(error = %e, "Admission pass failed");
        }
        tokio::select! {
            _ = ctx.sched_notify.notified() => {}
            _ = ctx.shutdown.terminate.cancelled() => break,
            _ = ctx.shutdown.finish.cancelled() => break,
            _ = ctx.shutdown.forced.cancelled() => break,
        }
    }
    tracing::info!("Scheduler stopped");
}

/// One admission pass over all `new` requests. Waking with no new work
/// leaves all tables unchanged.
async fn admission_pass(ctx: &Arc<ServerContext>) -> ServerResult<()> {
    let mut candidates = ctx.catalog.new_requests().await?;
    // Oldest first; recalls outrank migrations within equal submission
    // times to keep user-visible latencies low.
    candidates.sort_by_key(|r| {
        let priority = Operation::parse(&r.operation)
            .map(|op| op.priority())
            .unwrap_or(u8::MAX);
        (r.time_added, priority)
    });

    for request in candidates {
        if !ctx.shutdown.admitting() {
            break;
        }
        let Some(cartridge) = ctx.inventory.cartridge(&request.tape_id) else {
            fail_request(ctx, &request, "tape is not in the inventory").await?;
            continue;
        };
        match cartridge.state {
            CartridgeState::Mounted => {
                if !try_dispatch(ctx, &request).await? {
                    // Worker pool exhausted; later candidates cannot run
                    // either.
                    break;
                }
            }
            CartridgeState::Unmounted => schedule_mount(ctx, &request.tape_id).await?,
            // A moving or claimed cartridge resolves on a later wake.
            CartridgeState::Moving | CartridgeState::InUse => {}
            CartridgeState::Unknown | CartridgeState::Error => {
                fail_request(ctx, &request, "cartridge is unusable").await?;
            }
        }
    }
    Ok(())
}

async fn fail_request(ctx: &Arc<ServerContext>, request: &RequestRow, why: &str) -> ServerResult<()> {
    tracing::error!(
        reqnum = request.reqnum,
        tape_id = %request.tape_id,
        why,
        "Failing request"
    );
    ctx.catalog
        .finish_request(request.reqnum, &request.tape_id, RequestState::Failed)
        .await?;
    ctx.publish_progress();
    Ok(())
}

/// Claim the request and its tape and hand the group to an engine.
/// Returns false when no worker slot is free.
async fn try_dispatch(ctx: &Arc<ServerContext>, request: &RequestRow) -> ServerResult<bool> {
    let permit = match ctx.engine_slots.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => return Ok(false),
    };

    if !ctx
        .catalog
        .claim_request(request.reqnum, &request.tape_id)
        .await?
    {
        return Ok(true);
    }
    if let Err(e) = ctx.inventory.set_in_use(&request.tape_id, true) {
        tracing::error!(tape_id = %request.tape_id, error = %e, "Claimed tape unavailable");
        ctx.catalog
            .finish_request(request.reqnum, &request.tape_id, RequestState::Failed)
            .await?;
        return Ok(true);
    }

    ctx.publish_progress();
    spawn_engine(ctx.clone(), request.clone(), permit);
    Ok(true)
}

fn spawn_engine(ctx: Arc<ServerContext>, request: RequestRow, permit: OwnedSemaphorePermit) {
    tokio::spawn(async move {
        let _permit = permit;
        let reqnum = request.reqnum;
        let tape_id = request.tape_id.clone();
        tracing::info!(reqnum, tape_id = %tape_id, operation = %request.operation, "Request dispatched");

        let is_recall = Operation::parse(&request.operation)
            .map(|op| op.is_recall())
            .unwrap_or(false);
        let state = if is_recall {
            recall::run_group(&ctx, reqnum, &tape_id).await
        } else {
            migrate::run_group(&ctx, reqnum, &tape_id).await
        };

        if let Err(e) = ctx.catalog.finish_request(reqnum, &tape_id, state).await {
            tracing::error!(reqnum, tape_id = %tape_id, error = %e, "Request completion not recorded");
        }
        if let Err(e) = ctx.inventory.set_in_use(&tape_id, false) {
            tracing::error!(tape_id = %tape_id, error = %e, "Tape release failed");
        }
        ctx.publish_progress();
        ctx.notify_scheduler();
        tracing::info!(reqnum, tape_id = %tape_id, state = %state, "Request finished");
    });
}

/// Get the request's tape onto a drive: use a free drive, or evict an idle
/// cartridge first. The mount runs detached; its completion wakes the
/// scheduler for the next pass.
async fn schedule_mount(ctx: &Arc<ServerContext>, tape_id: &str) -> ServerResult<()> {
    // A mount already underway shows up as `mounting` in the tape list.
    if let Some(row) = ctx.catalog.get_tape(tape_id).await? {
        if row.state == TapeState::Mounting.as_str() || row.state == TapeState::Unmounting.as_str()
        {
            return Ok(());
        }
    }

    if let Some(drive_id) = ctx.inventory.free_drive() {
        ctx.catalog
            .set_tape_state(tape_id, TapeState::Mounting, false, Some(&drive_id))
            .await?;
        let ctx = ctx.clone();
        let tape_id = tape_id.to_string();
        tokio::spawn(async move {
            match ctx.inventory.mount(&drive_id, &tape_id).await {
                Ok(()) => {
                    if let Err(e) = ctx
                        .catalog
                        .set_tape_state(&tape_id, TapeState::Free, true, Some(&drive_id))
                        .await
                    {
                        tracing::error!(tape_id = %tape_id, error = %e, "Mount not recorded");
                    }
                    ctx.notify_scheduler();
                }
                Err(e) => {
                    tracing::error!(tape_id = %tape_id, error = %e, "Mount failed");
                    let _ = ctx
                        .catalog
                        .set_tape_state(&tape_id, TapeState::Free, false, None)
                        .await;
                    // Back off before the next admission pass retries.
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    ctx.notify_scheduler();
                }
            }
        });
        return Ok(());
    }

    if let Some((_, old_tape)) = ctx.inventory.evictable_drive() {
        ctx.catalog
            .set_tape_state(&old_tape, TapeState::Unmounting, true, None)
            .await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match ctx.inventory.unmount(&old_tape).await {
                Ok(()) => {
                    if let Err(e) = ctx
                        .catalog
                        .set_tape_state(&old_tape, TapeState::Free, false, None)
                        .await
                    {
                        tracing::error!(tape_id = %old_tape, error = %e, "Unmount not recorded");
                    }
                    ctx.notify_scheduler();
                }
                Err(e) => {
                    tracing::error!(tape_id = %old_tape, error = %e, "Unmount failed");
                    let _ = ctx
                        .catalog
                        .set_tape_state(&old_tape, TapeState::Free, true, None)
                        .await;
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    ctx.notify_scheduler();
                }
            }
        });
        return Ok(());
    }

    // All drives occupied by working cartridges; retry on a later wake.
    Ok(())
}

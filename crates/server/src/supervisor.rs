//! Supervisor: startup sequence, long-lived task spawning, signal handling,
//! and shutdown escalation.

use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::{eventloop, receiver, scheduler};
use coldstore_catalog::{Catalog, RequestRepo, SqliteCatalog, TapeRepo, TapeRow, TapeState};
use coldstore_core::RequestState;
use coldstore_core::config::{AppConfig, LibraryConfig};
use coldstore_fs::PosixFs;
use coldstore_tape::{DirLibrary, Inventory};
use fs2::FileExt;
use std::io::Write;
use std::sync::Arc;
use tokio::net::UnixListener;

/// Run the server until shutdown completes.
pub async fn run(config: AppConfig) -> ServerResult<()> {
    config.validate().map_err(ServerError::Config)?;
    let server = &config.server;
    std::fs::create_dir_all(&server.state_dir).map_err(ServerError::Io)?;

    // One instance per host. The lock lives as long as this handle.
    let lock_file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(server.lock_path())
        .map_err(ServerError::Io)?;
    lock_file.try_lock_exclusive().map_err(|_| {
        ServerError::Conflict("another coldstored instance holds the server lock".into())
    })?;

    let session_key = write_key(&config)?;
    let _ = std::fs::remove_file(server.socket_path());

    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(server.db_path()).await?);
    tracing::info!(path = %server.db_path().display(), "Catalog opened");

    let library = match &config.library {
        LibraryConfig::Directory { path, drives } => {
            Arc::new(DirLibrary::new(path, &server.mount_point, *drives)?)
        }
    };
    let inventory = Arc::new(Inventory::new(library).await?);
    sync_tape_list(&catalog, &inventory).await?;
    recover_orphaned_requests(&catalog).await?;

    let fs = PosixFs::new();
    let listener = UnixListener::bind(server.socket_path()).map_err(ServerError::Io)?;

    let ctx = ServerContext::new(config.clone(), catalog, fs, inventory, session_key);
    let max_engines = ctx.config.server.max_migration_threads as u32;

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(scheduler::run(ctx.clone()));
    tasks.spawn(eventloop::run(ctx.clone()));
    tasks.spawn(receiver::run(ctx.clone(), listener));
    tasks.spawn(signal_task(ctx.clone()));
    tracing::info!("Server started");

    // Supervise until a shutdown stage is reached. A panicking task is
    // fatal and escalates to forced termination.
    loop {
        tokio::select! {
            _ = ctx.shutdown.terminate.cancelled() => break,
            _ = ctx.shutdown.finish.cancelled() => break,
            joined = tasks.join_next() => match joined {
                Some(Err(e)) if e.is_panic() => {
                    tracing::error!(error = %e, "Long-lived task panicked, forcing termination");
                    ctx.shutdown.forced.cancel();
                    ctx.shutdown.terminate.cancel();
                    break;
                }
                Some(_) => {
                    if ctx.shutdown.admitting() {
                        tracing::error!("Long-lived task exited unexpectedly, stopping");
                        ctx.shutdown.terminate.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }

    // Drain: requests never admitted fail now; dispatched engines hold
    // worker slots until they are done.
    if let Err(e) = receiver::fail_unadmitted_requests(&ctx).await {
        tracing::error!(error = %e, "Draining unadmitted requests failed");
    }
    match ctx.engine_slots.acquire_many(max_engines).await {
        Ok(_permits) => tracing::info!("All engines drained"),
        Err(_) => tracing::error!("Engine pool closed before drain"),
    }

    ctx.shutdown.exited.cancel();
    tasks.shutdown().await;

    let _ = std::fs::remove_file(ctx.config.server.socket_path());
    tracing::info!("Server stopped");
    Ok(())
}

/// Generate and persist the session key, readable only by the server's
/// owner.
fn write_key(config: &AppConfig) -> ServerResult<u64> {
    use std::os::unix::fs::OpenOptionsExt;
    let key: u64 = rand::random();
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(config.server.key_path())
        .map_err(ServerError::Io)?;
    writeln!(file, "{key}").map_err(ServerError::Io)?;
    Ok(key)
}

/// Mirror the library enumeration into the tape list, clearing any state a
/// previous instance left behind.
async fn sync_tape_list(catalog: &Arc<dyn Catalog>, inventory: &Arc<Inventory>) -> ServerResult<()> {
    for cartridge in inventory.cartridges() {
        let pool = catalog
            .get_tape(&cartridge.id)
            .await?
            .and_then(|row| row.pool);
        catalog
            .upsert_tape(&TapeRow {
                tape_id: cartridge.id.clone(),
                pool,
                mounted: false,
                drive_id: None,
                state: TapeState::Free.as_str().to_string(),
            })
            .await?;
        catalog
            .set_tape_state(&cartridge.id, TapeState::Free, false, None)
            .await?;
    }
    Ok(())
}

/// Requests a previous instance left `in_progress` cannot resume; their
/// jobs keep whatever file state was already recorded.
async fn recover_orphaned_requests(catalog: &Arc<dyn Catalog>) -> ServerResult<()> {
    let rows = catalog.list_requests(None).await?;
    for row in rows {
        if row.state == RequestState::InProgress.as_str() {
            tracing::warn!(
                reqnum = row.reqnum,
                tape_id = %row.tape_id,
                "Marking orphaned request from previous instance as failed"
            );
            catalog
                .finish_request(row.reqnum, &row.tape_id, RequestState::Failed)
                .await?;
        }
    }
    Ok(())
}

/// Signal task: SIGTERM/SIGINT request graceful stop, SIGUSR1 finish mode;
/// a second signal of the same class escalates to forced.
async fn signal_task(ctx: Arc<ServerContext>) {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut term), Ok(mut int), Ok(mut usr1)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::user_defined1()),
    ) else {
        tracing::error!("Signal handler installation failed");
        return;
    };

    let mut stop_signals = 0u32;
    let mut finish_signals = 0u32;
    loop {
        tokio::select! {
            _ = ctx.shutdown.exited.cancelled() => break,
            _ = term.recv() => {
                stop_signals += 1;
                escalate_stop(&ctx, stop_signals);
            }
            _ = int.recv() => {
                stop_signals += 1;
                escalate_stop(&ctx, stop_signals);
            }
            _ = usr1.recv() => {
                finish_signals += 1;
                escalate_finish(&ctx, finish_signals);
            }
        }
        ctx.notify_scheduler();
    }
}

fn escalate_stop(ctx: &Arc<ServerContext>, count: u32) {
    if count == 1 {
        tracing::info!("Termination signal received");
        ctx.shutdown.terminate.cancel();
    } else {
        tracing::warn!("Repeated termination signal, forcing");
        ctx.shutdown.forced.cancel();
        ctx.shutdown.terminate.cancel();
    }
}

fn escalate_finish(ctx: &Arc<ServerContext>, count: u32) {
    if count == 1 {
        tracing::info!("Finish signal received");
        ctx.shutdown.finish.cancel();
    } else {
        tracing::warn!("Repeated finish signal, forcing");
        ctx.shutdown.forced.cancel();
        ctx.shutdown.terminate.cancel();
    }
}

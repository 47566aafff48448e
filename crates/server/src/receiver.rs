//! Client request receiver: length-prefixed JSON frames over the server's
//! UNIX socket.

use crate::context::ServerContext;
use crate::enqueue;
use crate::error::ServerError;
use bytes::Bytes;
use coldstore_catalog::{JobRepo, PoolRepo, RequestRepo, RequestRow, TapeRepo};
use coldstore_core::protocol::{
    FileRecord, JobRecord, ProgressRecord, Request, RequestRecord, Response, TapeRecord,
};
use coldstore_core::{ErrorKind, FileState, Operation, RequestState, UNSET_REQUEST};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const INFO_JOBS_LIMIT: u32 = 10_000;

/// Receiver main task.
pub async fn run(ctx: Arc<ServerContext>, listener: UnixListener) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.exited.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(ctx.clone(), stream));
                }
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            },
        }
    }
    tracing::info!("Receiver stopped");
}

async fn handle_connection(ctx: Arc<ServerContext>, stream: UnixStream) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Connection framing error");
                return;
            }
        };
        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                let _ = send(&mut framed, &error_response(ErrorKind::General, &e.to_string())).await;
                continue;
            }
        };

        let responses = if request.key() != ctx.session_key {
            vec![error_response(ErrorKind::KeyMismatch, "wrong session key")]
        } else {
            handle_request(&ctx, request).await
        };

        for response in responses {
            if send(&mut framed, &response).await.is_err() {
                return;
            }
        }
    }
}

async fn send(
    framed: &mut Framed<UnixStream, LengthDelimitedCodec>,
    response: &Response,
) -> Result<(), ()> {
    let bytes = serde_json::to_vec(response).map_err(|_| ())?;
    framed.send(Bytes::from(bytes)).await.map_err(|e| {
        tracing::warn!(error = %e, "Response send failed");
    })
}

fn error_response(kind: ErrorKind, message: &str) -> Response {
    Response::Error {
        kind,
        message: message.to_string(),
    }
}

fn server_error(e: ServerError) -> Response {
    Response::Error {
        kind: e.kind(),
        message: e.to_string(),
    }
}

async fn handle_request(ctx: &Arc<ServerContext>, request: Request) -> Vec<Response> {
    match request {
        Request::Migrate {
            files,
            target,
            pool,
            ..
        } => {
            if !ctx.shutdown.admitting() {
                return vec![error_response(ErrorKind::General, "server is stopping")];
            }
            match enqueue::enqueue_migration(ctx, &files, target, pool.as_deref()).await {
                Ok(reqnum) => vec![Response::Submitted { reqnum }],
                Err(e) => vec![server_error(e)],
            }
        }
        Request::Recall { files, target, .. } => {
            if !ctx.shutdown.admitting() {
                return vec![error_response(ErrorKind::General, "server is stopping")];
            }
            match enqueue::enqueue_selective_recall(ctx, &files, target).await {
                Ok(reqnum) => vec![Response::Submitted { reqnum }],
                Err(e) => vec![server_error(e)],
            }
        }
        Request::Stop { forced, finish, .. } => handle_stop(ctx, forced, finish).await,
        Request::InfoRequests { reqnum, .. } => match ctx.catalog.list_requests(reqnum).await {
            Ok(rows) => {
                let mut responses: Vec<Response> = rows
                    .iter()
                    .map(|row| Response::RequestInfo {
                        record: request_record(row),
                    })
                    .collect();
                responses.push(Response::RequestInfo {
                    record: RequestRecord {
                        operation: Operation::Migrate,
                        reqnum: UNSET_REQUEST,
                        tape_id: String::new(),
                        pool: None,
                        target: FileState::Resident,
                        state: RequestState::Completed,
                    },
                });
                responses
            }
            Err(e) => vec![server_error(e.into())],
        },
        Request::InfoJobs { reqnum, .. } => {
            match ctx.catalog.list_jobs(reqnum, INFO_JOBS_LIMIT).await {
                Ok(rows) => {
                    let mut responses: Vec<Response> = rows
                        .iter()
                        .map(|row| Response::JobInfo {
                            record: JobRecord {
                                operation: Operation::parse(&row.operation)
                                    .unwrap_or(Operation::Migrate),
                                reqnum: row.reqnum,
                                file_name: row.file_name.clone().into(),
                                size: row.size,
                                state: FileState::parse(&row.file_state)
                                    .unwrap_or(FileState::Resident),
                                tape_id: row.tape_id.clone(),
                                failed: row.failed,
                            },
                        })
                        .collect();
                    responses.push(Response::JobInfo {
                        record: JobRecord {
                            operation: Operation::Migrate,
                            reqnum: UNSET_REQUEST,
                            file_name: Default::default(),
                            size: 0,
                            state: FileState::Resident,
                            tape_id: String::new(),
                            failed: false,
                        },
                    });
                    responses
                }
                Err(e) => vec![server_error(e.into())],
            }
        }
        Request::InfoTapes { .. } => match ctx.catalog.list_tapes().await {
            Ok(rows) => {
                let mut responses: Vec<Response> = rows
                    .iter()
                    .map(|row| Response::TapeInfo {
                        record: TapeRecord {
                            tape_id: row.tape_id.clone(),
                            pool: row.pool.clone(),
                            state: row.state.clone(),
                            drive_id: row.drive_id.clone(),
                        },
                    })
                    .collect();
                responses.push(Response::TapeInfo {
                    record: TapeRecord {
                        tape_id: String::new(),
                        pool: None,
                        state: String::new(),
                        drive_id: None,
                    },
                });
                responses
            }
            Err(e) => vec![server_error(e.into())],
        },
        Request::InfoFiles { files, .. } => {
            let mut responses: Vec<Response> = files
                .iter()
                .map(|path| Response::FileInfo {
                    record: file_record(ctx, path),
                })
                .collect();
            responses.push(Response::FileInfo {
                record: FileRecord {
                    file_name: Default::default(),
                    state: None,
                    size: None,
                    tape_id: None,
                    start_block: None,
                    error: None,
                },
            });
            responses
        }
        Request::Progress { reqnum, .. } => vec![handle_progress(ctx, reqnum).await],
        Request::PoolCreate { pool, .. } => {
            match ctx
                .catalog
                .create_pool(&pool, time::OffsetDateTime::now_utc())
                .await
            {
                Ok(()) => vec![Response::Ok],
                Err(e) => vec![server_error(e.into())],
            }
        }
        Request::PoolDelete { pool, .. } => match ctx.catalog.delete_pool(&pool).await {
            Ok(()) => vec![Response::Ok],
            Err(e) => vec![server_error(e.into())],
        },
        Request::PoolAdd { pool, tape_id, .. } => {
            match ctx.catalog.add_to_pool(&pool, &tape_id).await {
                Ok(()) => vec![Response::Ok],
                Err(e) => vec![server_error(e.into())],
            }
        }
        Request::PoolRemove { pool, tape_id, .. } => {
            match ctx.catalog.remove_from_pool(&pool, &tape_id).await {
                Ok(()) => vec![Response::Ok],
                Err(e) => vec![server_error(e.into())],
            }
        }
        Request::AddFilesystem { path, .. } => match ctx.fs.register_filesystem(&path) {
            Ok(_) => vec![Response::Ok],
            Err(e) => vec![server_error(e.into())],
        },
    }
}

/// Flag the requested shutdown stage, resolve requests that will never be
/// admitted, and report whether in-flight work has drained.
async fn handle_stop(ctx: &Arc<ServerContext>, forced: bool, finish: bool) -> Vec<Response> {
    if forced {
        tracing::info!("Forced stop requested");
        ctx.shutdown.forced.cancel();
        ctx.shutdown.terminate.cancel();
    } else if finish {
        tracing::info!("Finish stop requested");
        ctx.shutdown.finish.cancel();
    } else {
        tracing::info!("Stop requested");
        ctx.shutdown.terminate.cancel();
    }
    ctx.notify_scheduler();

    if let Err(e) = fail_unadmitted_requests(ctx).await {
        return vec![server_error(e)];
    }

    match ctx.catalog.has_active_requests().await {
        Ok(active) => vec![Response::Stopping { success: !active }],
        Err(e) => vec![server_error(e.into())],
    }
}

/// Requests still `new` after admission stopped will never run.
pub(crate) async fn fail_unadmitted_requests(
    ctx: &Arc<ServerContext>,
) -> Result<(), ServerError> {
    let rows = ctx.catalog.new_requests().await?;
    for row in rows {
        tracing::warn!(reqnum = row.reqnum, tape_id = %row.tape_id, "Request not admitted before stop");
        ctx.catalog
            .finish_request(row.reqnum, &row.tape_id, RequestState::Failed)
            .await?;
    }
    ctx.publish_progress();
    Ok(())
}

/// Long-poll progress for one request: answer immediately when terminal,
/// otherwise wait for the next progress change (bounded) and report.
async fn handle_progress(ctx: &Arc<ServerContext>, reqnum: i64) -> Response {
    let state = match request_state(ctx, reqnum).await {
        Ok(state) => state,
        Err(e) => return server_error(e),
    };

    if !state.is_terminal() {
        let mut watch = ctx.progress_watch();
        let _ = tokio::time::timeout(Duration::from_secs(1), watch.changed()).await;
    }

    let state = match request_state(ctx, reqnum).await {
        Ok(state) => state,
        Err(e) => return server_error(e),
    };
    let counts = match ctx.catalog.job_counts(reqnum).await {
        Ok(counts) => counts,
        Err(e) => return server_error(e.into()),
    };

    // The watcher has seen the final counts; the rows can go.
    if state.is_terminal() {
        if let Err(e) = ctx.catalog.purge_request(reqnum).await {
            tracing::warn!(reqnum, error = %e, "Purge of drained request failed");
        }
    }

    Response::Progress {
        record: ProgressRecord {
            reqnum,
            total: counts.total,
            done: counts.done,
            failed: counts.failed,
            state,
        },
    }
}

/// Aggregate state over a request's per-tape rows. A request whose rows are
/// gone (or that never produced any) counts as completed.
async fn request_state(ctx: &Arc<ServerContext>, reqnum: i64) -> Result<RequestState, ServerError> {
    let rows = ctx.catalog.list_requests(Some(reqnum)).await?;
    if rows.is_empty() {
        return Ok(RequestState::Completed);
    }
    let any = |state: RequestState| rows.iter().any(|r| r.state == state.as_str());
    if any(RequestState::InProgress) {
        Ok(RequestState::InProgress)
    } else if any(RequestState::New) {
        Ok(RequestState::New)
    } else if any(RequestState::Failed) {
        Ok(RequestState::Failed)
    } else {
        Ok(RequestState::Completed)
    }
}

/// Inspect one file for an info-files listing; per-file failures land in
/// the row instead of failing the stream.
fn file_record(ctx: &Arc<ServerContext>, path: &std::path::Path) -> FileRecord {
    let inspect = || -> Result<FileRecord, ServerError> {
        let fh = coldstore_fs::FileHandle::open(&ctx.fs, path)?;
        let meta = fh.stat()?;
        let state = fh.migration_state()?;
        let attr = fh.get_attr()?;
        let (tape_id, start_block) = match attr.primary() {
            Some((tape, block)) => (Some(tape.to_string()), Some(block)),
            None => (None, None),
        };
        Ok(FileRecord {
            file_name: path.to_path_buf(),
            state: Some(state),
            size: Some(meta.size),
            tape_id,
            start_block,
            error: None,
        })
    };
    inspect().unwrap_or_else(|e| FileRecord {
        file_name: path.to_path_buf(),
        state: None,
        size: None,
        tape_id: None,
        start_block: None,
        error: Some(e.kind()),
    })
}

fn request_record(row: &RequestRow) -> RequestRecord {
    RequestRecord {
        operation: Operation::parse(&row.operation).unwrap_or(Operation::Migrate),
        reqnum: row.reqnum,
        tape_id: row.tape_id.clone(),
        pool: row.pool.clone(),
        target: FileState::parse(&row.target_state).unwrap_or(FileState::Resident),
        state: RequestState::parse(&row.state).unwrap_or(RequestState::New),
    }
}

//! Shared server state, built once by the supervisor during startup and
//! passed to every long-lived task.

use coldstore_catalog::Catalog;
use coldstore_core::config::AppConfig;
use coldstore_core::protocol::SessionKey;
use coldstore_fs::{EventToken, PosixFs};
use coldstore_tape::Inventory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// The three shutdown stages.
///
/// `terminate` stops admission and makes engines stop between jobs;
/// `finish` stops admission but lets dispatched work complete; `forced`
/// additionally aborts engines at the next safe point. `exited` fires once
/// the supervisor has drained everything and is tearing the process down.
#[derive(Clone)]
pub struct Shutdown {
    pub terminate: CancellationToken,
    pub finish: CancellationToken,
    pub forced: CancellationToken,
    pub exited: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            terminate: CancellationToken::new(),
            finish: CancellationToken::new(),
            forced: CancellationToken::new(),
            exited: CancellationToken::new(),
        }
    }

    /// Whether new requests may still be admitted.
    pub fn admitting(&self) -> bool {
        !self.terminate.is_cancelled()
            && !self.finish.is_cancelled()
            && !self.forced.is_cancelled()
    }

    /// Whether engines should stop between jobs.
    pub fn draining(&self) -> bool {
        self.terminate.is_cancelled() || self.forced.is_cancelled()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared server state.
pub struct ServerContext {
    pub config: AppConfig,
    pub catalog: Arc<dyn Catalog>,
    pub fs: Arc<PosixFs>,
    pub inventory: Arc<Inventory>,
    pub session_key: SessionKey,
    pub shutdown: Shutdown,
    /// Single wake-up point for admission decisions.
    pub sched_notify: Notify,
    /// Bounds concurrently running engine groups.
    pub engine_slots: Arc<Semaphore>,
    progress_tx: watch::Sender<u64>,
    reqnum: AtomicI64,
    /// Event tokens of transparent-recall jobs, answered when the job ends.
    recall_tokens: Mutex<HashMap<i64, EventToken>>,
}

impl ServerContext {
    pub fn new(
        config: AppConfig,
        catalog: Arc<dyn Catalog>,
        fs: Arc<PosixFs>,
        inventory: Arc<Inventory>,
        session_key: SessionKey,
    ) -> Arc<Self> {
        let engine_slots = Arc::new(Semaphore::new(config.server.max_migration_threads));
        let (progress_tx, _) = watch::channel(0);
        Arc::new(Self {
            config,
            catalog,
            fs,
            inventory,
            session_key,
            shutdown: Shutdown::new(),
            sched_notify: Notify::new(),
            engine_slots,
            progress_tx,
            reqnum: AtomicI64::new(1),
            recall_tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate the next request number.
    pub fn next_reqnum(&self) -> i64 {
        self.reqnum.fetch_add(1, Ordering::SeqCst)
    }

    /// Wake the scheduler for an admission pass.
    pub fn notify_scheduler(&self) {
        self.sched_notify.notify_one();
    }

    /// Publish a progress change to everyone watching a request.
    pub fn publish_progress(&self) {
        self.progress_tx.send_modify(|generation| *generation += 1);
    }

    /// Subscribe to progress changes.
    pub fn progress_watch(&self) -> watch::Receiver<u64> {
        self.progress_tx.subscribe()
    }

    /// Stash the event token of a transparent-recall job.
    pub fn stash_recall_token(&self, job_id: i64, token: EventToken) {
        self.recall_tokens
            .lock()
            .expect("token map poisoned")
            .insert(job_id, token);
    }

    /// Take the event token of a job, if it was a transparent recall.
    pub fn take_recall_token(&self, job_id: i64) -> Option<EventToken> {
        self.recall_tokens
            .lock()
            .expect("token map poisoned")
            .remove(&job_id)
    }
}

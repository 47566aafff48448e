//! Test harness: a complete server core (catalog, filesystem, library,
//! inventory, scheduler, event loop, receiver) on top of a tempdir.

use coldstore_catalog::{Catalog, PoolRepo, RequestRepo, SqliteCatalog, TapeRepo, TapeRow, TapeState};
use coldstore_core::RequestState;
use coldstore_core::config::AppConfig;
use coldstore_fs::PosixFs;
use coldstore_server::context::ServerContext;
use coldstore_server::{eventloop, receiver, scheduler};
use coldstore_tape::{DirLibrary, Inventory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UnixListener;

pub const TEST_KEY: u64 = 42;

/// A test server with all dependencies rooted in a tempdir.
/// Note: #[allow(dead_code)] because each test file compiles common/
/// separately.
#[allow(dead_code)]
pub struct TestHarness {
    pub ctx: Arc<ServerContext>,
    pub library: Arc<DirLibrary>,
    pub fs_root: PathBuf,
    temp: TempDir,
}

#[allow(dead_code)]
impl TestHarness {
    /// Harness with scheduler, event loop, and receiver running.
    pub async fn new() -> Self {
        let harness = Self::paused().await;
        harness.start_tasks();
        harness
    }

    /// Harness whose long-lived tasks are not yet running; requests queue
    /// but nothing dispatches until `start_tasks`.
    pub async fn paused() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::for_testing(temp.path());
        let server = &config.server;
        std::fs::create_dir_all(&server.state_dir).expect("state dir");

        let library = Arc::new(
            DirLibrary::new(
                temp.path().join("library"),
                &server.mount_point,
                2,
            )
            .expect("library")
            .with_mount_delay(Duration::from_millis(5)),
        );
        library.add_cartridge("T1").expect("cartridge T1");
        library.add_cartridge("T2").expect("cartridge T2");

        let catalog: Arc<dyn Catalog> = Arc::new(
            SqliteCatalog::new(server.db_path()).await.expect("catalog"),
        );
        let inventory = Arc::new(Inventory::new(library.clone()).await.expect("inventory"));
        for cartridge in inventory.cartridges() {
            catalog
                .upsert_tape(&TapeRow {
                    tape_id: cartridge.id.clone(),
                    pool: None,
                    mounted: false,
                    drive_id: None,
                    state: TapeState::Free.as_str().to_string(),
                })
                .await
                .expect("tape row");
        }

        let fs = PosixFs::new();
        let fs_root = temp.path().join("fs");
        std::fs::create_dir_all(&fs_root).expect("fs root");
        fs.register_filesystem(&fs_root).expect("register fs");

        let ctx = ServerContext::new(config, catalog, fs, inventory, TEST_KEY);
        Self {
            ctx,
            library,
            fs_root,
            temp,
        }
    }

    /// Spawn the long-lived tasks.
    pub fn start_tasks(&self) {
        let listener = UnixListener::bind(self.socket_path()).expect("bind socket");
        tokio::spawn(scheduler::run(self.ctx.clone()));
        tokio::spawn(eventloop::run(self.ctx.clone()));
        tokio::spawn(receiver::run(self.ctx.clone(), listener));
    }

    pub fn socket_path(&self) -> PathBuf {
        self.ctx.config.server.socket_path()
    }

    /// Create a file with the given content on the managed filesystem.
    pub fn create_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.fs_root.join(name);
        std::fs::write(&path, content).expect("write file");
        path
    }

    /// Wait until every request row of `reqnum` is terminal and return the
    /// aggregated state.
    pub async fn wait_terminal(&self, reqnum: i64) -> RequestState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let rows = self
                .ctx
                .catalog
                .list_requests(Some(reqnum))
                .await
                .expect("list requests");
            if !rows.is_empty()
                && rows.iter().all(|r| {
                    RequestState::parse(&r.state)
                        .map(|s| s.is_terminal())
                        .unwrap_or(false)
                })
            {
                return if rows.iter().any(|r| r.state == "failed") {
                    RequestState::Failed
                } else {
                    RequestState::Completed
                };
            }
            if tokio::time::Instant::now() > deadline {
                panic!("request {reqnum} did not settle; rows: {rows:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Create a pool holding exactly the given tapes.
    pub async fn pool_with(&self, name: &str, tapes: &[&str]) {
        self.ctx
            .catalog
            .create_pool(name, time::OffsetDateTime::now_utc())
            .await
            .expect("create pool");
        for tape in tapes {
            self.ctx
                .catalog
                .add_to_pool(name, tape)
                .await
                .expect("add to pool");
        }
    }

    /// The per-tape states of a request's rows.
    pub async fn request_states(&self, reqnum: i64) -> Vec<String> {
        self.ctx
            .catalog
            .list_requests(Some(reqnum))
            .await
            .expect("list requests")
            .into_iter()
            .map(|r| r.state)
            .collect()
    }
}

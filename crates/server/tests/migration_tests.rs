//! End-to-end migration scenarios.

mod common;

use coldstore_catalog::{JobRepo, RequestRepo, TapeRepo};
use coldstore_core::{FileState, RequestState};
use coldstore_fs::FileHandle;
use coldstore_server::enqueue;
use coldstore_tape::layout;
use common::TestHarness;

#[tokio::test]
async fn migrate_one_file_to_tape() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content = vec![0xabu8; 1024 * 1024];
    let path = harness.create_file("payload", &content);

    let reqnum = enqueue::enqueue_migration(
        &harness.ctx,
        &[path.clone()],
        FileState::Migrated,
        Some("pool1"),
    )
    .await
    .expect("enqueue");

    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    // The job row records the final state.
    let jobs = harness.ctx.catalog.list_jobs(Some(reqnum), 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].file_state, "migrated");
    assert!(!jobs[0].failed);

    // The primary copy is a stub: full logical size, no blocks.
    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Migrated);
    let meta = fh.stat().unwrap();
    assert_eq!(meta.size, content.len() as u64);
    assert_eq!(meta.blocks, 0);

    // The tape attribute points at T1 with a known start block.
    let attr = fh.get_attr().unwrap();
    let (tape_id, start_block) = attr.primary().expect("attribute recorded");
    assert_eq!(tape_id, "T1");
    assert!(start_block >= 0);

    // The tape copy holds the original bytes and the mirror link resolves.
    let mount = &harness.ctx.config.server.mount_point;
    let data = std::fs::read(layout::data_file(mount, "T1", &fh.uid())).unwrap();
    assert_eq!(data, content);
    let rel = path.strip_prefix("/").unwrap();
    let mirror = layout::tape_dir(mount, "T1").join(rel);
    assert_eq!(std::fs::read(&mirror).unwrap(), content);

    // The request row is terminal and the tape is free again.
    let requests = harness.ctx.catalog.list_requests(Some(reqnum)).await.unwrap();
    assert_eq!(requests[0].state, "completed");
    let tape = harness.ctx.catalog.get_tape("T1").await.unwrap().unwrap();
    assert_eq!(tape.state, "free");
}

#[tokio::test]
async fn premigration_keeps_primary_data() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content = b"keep me online".to_vec();
    let path = harness.create_file("premigrate", &content);

    let reqnum = enqueue::enqueue_migration(
        &harness.ctx,
        &[path.clone()],
        FileState::Premigrated,
        Some("pool1"),
    )
    .await
    .expect("enqueue");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Premigrated);
    assert_eq!(std::fs::read(&path).unwrap(), content);
    assert!(fh.get_attr().unwrap().primary().is_some());
}

#[tokio::test]
async fn zero_length_file_migrates() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = harness.create_file("empty", b"");

    let reqnum =
        enqueue::enqueue_migration(&harness.ctx, &[path.clone()], FileState::Migrated, Some("pool1"))
            .await
            .expect("enqueue");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Migrated);
    let mount = &harness.ctx.config.server.mount_point;
    let meta = std::fs::metadata(layout::data_file(mount, "T1", &fh.uid())).unwrap();
    assert_eq!(meta.len(), 0);
}

#[tokio::test]
async fn modified_file_fails_with_conflict() {
    let harness = TestHarness::paused().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = harness.create_file("racer", b"original");

    let reqnum = enqueue::enqueue_migration(
        &harness.ctx,
        &[path.clone()],
        FileState::Migrated,
        Some("pool1"),
    )
    .await
    .expect("enqueue");

    // The file changes between enqueue and dispatch.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    std::fs::write(&path, b"modified after enqueue").unwrap();

    harness.start_tasks();
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    // The job failed with a conflict rather than migrating stale data.
    let jobs = harness.ctx.catalog.list_jobs(Some(reqnum), 10).await.unwrap();
    assert!(jobs[0].failed);
    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Resident);
}

#[tokio::test]
async fn transient_busy_is_retried() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = harness.create_file("busy", b"eventually");

    // Two busy probes, well under the retry limit.
    harness.library.fail_busy("T1", 2);

    let reqnum =
        enqueue::enqueue_migration(&harness.ctx, &[path.clone()], FileState::Migrated, Some("pool1"))
            .await
            .expect("enqueue");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Migrated);
}

#[tokio::test]
async fn unknown_pool_is_rejected() {
    let harness = TestHarness::new().await;
    let path = harness.create_file("nopool", b"data");

    let err = enqueue::enqueue_migration(&harness.ctx, &[path], FileState::Migrated, Some("ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), coldstore_core::ErrorKind::PoolNotExists);
}

//! End-to-end recall scenarios: selective, transparent, and failure cases.

mod common;

use coldstore_catalog::JobRepo;
use coldstore_core::{ErrorKind, FileState, RequestState, TapeAttr};
use coldstore_fs::{EventKind, EventResponse, FileHandle};
use coldstore_server::enqueue;
use common::TestHarness;

async fn migrated_file(harness: &TestHarness, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = harness.create_file(name, content);
    let reqnum = enqueue::enqueue_migration(
        &harness.ctx,
        &[path.clone()],
        FileState::Migrated,
        Some("pool1"),
    )
    .await
    .expect("enqueue migration");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);
    path
}

#[tokio::test]
async fn migrate_then_recall_restores_bytes() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content: Vec<u8> = (0..700_000u32).map(|i| (i % 251) as u8).collect();
    let path = migrated_file(&harness, "roundtrip", &content).await;

    let reqnum = enqueue::enqueue_selective_recall(&harness.ctx, &[path.clone()], FileState::Resident)
        .await
        .expect("enqueue recall");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    // Byte-identical restore, attribute gone, state back to resident.
    assert_eq!(std::fs::read(&path).unwrap(), content);
    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Resident);
    assert_eq!(fh.get_attr().unwrap(), TapeAttr::default());
}

#[tokio::test]
async fn transparent_recall_on_read() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content = b"cold data coming back online".to_vec();
    let path = migrated_file(&harness, "trigger", &content).await;

    // An external reader touches byte 0; the blocked access resumes once
    // the recall finished.
    let response = harness
        .ctx
        .fs
        .trigger_data_event(&path, EventKind::Read)
        .await
        .expect("read event");
    assert_eq!(response, EventResponse::Continue);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Premigrated);
    assert_eq!(std::fs::read(&path).unwrap(), content);
}

#[tokio::test]
async fn transparent_write_recalls_to_resident() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content = b"will be overwritten".to_vec();
    let path = migrated_file(&harness, "writer", &content).await;

    let response = harness
        .ctx
        .fs
        .trigger_data_event(&path, EventKind::Write)
        .await
        .expect("write event");
    assert_eq!(response, EventResponse::Continue);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Resident);
    assert_eq!(fh.get_attr().unwrap(), TapeAttr::default());
}

#[tokio::test]
async fn concurrent_recalls_second_is_noop() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let content = vec![3u8; 300_000];
    let path = migrated_file(&harness, "twice", &content).await;

    let first =
        enqueue::enqueue_selective_recall(&harness.ctx, &[path.clone()], FileState::Premigrated)
            .await
            .expect("first recall");
    let second =
        enqueue::enqueue_selective_recall(&harness.ctx, &[path.clone()], FileState::Premigrated)
            .await
            .expect("second recall");

    assert_eq!(harness.wait_terminal(first).await, RequestState::Completed);
    assert_eq!(harness.wait_terminal(second).await, RequestState::Completed);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Premigrated);
    assert_eq!(std::fs::read(&path).unwrap(), content);

    // Neither request recorded a failed job.
    for reqnum in [first, second] {
        let jobs = harness.ctx.catalog.list_jobs(Some(reqnum), 10).await.unwrap();
        assert!(jobs.iter().all(|j| !j.failed), "jobs failed: {jobs:?}");
    }
}

#[tokio::test]
async fn corrupt_attribute_fails_recall_and_preserves_state() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = migrated_file(&harness, "corrupt", b"unreachable").await;

    harness
        .ctx
        .fs
        .write_raw_attr(&path, b"{\"tag\":1}".to_vec())
        .unwrap();

    let err = enqueue::enqueue_selective_recall(&harness.ctx, &[path.clone()], FileState::Resident)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptAttr);

    let fh = FileHandle::open(&harness.ctx.fs, &path).unwrap();
    assert_eq!(fh.migration_state().unwrap(), FileState::Migrated);
}

#[tokio::test]
async fn recall_of_resident_file_is_rejected_as_empty() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = harness.create_file("already-online", b"data");

    let err = enqueue::enqueue_selective_recall(&harness.ctx, &[path], FileState::Premigrated)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn zero_length_roundtrip() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = migrated_file(&harness, "empty", b"").await;

    let reqnum =
        enqueue::enqueue_selective_recall(&harness.ctx, &[path.clone()], FileState::Resident)
            .await
            .expect("enqueue recall");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);
    assert_eq!(std::fs::read(&path).unwrap(), b"");
}

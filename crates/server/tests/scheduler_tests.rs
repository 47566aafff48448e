//! Scheduler behavior: tape exclusivity, spurious wakes, drive sharing.

mod common;

use coldstore_catalog::{JobRepo, RequestRepo, TapeRepo};
use coldstore_core::{FileState, RequestState};
use coldstore_server::enqueue;
use common::TestHarness;
use std::time::Duration;

#[tokio::test]
async fn two_requests_share_one_tape_sequentially() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;

    // Two sizable requests against the same tape.
    let first_files: Vec<_> = (0..4)
        .map(|i| harness.create_file(&format!("a{i}"), &vec![1u8; 400_000]))
        .collect();
    let second_files: Vec<_> = (0..4)
        .map(|i| harness.create_file(&format!("b{i}"), &vec![2u8; 400_000]))
        .collect();

    let first =
        enqueue::enqueue_migration(&harness.ctx, &first_files, FileState::Migrated, Some("pool1"))
            .await
            .expect("first");
    let second =
        enqueue::enqueue_migration(&harness.ctx, &second_files, FileState::Migrated, Some("pool1"))
            .await
            .expect("second");

    // At no observed moment are both requests executing.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let a = harness.request_states(first).await;
        let b = harness.request_states(second).await;
        let running = |states: &[String]| states.iter().any(|s| s == "in_progress");
        assert!(
            !(running(&a) && running(&b)),
            "both requests ran concurrently on one tape"
        );
        let terminal = |states: &[String]| {
            !states.is_empty()
                && states.iter().all(|s| {
                    RequestState::parse(s)
                        .map(|st| st.is_terminal())
                        .unwrap_or(false)
                })
        };
        if terminal(&a) && terminal(&b) {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("requests did not settle: {a:?} {b:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(harness.wait_terminal(first).await, RequestState::Completed);
    assert_eq!(harness.wait_terminal(second).await, RequestState::Completed);
}

#[tokio::test]
async fn spurious_wakeups_change_nothing() {
    let harness = TestHarness::new().await;
    harness.pool_with("pool1", &["T1"]).await;
    let path = harness.create_file("steady", b"data");
    let reqnum =
        enqueue::enqueue_migration(&harness.ctx, &[path], FileState::Migrated, Some("pool1"))
            .await
            .expect("enqueue");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    let jobs_before = harness.ctx.catalog.list_jobs(None, 100).await.unwrap().len();
    let requests_before = harness.ctx.catalog.list_requests(None).await.unwrap().len();
    let tapes_before: Vec<_> = harness
        .ctx
        .catalog
        .list_tapes()
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.tape_id, t.state))
        .collect();

    for _ in 0..20 {
        harness.ctx.notify_scheduler();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        harness.ctx.catalog.list_jobs(None, 100).await.unwrap().len(),
        jobs_before
    );
    assert_eq!(
        harness.ctx.catalog.list_requests(None).await.unwrap().len(),
        requests_before
    );
    let tapes_after: Vec<_> = harness
        .ctx
        .catalog
        .list_tapes()
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.tape_id, t.state))
        .collect();
    assert_eq!(tapes_after, tapes_before);
}

#[tokio::test]
async fn requests_on_distinct_tapes_run_on_both_drives() {
    let harness = TestHarness::new().await;
    harness.pool_with("p1", &["T1"]).await;
    harness.pool_with("p2", &["T2"]).await;

    let a = harness.create_file("on-t1", &vec![1u8; 100_000]);
    let b = harness.create_file("on-t2", &vec![2u8; 100_000]);
    let first = enqueue::enqueue_migration(&harness.ctx, &[a], FileState::Migrated, Some("p1"))
        .await
        .expect("first");
    let second = enqueue::enqueue_migration(&harness.ctx, &[b], FileState::Migrated, Some("p2"))
        .await
        .expect("second");

    assert_eq!(harness.wait_terminal(first).await, RequestState::Completed);
    assert_eq!(harness.wait_terminal(second).await, RequestState::Completed);

    // Both cartridges ended up mounted, one per drive.
    let mounted: Vec<_> = harness
        .ctx
        .inventory
        .drives()
        .into_iter()
        .filter_map(|d| d.mounted_tape)
        .collect();
    assert_eq!(mounted.len(), 2);
}

#[tokio::test]
async fn third_tape_evicts_an_idle_cartridge() {
    let harness = TestHarness::new().await;
    harness.library.add_cartridge("T3").expect("cartridge T3");
    harness.ctx.inventory.reinventorize().await.expect("reinventorize");
    harness
        .ctx
        .catalog
        .upsert_tape(&coldstore_catalog::TapeRow {
            tape_id: "T3".into(),
            pool: None,
            mounted: false,
            drive_id: None,
            state: "free".into(),
        })
        .await
        .expect("tape row");
    for (pool, tape) in [("p1", "T1"), ("p2", "T2"), ("p3", "T3")] {
        harness.pool_with(pool, &[tape]).await;
    }

    // Occupy both drives, then require a third tape.
    for (name, pool) in [("f1", "p1"), ("f2", "p2")] {
        let path = harness.create_file(name, b"data");
        let reqnum =
            enqueue::enqueue_migration(&harness.ctx, &[path], FileState::Migrated, Some(pool))
                .await
                .expect("enqueue");
        assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);
    }

    let path = harness.create_file("f3", b"data");
    let reqnum = enqueue::enqueue_migration(&harness.ctx, &[path], FileState::Migrated, Some("p3"))
        .await
        .expect("enqueue");
    assert_eq!(harness.wait_terminal(reqnum).await, RequestState::Completed);

    let mounted: Vec<_> = harness
        .ctx
        .inventory
        .drives()
        .into_iter()
        .filter_map(|d| d.mounted_tape)
        .collect();
    assert!(mounted.contains(&"T3".to_string()));
}

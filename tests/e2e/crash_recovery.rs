//! Restart and persistence tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{test_config, FlakyStore, TestHarness, STRANGER};
use scooter_node::storage::ByteStore;
use scooter_node::{CursorStore, MemoryByteStore, SimulatedLedger, State};
use tempfile::TempDir;

#[tokio::test]
async fn test_restart_never_rematches_a_consumed_payment() {
    let ledger = SimulatedLedger::new();
    let store = MemoryByteStore::new();

    let cursor = {
        let mut harness = TestHarness::boot(&ledger, &store).await;
        let offer = harness.await_offer().await;
        harness.pay(&offer, 60);
        assert!(harness.await_ride().await);
        harness.controller.reconciler().cursor()
    };
    assert_eq!(cursor, 1);

    let mut harness = TestHarness::boot(&ledger, &store).await;
    assert_eq!(harness.controller.reconciler().cursor(), cursor);
    assert_eq!(harness.hardware.lock.unlock_count(), 0);

    harness.await_offer().await;
    assert!(harness.tick_until(30, State::is_active).await.is_none());
    assert_eq!(harness.controller.reconciler().stats().matched, 0);
    assert_eq!(harness.controller.reconciler().cursor(), cursor);
}

#[tokio::test]
async fn test_corrupt_cursor_rescans_from_zero() {
    let ledger = SimulatedLedger::new();
    for i in 0..3 {
        ledger.push_transfer(STRANGER, 10 + i);
    }
    let store = MemoryByteStore::new();
    store.corrupt_with(b"garbage".to_vec());

    let mut config = test_config();
    config.ledger.page_size = 10;
    let boxed: Box<dyn ByteStore> = Box::new(store.clone());
    let mut harness = TestHarness::setup(config, ledger.clone(), Some(boxed))
        .await
        .expect("boot");
    assert_eq!(harness.controller.reconciler().cursor(), 0);

    let offer = harness.await_offer().await;
    assert_eq!(harness.pay(&offer, 1), 4);
    assert!(harness.await_ride().await);

    assert_eq!(harness.controller.reconciler().stats().discarded, 3);
    let reloaded = CursorStore::new(Box::new(store.clone())).load();
    assert!(reloaded.valid);
    assert_eq!(reloaded.page, 4);
}

#[tokio::test]
async fn test_catch_up_skips_history_on_boot() {
    let ledger = SimulatedLedger::new();
    for i in 0..6 {
        ledger.push_transfer(STRANGER, 10 + i);
    }
    let store = MemoryByteStore::new();

    let mut config = test_config();
    config.ledger.catch_up_on_start = true;
    config.ledger.page_size = 4;
    let boxed: Box<dyn ByteStore> = Box::new(store.clone());
    let mut harness = TestHarness::setup(config, ledger.clone(), Some(boxed))
        .await
        .expect("boot");
    assert_eq!(harness.controller.reconciler().cursor(), 6);
    assert_eq!(CursorStore::new(Box::new(store.clone())).load().page, 6);

    let offer = harness.await_offer().await;
    assert_eq!(harness.pay(&offer, 1), 7);
    assert!(harness.await_ride().await);
    assert_eq!(harness.controller.reconciler().stats().discarded, 0);
}

#[tokio::test]
async fn test_catch_up_failure_still_boots() {
    let ledger = SimulatedLedger::new();
    ledger.push_transfer(STRANGER, 10);
    ledger.fail_next_reads(2);

    let mut config = test_config();
    config.ledger.catch_up_on_start = true;
    let boxed: Box<dyn ByteStore> = Box::new(MemoryByteStore::new());
    let mut harness = TestHarness::setup(config, ledger.clone(), Some(boxed))
        .await
        .expect("boot");
    assert_eq!(harness.controller.reconciler().cursor(), 0);

    let offer = harness.await_offer().await;
    harness.pay(&offer, 1);
    assert!(harness.await_ride().await);
    assert_eq!(harness.controller.reconciler().cursor(), 2);
}

#[tokio::test]
async fn test_persist_failure_withholds_the_match() {
    let ledger = SimulatedLedger::new();
    let store = FlakyStore::default();
    let boxed: Box<dyn ByteStore> = Box::new(store.clone());
    let mut harness = TestHarness::setup(test_config(), ledger.clone(), Some(boxed))
        .await
        .expect("boot");

    let offer = harness.await_offer().await;
    harness.pay(&offer, 1);
    store.set_failing(true);

    assert!(harness.tick_until(20, State::is_active).await.is_none());
    assert_eq!(harness.controller.reconciler().cursor(), 0);
    assert!(!harness.hardware.lock.is_unlocked());
    assert!(store.inner().bytes().is_none());

    store.set_failing(false);
    assert!(harness.await_ride().await);
    assert_eq!(harness.controller.reconciler().cursor(), 1);
    assert!(store.inner().bytes().is_some());
}

#[tokio::test]
async fn test_cursor_file_survives_restart() {
    let dir = TempDir::new().expect("temp dir");
    let ledger = SimulatedLedger::new();
    let mut config = test_config();
    config.root_dir = dir.path().join("node");

    {
        let mut harness = TestHarness::setup(config.clone(), ledger.clone(), None)
            .await
            .expect("boot");
        let offer = harness.await_offer().await;
        ledger.push_transfer(STRANGER, 3);
        harness.pay(&offer, 1);
        assert!(harness.await_ride().await);
        assert_eq!(harness.controller.reconciler().cursor(), 2);
    }
    assert!(config.cursor_path().exists());

    let harness = TestHarness::setup(config, ledger, None)
        .await
        .expect("reboot");
    assert_eq!(harness.controller.reconciler().cursor(), 2);
}

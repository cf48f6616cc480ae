//! Rental lifecycle tests: offer, payment, ride, settlement.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::{test_config, TestHarness, RATE, RENTER, STRANGER};
use scooter_node::peripherals::{PositionSource, Screen};
use scooter_node::session::settlement::RENTAL_FINISH_TYPE;
use scooter_node::storage::ByteStore;
use scooter_node::{CursorStore, MemoryByteStore, RentalStatus, SessionId, SimulatedLedger, State};

fn ledger_with_history(transfers: u64) -> SimulatedLedger {
    let ledger = SimulatedLedger::new();
    ledger.set_wallet(99_990_386_752, 0);
    for i in 0..transfers {
        ledger.push_transfer(STRANGER, 100 + i);
    }
    ledger
}

fn store_at(page: u64) -> MemoryByteStore {
    let store = MemoryByteStore::new();
    let mut cursor = CursorStore::new(Box::new(store.clone()));
    cursor.store(page).expect("seed cursor");
    store
}

#[tokio::test]
async fn test_boot_walks_to_offer() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let mut names = Vec::new();
    for _ in 0..5 {
        names.push(harness.tick().await.name());
    }
    assert_eq!(
        names,
        ["WifiWait", "MqttWait", "LedgerWait", "Offering", "AwaitingPayment"]
    );
    assert_eq!(harness.controller.record().status, RentalStatus::Available);
    assert!(harness.controller.record().session_id().is_some());
}

#[tokio::test]
async fn test_payment_at_page_five_starts_ride() {
    let ledger = ledger_with_history(4);
    let store = store_at(4);
    let mut harness = TestHarness::boot(&ledger, &store).await;
    assert_eq!(harness.controller.reconciler().cursor(), 4);

    let offer = harness.await_offer().await;
    assert_eq!(offer.rate, RATE);
    assert_eq!(harness.pay(&offer, 1), 5);

    assert!(harness.await_ride().await);

    let record = harness.controller.record();
    assert_eq!(record.status, RentalStatus::Rented);
    assert_eq!(record.counterparty(), Some(RENTER));
    assert_eq!(record.payment_amount(), Some(61_667));
    assert_eq!(record.session_seconds(), Some(1));
    assert_eq!(record.session_id().map(SessionId::to_hex), Some(offer.session_hex));
    assert!(record.start().is_some_and(|w| w.unix_time.is_some()));
    assert!(harness.hardware.lock.is_unlocked());

    assert_eq!(harness.controller.reconciler().cursor(), 5);
    let persisted = CursorStore::new(Box::new(store.clone())).load();
    assert!(persisted.valid);
    assert_eq!(persisted.page, 5);
}

#[tokio::test]
async fn test_payment_at_page_five_found_from_cursor_zero() {
    let ledger = ledger_with_history(4);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;
    assert_eq!(harness.controller.reconciler().cursor(), 0);

    let offer = harness.await_offer().await;
    assert_eq!(harness.pay(&offer, 1), 5);

    // One transaction per poll: four discards, then the match.
    assert!(harness.tick_until(60, State::is_active).await.is_some());
    let stats = harness.controller.reconciler().stats();
    assert_eq!(stats.polls, 5);
    assert_eq!(stats.discarded, 4);
    assert_eq!(harness.controller.record().session_seconds(), Some(1));
    assert_eq!(harness.controller.reconciler().cursor(), 5);
}

#[tokio::test]
async fn test_ride_settles_with_next_nonce() {
    let ledger = ledger_with_history(0);
    ledger.set_wallet(99_990_386_752, 41);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    harness.pay(&offer, 2);
    assert!(harness.await_ride().await);

    assert!(harness
        .tick_until(5, |s| matches!(s, State::Settling))
        .await
        .is_some());

    let sent = ledger.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].accepted);
    let body = &sent[0].signed.json;
    assert_eq!(body["type"], RENTAL_FINISH_TYPE);
    assert_eq!(body["nonce"], "42");
    assert_eq!(body["recipientId"], RENTER);
    assert_eq!(body["amount"], "1");
    assert_eq!(body["asset"]["sessionId"], offer.session_hex.as_str());
    assert_eq!(body["asset"]["containsRefund"], false);
    assert_ne!(body["asset"]["gps"][0]["timestamp"], 0);
    assert!(body["vendorField"]
        .as_str()
        .expect("vendor field")
        .starts_with("Ride End: "));

    assert!(!harness.hardware.lock.is_unlocked());
    assert_eq!(harness.controller.record().status, RentalStatus::Available);
    assert!(harness.controller.record().counterparty().is_none());
    assert_eq!(ledger.wallet().nonce, 42);

    let next = harness.await_offer().await;
    assert_ne!(next.session_hex, offer.session_hex);
}

#[tokio::test]
async fn test_ride_runs_paid_seconds() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    harness.pay(&offer, 3);
    assert!(harness.await_ride().await);

    assert!(harness.tick().await.is_active());
    assert!(harness.tick().await.is_active());
    assert_eq!(harness.tick().await, State::Settling);

    let remaining: Vec<u64> = harness
        .hardware
        .display
        .screens()
        .into_iter()
        .filter_map(|s| match s {
            Screen::Ride { remaining_secs, .. } => Some(remaining_secs),
            _ => None,
        })
        .collect();
    assert_eq!(remaining, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_ledger_outage_at_expiry_locks_and_settles_later() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    harness.pay(&offer, 1);
    assert!(harness.await_ride().await);

    ledger.fail_next_reads(1_000);
    assert_eq!(harness.tick().await, State::SettlementPending);
    assert!(!harness.hardware.lock.is_unlocked());
    assert_eq!(harness.controller.record().status, RentalStatus::Broken);

    let state = harness.run_ticks(600).await;
    assert_eq!(state, State::SettlementPending);
    assert!(!harness.hardware.lock.is_unlocked());
    assert_eq!(harness.hardware.lock.unlock_count(), 1);
    assert!(ledger.sent().is_empty());

    ledger.fail_next_reads(0);
    assert_eq!(harness.tick().await, State::Settling);
    assert_eq!(ledger.sent().len(), 1);
    assert_eq!(harness.controller.stats().settlements_sent, 1);
    assert_eq!(harness.controller.record().status, RentalStatus::Available);
    assert!(harness.controller.record().counterparty().is_none());
}

#[tokio::test]
async fn test_rejected_settlement_is_reported_and_ride_ends() {
    let ledger = ledger_with_history(0);
    ledger.reject_next_sends(1);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    harness.pay(&offer, 1);
    assert!(harness.await_ride().await);
    assert!(harness
        .tick_until(5, |s| matches!(s, State::Settling))
        .await
        .is_some());

    let stats = harness.controller.stats();
    assert_eq!(stats.settlement_failures, 1);
    assert_eq!(stats.settlements_sent, 0);
    assert!(!harness.hardware.lock.is_unlocked());

    harness.run_ticks(16).await;
    let packets = harness.hardware.telemetry.packets();
    assert!(packets.iter().any(|p| p.contains("\"err\":\"send failure")));
    assert!(!packets.last().expect("packet").contains("\"err\""));
}

#[tokio::test]
async fn test_underpayment_gives_zero_second_ride() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    ledger.push_rental_start(RENTER, RATE - 1, &offer.session_hex);
    assert!(harness.await_ride().await);
    assert_eq!(harness.controller.record().session_seconds(), Some(0));

    assert_eq!(harness.tick().await, State::Settling);
    assert_eq!(harness.hardware.lock.unlock_count(), 1);
    assert!(!harness.hardware.lock.is_unlocked());
    assert_eq!(ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_stray_and_stale_payments_are_consumed_without_matching() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    ledger.push_transfer(STRANGER, 5);
    ledger.push_rental_start(RENTER, RATE, &SessionId::from_seed(99).to_hex());
    harness.pay(&offer, 1);

    assert!(harness.await_ride().await);
    let stats = harness.controller.reconciler().stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.mismatched, 1);
    assert_eq!(stats.matched, 1);
    assert_eq!(harness.controller.reconciler().cursor(), 3);
    assert_eq!(harness.hardware.lock.unlock_count(), 1);
}

#[tokio::test]
async fn test_page_size_ten_matches_in_one_poll() {
    let ledger = ledger_with_history(3);
    let mut config = test_config();
    config.ledger.page_size = 10;
    let store: Box<dyn ByteStore> = Box::new(MemoryByteStore::new());
    let mut harness = TestHarness::setup(config, ledger.clone(), Some(store))
        .await
        .expect("boot");

    let offer = harness.await_offer().await;
    assert_eq!(harness.pay(&offer, 1), 4);
    assert!(harness.await_ride().await);

    let stats = harness.controller.reconciler().stats();
    assert_eq!(stats.polls, 1);
    assert_eq!(stats.discarded, 3);
    assert_eq!(harness.controller.reconciler().cursor(), 4);
}

#[tokio::test]
async fn test_lost_fix_withdraws_offer() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let first = harness.await_offer().await;
    let fix = harness.hardware.position.position_fix();
    harness.hardware.position.set(None);

    assert_eq!(harness.tick().await, State::Offering);
    assert_eq!(harness.controller.record().status, RentalStatus::Broken);
    assert_eq!(
        harness.hardware.display.screens().into_iter().rev().nth(1),
        Some(Screen::Splash)
    );

    assert_eq!(harness.tick().await, State::Offering);

    harness.hardware.position.set(fix);
    let second = harness.await_offer().await;
    assert_ne!(first.session_hex, second.session_hex);
}

#[tokio::test]
async fn test_wifi_loss_regresses_and_old_offer_goes_stale() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let first = harness.await_offer().await;
    harness.hardware.links.set_wifi(false);
    assert_eq!(harness.tick().await, State::WifiWait);
    assert_eq!(harness.controller.record().status, RentalStatus::Broken);

    harness.hardware.links.set_wifi(true);
    let second = harness.await_offer().await;
    assert_ne!(first.session_hex, second.session_hex);

    harness.pay(&first, 5);
    assert!(harness
        .tick_until(20, State::is_active)
        .await
        .is_none());
    assert_eq!(harness.controller.reconciler().stats().mismatched, 1);
    assert!(!harness.hardware.lock.is_unlocked());
}

#[tokio::test]
async fn test_active_ride_ignores_link_loss() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    let offer = harness.await_offer().await;
    harness.pay(&offer, 4);
    assert!(harness.await_ride().await);

    harness.hardware.links.set_wifi(false);
    harness.hardware.links.set_broker(false);
    harness.hardware.position.set(None);

    for _ in 0..3 {
        assert!(harness.tick().await.is_active());
        assert!(harness.hardware.lock.is_unlocked());
    }
    assert_eq!(harness.tick().await, State::Settling);
    assert_eq!(harness.tick().await, State::Offering);
    assert_eq!(harness.tick().await, State::WifiWait);
}

#[tokio::test]
async fn test_unsynced_ledger_holds_in_ledger_wait() {
    let ledger = ledger_with_history(0);
    ledger.set_synced(false);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    assert_eq!(harness.run_ticks(8).await, State::LedgerWait);
    assert!(!harness.controller.ledger_synced());

    ledger.set_synced(true);
    let offer = harness.await_offer().await;
    assert!(harness.controller.ledger_synced());
    assert_eq!(offer.session_hex.len(), 64);
}

#[tokio::test]
async fn test_telemetry_published_while_broker_up() {
    let ledger = ledger_with_history(0);
    let mut harness = TestHarness::boot(&ledger, &MemoryByteStore::new()).await;

    harness.run_ticks(30).await;
    let packets = harness.hardware.telemetry.packets();
    assert_eq!(packets.len(), 2);

    let packet: serde_json::Value = serde_json::from_str(&packets[0]).expect("json");
    assert_eq!(packet["status"], "Available");
    assert_eq!(packet["fix"], 1);
    assert_eq!(packet["bal"], 99_990_386_752u64);
    assert_eq!(packet["bat"], 96);

    harness.hardware.links.set_broker(false);
    harness.run_ticks(30).await;
    assert_eq!(harness.hardware.telemetry.packets().len(), 2);
}

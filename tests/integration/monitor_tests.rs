//! Wallet Monitoring Integration Tests
//!
//! Supervisor, monitors and subscribers wired to the in-memory ledger and
//! push transport, on paused time.

use crate::common::{
    swap_transaction, CollectingSubscriber, Delivered, FailingSubscriber, MockLedger, MockStream,
    OWNER_WALLET, TOKEN, WALLET,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_operator::config::MonitoringConfig;
use tandem_operator::constants::mints;
use tandem_operator::metrics::MetricsState;
use tandem_operator::models::ObservationChannel;
use tandem_operator::monitoring::{MonitorSupervisor, StreamMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn settings() -> MonitoringConfig {
    MonitoringConfig {
        poll_interval_secs: 1,
        reconnect_delay_ms: 500,
        degraded_after_failures: 3,
        reorder_hold_ms: 100,
        prime_on_start: false,
        ..MonitoringConfig::default()
    }
}

fn supervisor(
    ledger: Arc<MockLedger>,
    stream: Arc<MockStream>,
    settings: MonitoringConfig,
) -> MonitorSupervisor {
    MonitorSupervisor::new(
        ledger,
        stream,
        settings,
        Arc::new(MetricsState::new()),
        None,
        CancellationToken::new(),
    )
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Delivered>) -> Delivered {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no purchase event delivered")
        .expect("subscriber channel closed")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Delivered>) -> Vec<Delivered> {
    let mut out = Vec::new();
    while let Ok(delivered) = rx.try_recv() {
        out.push(delivered);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_poll_detects_native_purchase() {
    let ledger = Arc::new(MockLedger::new());
    ledger.push_transaction("sig-a", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));
    let (stream, _push) = MockStream::new();

    let supervisor = supervisor(ledger, Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    let (event, owners) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-a");
    assert_eq!(event.wallet_address, WALLET);
    assert_eq!(event.acquired_mint, TOKEN);
    assert_eq!(event.acquired_amount, Decimal::from(1000));
    assert_eq!(event.paid_mint, mints::SOL);
    assert_eq!(event.paid_amount, Decimal::from(2));
    assert_eq!(event.slot, 250);
    assert_eq!(event.channel, ObservationChannel::Poll);
    assert_eq!(owners, vec!["alice".to_string()]);
    assert!(supervisor.last_activity_time(WALLET).is_some());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_push_and_poll_emit_once() {
    let ledger = Arc::new(MockLedger::new());
    let tx = swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0);
    let (stream, push) = MockStream::new();

    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    push.send(StreamMessage {
        signature: "sig-a".to_string(),
        slot: 250,
        transaction: tx.clone(),
    })
    .unwrap();
    ledger.push_transaction("sig-a", 250, tx);

    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-a");

    // Several more poll cycles see the same signature
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_priming_skips_existing_history() {
    let ledger = Arc::new(MockLedger::new());
    ledger.push_transaction("sig-old", 100, swap_transaction(WALLET, TOKEN, 1_000_000_000, 10, 0));
    let (stream, _push) = MockStream::new();

    let supervisor = supervisor(
        ledger.clone(),
        Arc::new(stream),
        MonitoringConfig {
            prime_on_start: true,
            ..settings()
        },
    );
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut rx).is_empty());

    ledger.push_transaction("sig-new", 200, swap_transaction(WALLET, TOKEN, 1_000_000_000, 20, 0));
    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-new");
    assert_eq!(event.acquired_amount, Decimal::from(20));

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnects_degrade_then_recover() {
    let ledger = Arc::new(MockLedger::new());
    let stream = Arc::new(MockStream::failing());

    let supervisor = supervisor(ledger, stream.clone(), settings());
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(supervisor.degraded_addresses(), vec![WALLET.to_string()]);
    let snapshot = supervisor.snapshot().await;
    assert!(snapshot[0].degraded);

    stream.failures_before_success.store(0, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(supervisor.degraded_addresses().is_empty());
    assert!(stream.subscribe_calls.load(Ordering::SeqCst) >= 4);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deregistered_address_stops_emitting() {
    let ledger = Arc::new(MockLedger::new());
    ledger.push_transaction("sig-a", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));
    let (stream, _push) = MockStream::new();

    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();
    next_event(&mut rx).await;

    assert!(supervisor.deregister_watch(WALLET).await);
    assert!(!supervisor.deregister_watch(WALLET).await);
    assert_eq!(supervisor.monitor_count(), 0);

    ledger.push_transaction("sig-b", 260, swap_transaction(WALLET, TOKEN, 1_000_000_000, 5, 0));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_inactive_watch_stops_monitor() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, _push) = MockStream::new();
    let supervisor = supervisor(ledger, Arc::new(stream), settings());

    supervisor.register_watch(WALLET, "alice").await.unwrap();
    supervisor.register_watch(WALLET, "bob").await.unwrap();
    assert_eq!(supervisor.monitor_count(), 1);

    supervisor.set_active(WALLET, "alice", false).await.unwrap();
    assert_eq!(supervisor.monitor_count(), 1);
    supervisor.set_active(WALLET, "bob", false).await.unwrap();
    assert_eq!(supervisor.monitor_count(), 0);
    assert_eq!(supervisor.watched_wallets().len(), 2);

    assert!(supervisor.set_active(WALLET, "carol", true).await.is_err());
    assert!(supervisor.register_watch("not-an-address", "alice").await.is_err());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sync_is_idempotent() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, _push) = MockStream::new();
    let stream = Arc::new(stream);
    let supervisor = supervisor(ledger, stream.clone(), settings());

    let both = vec![WALLET.to_string(), OWNER_WALLET.to_string()];
    supervisor.sync(&both).await;
    supervisor.sync(&both).await;
    assert_eq!(supervisor.monitor_count(), 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stream.subscribe_calls.load(Ordering::SeqCst), 2);

    supervisor.sync(&[WALLET.to_string()]).await;
    assert_eq!(supervisor.active_addresses(), vec![WALLET.to_string()]);

    let snapshot = supervisor.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].owners.is_empty());

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_subscriber_does_not_block_others() {
    let ledger = Arc::new(MockLedger::new());
    ledger.push_transaction("sig-a", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));
    let (stream, _push) = MockStream::new();

    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let failing = Arc::new(FailingSubscriber {
        calls: AtomicUsize::new(0),
    });
    supervisor.add_subscriber(failing.clone());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    assert_eq!(next_event(&mut rx).await.0.source_signature, "sig-a");

    ledger.push_transaction("sig-b", 260, swap_transaction(WALLET, TOKEN, 1_000_000_000, 5, 0));
    assert_eq!(next_event(&mut rx).await.0.source_signature, "sig-b");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(failing.calls.load(Ordering::SeqCst), 2);

    supervisor.shutdown().await;
}

fn swap_at_slot(slot: u64, token_raw: u64) -> Value {
    let mut tx = swap_transaction(WALLET, TOKEN, 1_000_000_000, token_raw, 0);
    tx["slot"] = json!(slot);
    tx
}

#[tokio::test(start_paused = true)]
async fn test_malformed_transaction_is_skipped_and_monitor_keeps_emitting() {
    let ledger = Arc::new(MockLedger::new());
    // Valid on-chain, but more decimals than the monitor can represent
    ledger.push_transaction("sig-bad", 240, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 30));
    ledger.push_transaction("sig-good", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));
    let (stream, push) = MockStream::new();

    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-good");
    assert_eq!(event.acquired_amount, Decimal::from(1000));

    // Both channels stay alive after the bad transaction
    push.send(StreamMessage {
        signature: "sig-bad-push".to_string(),
        slot: 255,
        transaction: swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 30),
    })
    .unwrap();
    push.send(StreamMessage {
        signature: "sig-push".to_string(),
        slot: 260,
        transaction: swap_transaction(WALLET, TOKEN, 1_000_000_000, 7, 0),
    })
    .unwrap();
    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-push");
    assert_eq!(event.channel, ObservationChannel::Push);

    ledger.push_transaction("sig-later", 270, swap_transaction(WALLET, TOKEN, 1_000_000_000, 5, 0));
    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-later");
    assert_eq!(event.channel, ObservationChannel::Poll);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(supervisor.monitor_count(), 1);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_push_payload_is_recovered_by_poll() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, push) = MockStream::new();

    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    push.send(StreamMessage {
        signature: "sig-a".to_string(),
        slot: 250,
        transaction: Value::Null,
    })
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(drain(&mut rx).is_empty());

    ledger.push_transaction("sig-a", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));
    let (event, _) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-a");
    assert_eq!(event.channel, ObservationChannel::Poll);
    assert_eq!(event.acquired_amount, Decimal::from(1000));

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reconciles_missed_transactions() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, _push) = MockStream::new();
    stream.failures_before_success.store(1, Ordering::SeqCst);
    let stream = Arc::new(stream);

    // Polling alone would not run again within the test
    let supervisor = supervisor(
        ledger.clone(),
        stream.clone(),
        MonitoringConfig {
            poll_interval_secs: 60,
            ..settings()
        },
    );
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    // Lands while the push channel is down
    tokio::time::sleep(Duration::from_millis(200)).await;
    ledger.push_transaction("sig-missed", 250, swap_transaction(WALLET, TOKEN, 2_000_000_000, 1000, 0));

    let (event, owners) = next_event(&mut rx).await;
    assert_eq!(event.source_signature, "sig-missed");
    assert_eq!(event.channel, ObservationChannel::Reconciled);
    assert_eq!(owners, vec!["alice".to_string()]);
    assert_eq!(stream.subscribe_calls.load(Ordering::SeqCst), 2);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_are_delivered_in_slot_order() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, push) = MockStream::new();

    let supervisor = supervisor(
        ledger.clone(),
        Arc::new(stream),
        MonitoringConfig {
            reorder_hold_ms: 1500,
            ..settings()
        },
    );
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();

    // Let the first poll run against an empty history
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Newer transaction pushed first, older one only found by the next poll
    push.send(StreamMessage {
        signature: "sig-late".to_string(),
        slot: 300,
        transaction: swap_at_slot(300, 20),
    })
    .unwrap();
    ledger.push_transaction("sig-early", 200, swap_at_slot(200, 10));

    let (first, _) = next_event(&mut rx).await;
    let (second, _) = next_event(&mut rx).await;
    assert_eq!(first.source_signature, "sig-early");
    assert_eq!(first.channel, ObservationChannel::Poll);
    assert_eq!(second.source_signature, "sig-late");
    assert_eq!(second.channel, ObservationChannel::Push);

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_earlier_slot_after_hold_window_is_delivered_late_once() {
    let ledger = Arc::new(MockLedger::new());
    let (stream, push) = MockStream::new();

    // 100 ms hold is far shorter than the 1 s poll interval
    let supervisor = supervisor(ledger.clone(), Arc::new(stream), settings());
    let (collector, mut rx) = CollectingSubscriber::new();
    supervisor.add_subscriber(collector);
    supervisor.register_watch(WALLET, "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    push.send(StreamMessage {
        signature: "sig-late".to_string(),
        slot: 300,
        transaction: swap_at_slot(300, 20),
    })
    .unwrap();
    ledger.push_transaction("sig-early", 200, swap_at_slot(200, 10));

    let (first, _) = next_event(&mut rx).await;
    let (second, _) = next_event(&mut rx).await;
    assert_eq!(first.source_signature, "sig-late");
    assert_eq!(second.source_signature, "sig-early");

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut rx).is_empty());

    supervisor.shutdown().await;
}

//! Order Execution Integration Tests
//!
//! Drives the engine end to end against scripted providers and the
//! in-memory ledger: fallback, breaker handling, verification, per-owner
//! serialization and one-touch retry.

use crate::common::{
    Concurrency, MockLedger, MockProvider, MockSigner, QuoteBehavior, OWNER_WALLET, TOKEN,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tandem_operator::circuit_breaker::ProviderBreakers;
use tandem_operator::config::{CircuitBreakerConfig, ExecutionConfig};
use tandem_operator::constants::mints;
use tandem_operator::engine::OrderEngine;
use tandem_operator::error::ExecutionError;
use tandem_operator::metrics::MetricsState;
use tandem_operator::models::{AttemptOutcome, OrderAmount, OrderIntent, OrderStatus};

/// 1000 tokens at 6 decimals
const FILL: u64 = 1_000_000_000;

struct Harness {
    engine: Arc<OrderEngine>,
    ledger: Arc<MockLedger>,
    primary: Arc<MockProvider>,
    secondary: Arc<MockProvider>,
    log: Arc<Mutex<Vec<String>>>,
}

fn harness(primary: QuoteBehavior, secondary: QuoteBehavior) -> Harness {
    harness_with(primary, secondary, CircuitBreakerConfig::default(), None)
}

fn harness_with(
    primary: QuoteBehavior,
    secondary: QuoteBehavior,
    breaker_config: CircuitBreakerConfig,
    latency: Option<Arc<Concurrency>>,
) -> Harness {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut primary = MockProvider::new("primary", primary, log.clone());
    let mut secondary = MockProvider::new("secondary", secondary, log.clone());
    if let Some(concurrency) = latency {
        primary = primary.with_latency(Duration::from_secs(1), concurrency.clone());
        secondary = secondary.with_latency(Duration::from_secs(1), concurrency);
    }
    let primary = Arc::new(primary);
    let secondary = Arc::new(secondary);

    let ledger = Arc::new(MockLedger::new());
    ledger.set_fill(OWNER_WALLET, TOKEN, FILL);

    let breakers = Arc::new(ProviderBreakers::new(&breaker_config, ["primary", "secondary"]));
    let engine = Arc::new(OrderEngine::new(
        ExecutionConfig::default(),
        primary.clone(),
        secondary.clone(),
        ledger.clone(),
        breakers,
        Arc::new(MetricsState::new()),
    ));

    Harness {
        engine,
        ledger,
        primary,
        secondary,
        log,
    }
}

fn ok(impact_pct: f64) -> QuoteBehavior {
    QuoteBehavior::Ok { impact_pct }
}

fn buy(owner: &str) -> OrderIntent {
    OrderIntent::buy(owner, TOKEN, Decimal::ONE, 300)
}

fn single_failure_breakers() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 1,
        failure_window_secs: 60,
        cooldown_secs: 300,
    }
}

#[tokio::test(start_paused = true)]
async fn test_primary_is_tried_first() {
    let h = harness(ok(0.5), ok(0.5));

    let receipt = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap();

    assert_eq!(receipt.provider, "primary");
    assert_eq!(receipt.out_amount, Decimal::from(1000));
    assert_eq!(receipt.realized_price, Decimal::new(1, 3));
    assert_eq!(h.secondary.quotes(), 0);
    assert_eq!(h.ledger.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_excess_price_impact_falls_back_without_building() {
    // 300 bps slippage caps acceptable impact at 3%
    let h = harness(ok(5.0), ok(0.5));

    let receipt = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap();

    assert_eq!(receipt.provider, "secondary");
    assert_eq!(h.primary.builds(), 0);
    assert_eq!(
        *h.log.lock(),
        vec!["primary:quote", "secondary:quote", "secondary:build"]
    );

    let order = h.engine.order(&receipt.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.attempts.len(), 2);
    assert_eq!(order.attempts[0].provider, "primary");
    assert_eq!(order.attempts[0].outcome, AttemptOutcome::Rejected);
    assert!(order.attempts[0].detail.as_deref().unwrap().contains("price impact"));
    assert!(order.attempts[0].signature.is_none());
    assert_eq!(order.attempts[1].outcome, AttemptOutcome::Confirmed);
    assert_eq!(order.attempts[1].signature.as_deref(), Some("sig-1"));
}

#[tokio::test(start_paused = true)]
async fn test_both_providers_failing_exhausts_order() {
    let h = harness(QuoteBehavior::NoRoute, QuoteBehavior::NoRoute);

    let err = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap_err();

    let ExecutionError::Exhausted(aggregated) = err else {
        panic!("expected exhaustion, got {:?}", err);
    };
    assert_eq!(aggregated.failures.len(), 2);
    assert_eq!(aggregated.failures[0].provider, "primary");
    assert_eq!(aggregated.failures[1].provider, "secondary");
    assert!(aggregated.failures.iter().all(|f| f.reason.contains("no route")));

    assert_eq!(h.ledger.sent_count(), 0);
    let record = h.engine.get_last_failed_order("alice").unwrap();
    assert_eq!(record.token_address, TOKEN);
    assert_eq!(record.amount, OrderAmount::Exact(Decimal::ONE));
    assert_eq!(h.engine.order(&aggregated.order_id).unwrap().status, OrderStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_without_balance_change_is_mismatch() {
    let h = harness(ok(0.5), ok(0.5));
    *h.ledger.fill.lock() = None;

    let err = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap_err();

    match err {
        ExecutionError::VerificationMismatch { provider, signature } => {
            assert_eq!(provider, "primary");
            assert_eq!(signature, "sig-1");
        }
        other => panic!("expected verification mismatch, got {:?}", other),
    }
    // No fallback after a transaction landed
    assert_eq!(h.secondary.quotes(), 0);
    assert!(h.engine.has_recent_failed_order("alice"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_intent_contacts_no_provider() {
    let h = harness(ok(0.5), ok(0.5));

    let mut zero_slippage = buy("alice");
    zero_slippage.max_slippage_bps = 0;
    let negative = OrderIntent::buy("alice", TOKEN, Decimal::NEGATIVE_ONE, 300);
    let base_asset = OrderIntent::buy("alice", mints::SOL, Decimal::ONE, 300);
    let bad_address = OrderIntent::buy("alice", "not-a-mint", Decimal::ONE, 300);
    let over_hundred = OrderIntent::sell(
        "alice",
        TOKEN,
        OrderAmount::PercentOfBalance(Decimal::from(150)),
        300,
    );

    for intent in [zero_slippage, negative, base_asset, bad_address, over_hundred] {
        let err = h.engine.submit_order(intent, &MockSigner::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)), "got {:?}", err);
    }

    assert_eq!(h.primary.quotes() + h.secondary.quotes(), 0);
    assert!(!h.engine.has_recent_failed_order("alice"));
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_skips_provider() {
    let h = harness_with(
        QuoteBehavior::NoRoute,
        ok(0.5),
        single_failure_breakers(),
        None,
    );
    let signer = MockSigner::new();

    let first = h.engine.submit_order(buy("alice"), &signer).await.unwrap();
    assert_eq!(first.provider, "secondary");
    assert!(h.engine.breakers().is_open("primary"));

    let second = h.engine.submit_order(buy("alice"), &signer).await.unwrap();
    assert_eq!(second.provider, "secondary");
    assert_eq!(h.primary.quotes(), 1);

    let order = h.engine.order(&second.order_id).unwrap();
    assert_eq!(order.attempts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_all_breakers_open_forces_least_recently_opened() {
    let h = harness_with(
        QuoteBehavior::NoRoute,
        ok(0.5),
        single_failure_breakers(),
        None,
    );
    let signer = MockSigner::new();

    // Primary opens first
    h.engine.submit_order(buy("alice"), &signer).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    // Secondary opens ten seconds later
    h.secondary.set_behavior(QuoteBehavior::NoRoute);
    let err = h.engine.submit_order(buy("alice"), &signer).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Exhausted(_)));
    assert!(h.engine.breakers().is_open("primary"));
    assert!(h.engine.breakers().is_open("secondary"));

    h.primary.set_behavior(ok(0.5));
    let secondary_quotes = h.secondary.quotes();
    let receipt = h.engine.submit_order(buy("alice"), &signer).await.unwrap();

    assert_eq!(receipt.provider, "primary");
    assert_eq!(h.secondary.quotes(), secondary_quotes);
    assert!(!h.engine.breakers().is_open("primary"));
}

#[tokio::test(start_paused = true)]
async fn test_same_owner_orders_are_serialized() {
    let concurrency = Arc::new(Concurrency::default());
    let h = harness_with(
        ok(0.5),
        ok(0.5),
        CircuitBreakerConfig::default(),
        Some(concurrency.clone()),
    );
    let signer = MockSigner::new();

    let (a, b) = tokio::join!(
        h.engine.submit_order(buy("alice"), &signer),
        h.engine.submit_order(buy("alice"), &signer),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(concurrency.max(), 1);
    assert_eq!(h.engine.busy_owners(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_different_owners_execute_concurrently() {
    let concurrency = Arc::new(Concurrency::default());
    let h = harness_with(
        ok(0.5),
        ok(0.5),
        CircuitBreakerConfig::default(),
        Some(concurrency.clone()),
    );
    let signer = MockSigner::new();

    let (a, b) = tokio::join!(
        h.engine.submit_order(buy("alice"), &signer),
        h.engine.submit_order(buy("bob"), &signer),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(concurrency.max(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_replays_last_failed_order() {
    let h = harness(QuoteBehavior::NoRoute, QuoteBehavior::NoRoute);
    let signer = MockSigner::new();

    h.engine.submit_order(buy("alice"), &signer).await.unwrap_err();
    assert!(h.engine.has_recent_failed_order("alice"));

    h.primary.set_behavior(ok(0.5));
    let receipt = h.engine.retry_last_failed("alice", &signer).await.unwrap();

    assert_eq!(receipt.provider, "primary");
    assert!(!h.engine.has_recent_failed_order("alice"));
    assert_eq!(
        h.primary.last_request.lock().as_ref().unwrap().amount,
        1_000_000_000
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_ttl_is_rejected() {
    let h = harness(QuoteBehavior::NoRoute, QuoteBehavior::NoRoute);
    let signer = MockSigner::new();

    h.engine.submit_order(buy("alice"), &signer).await.unwrap_err();
    tokio::time::advance(Duration::from_secs(3601)).await;

    assert!(h.engine.get_last_failed_order("alice").is_none());
    let err = h.engine.retry_last_failed("alice", &signer).await.unwrap_err();
    assert!(matches!(err, ExecutionError::Validation(_)));
    assert_eq!(h.engine.prune_failed_orders(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_percent_sell_resolves_against_balance() {
    let h = harness(ok(0.5), ok(0.5));
    h.ledger.set_token_balance(OWNER_WALLET, TOKEN, 1000);

    let intent = OrderIntent::sell(
        "alice",
        TOKEN,
        OrderAmount::PercentOfBalance(Decimal::from(50)),
        300,
    );
    let receipt = h.engine.submit_order(intent, &MockSigner::new()).await.unwrap();

    let request = h.primary.last_request.lock().clone().unwrap();
    assert_eq!(request.amount, 500);
    assert_eq!(request.input_mint, TOKEN);
    assert_eq!(request.output_mint, mints::SOL);
    assert_eq!(receipt.provider, "primary");
}

#[tokio::test(start_paused = true)]
async fn test_stale_quotes_are_requoted_then_fall_back() {
    let h = harness(QuoteBehavior::Stale, ok(0.5));

    let receipt = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap();

    // Initial quote plus two re-quotes
    assert_eq!(h.primary.quotes(), 3);
    assert_eq!(h.primary.builds(), 3);
    assert_eq!(receipt.provider, "secondary");

    let order = h.engine.order(&receipt.order_id).unwrap();
    assert!(order.attempts[0].detail.as_deref().unwrap().contains("expired"));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_submission_times_out_and_falls_back() {
    let h = harness(ok(0.5), ok(0.5));
    *h.ledger.confirm_mode.lock() = crate::common::ConfirmMode::NeverSeen;

    let err = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap_err();

    let ExecutionError::Exhausted(aggregated) = err else {
        panic!("expected exhaustion, got {:?}", err);
    };
    let order = h.engine.order(&aggregated.order_id).unwrap();
    assert_eq!(order.attempts.len(), 2);
    assert!(order
        .attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::TimedOut));
    assert_eq!(h.ledger.sent_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mint_with_unsupported_decimals_is_rejected() {
    let h = harness(ok(0.5), ok(0.5));
    h.ledger.decimals.lock().insert(TOKEN.to_string(), 30);
    h.ledger.set_token_balance(OWNER_WALLET, TOKEN, 1000);

    let exact_sell = OrderIntent::sell("alice", TOKEN, OrderAmount::Exact(Decimal::ONE), 300);
    let percent_sell = OrderIntent::sell(
        "alice",
        TOKEN,
        OrderAmount::PercentOfBalance(Decimal::from(50)),
        300,
    );

    for intent in [exact_sell, percent_sell, buy("alice")] {
        let err = h.engine.submit_order(intent, &MockSigner::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)), "got {:?}", err);
    }

    assert_eq!(h.primary.quotes() + h.secondary.quotes(), 0);
    assert_eq!(h.ledger.sent_count(), 0);
    assert!(!h.engine.has_recent_failed_order("alice"));

    // The engine keeps serving other mints
    h.ledger.decimals.lock().insert(TOKEN.to_string(), 6);
    let receipt = h.engine.submit_order(buy("alice"), &MockSigner::new()).await.unwrap();
    assert_eq!(receipt.provider, "primary");
}

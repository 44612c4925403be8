//! Failed Order Cache Unit Tests

use rust_decimal::Decimal;
use std::time::Duration;
use tandem_operator::engine::FailedOrderCache;
use tandem_operator::models::{FailedOrderRecord, OrderAmount, OrderIntent};

fn failed(owner: &str, token: &str) -> FailedOrderRecord {
    FailedOrderRecord::from_intent(
        &OrderIntent::buy(owner, token, Decimal::new(5, 1), 300),
        "no route".to_string(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_records_are_per_owner() {
    let cache = FailedOrderCache::new(Duration::from_secs(3600));
    cache.record(failed("alice", "MintA"));
    cache.record(failed("bob", "MintB"));

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get_last_failed("alice").unwrap().token_address, "MintA");
    assert_eq!(cache.get_last_failed("bob").unwrap().token_address, "MintB");

    cache.clear("alice");
    assert!(!cache.has_recent("alice"));
    assert!(cache.has_recent("bob"));
}

#[tokio::test(start_paused = true)]
async fn test_expired_record_is_invisible_and_not_reusable() {
    let cache = FailedOrderCache::new(Duration::from_secs(3600));
    cache.record(failed("alice", "MintA"));

    tokio::time::advance(Duration::from_secs(3599)).await;
    assert!(cache.has_recent("alice"));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get_last_failed("alice").is_none());
    assert!(cache.take("alice").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_taken_record_rebuilds_original_intent() {
    let cache = FailedOrderCache::new(Duration::from_secs(3600));
    cache.record(failed("alice", "MintA"));

    let intent = cache.take("alice").unwrap().to_intent();
    assert_eq!(intent.owner_id, "alice");
    assert_eq!(intent.amount, OrderAmount::Exact(Decimal::new(5, 1)));
    assert_eq!(intent.max_slippage_bps, 300);
    assert!(cache.is_empty());
}

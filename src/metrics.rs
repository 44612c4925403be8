//! Prometheus metrics for Tandem Operator
//!
//! Exposes metrics endpoint for monitoring:
//! - Ledger RPC latency, failures and pool overflow
//! - Request batch sizes
//! - Provider circuit breaker state
//! - Purchase events per channel and order outcomes
//! - Active monitor count

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics state
pub struct MetricsState {
    /// Prometheus registry
    registry: Registry,
    /// RPC latency histogram (in milliseconds)
    pub rpc_latency: HistogramVec,
    /// RPC failures by endpoint
    pub rpc_failures: IntCounterVec,
    /// Temporary connections created on pool exhaustion
    pub pool_overflow: IntCounter,
    /// Requests folded into each batch round trip
    pub batch_size: Histogram,
    /// Provider breaker state (1 = open, 0 = closed)
    pub provider_breaker_open: IntGaugeVec,
    /// Purchase events emitted by channel
    pub purchase_events: IntCounterVec,
    /// Orders by final outcome
    pub orders: IntCounterVec,
    /// Running wallet activity monitors
    pub active_monitors: IntGauge,
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered
    pub fn new() -> Self {
        let registry = Registry::new();

        let rpc_latency = HistogramVec::new(
            HistogramOpts::new("tandem_rpc_latency_ms", "RPC call latency in milliseconds")
                .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]),
            &["endpoint", "method"],
        )
        .expect("Failed to create rpc_latency histogram");
        registry
            .register(Box::new(rpc_latency.clone()))
            .expect("Failed to register rpc_latency");

        let rpc_failures = IntCounterVec::new(
            Opts::new("tandem_rpc_failures_total", "RPC failures by endpoint"),
            &["endpoint"],
        )
        .expect("Failed to create rpc_failures counter");
        registry
            .register(Box::new(rpc_failures.clone()))
            .expect("Failed to register rpc_failures");

        let pool_overflow = IntCounter::with_opts(Opts::new(
            "tandem_pool_overflow_total",
            "Temporary connections created because the pool was exhausted",
        ))
        .expect("Failed to create pool_overflow counter");
        registry
            .register(Box::new(pool_overflow.clone()))
            .expect("Failed to register pool_overflow");

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("tandem_batch_size", "Requests per batched RPC round trip")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )
        .expect("Failed to create batch_size histogram");
        registry
            .register(Box::new(batch_size.clone()))
            .expect("Failed to register batch_size");

        let provider_breaker_open = IntGaugeVec::new(
            Opts::new(
                "tandem_provider_breaker_open",
                "Provider circuit breaker state (1 = open, 0 = closed)",
            ),
            &["provider"],
        )
        .expect("Failed to create provider_breaker_open gauge");
        registry
            .register(Box::new(provider_breaker_open.clone()))
            .expect("Failed to register provider_breaker_open");

        let purchase_events = IntCounterVec::new(
            Opts::new(
                "tandem_purchase_events_total",
                "Purchase events emitted by observation channel",
            ),
            &["channel"],
        )
        .expect("Failed to create purchase_events counter");
        registry
            .register(Box::new(purchase_events.clone()))
            .expect("Failed to register purchase_events");

        let orders = IntCounterVec::new(
            Opts::new("tandem_orders_total", "Orders by final outcome"),
            &["outcome"],
        )
        .expect("Failed to create orders counter");
        registry
            .register(Box::new(orders.clone()))
            .expect("Failed to register orders");

        let active_monitors = IntGauge::with_opts(Opts::new(
            "tandem_active_monitors",
            "Number of running wallet activity monitors",
        ))
        .expect("Failed to create active_monitors gauge");
        registry
            .register(Box::new(active_monitors.clone()))
            .expect("Failed to register active_monitors");

        Self {
            registry,
            rpc_latency,
            rpc_failures,
            pool_overflow,
            batch_size,
            provider_breaker_open,
            purchase_events,
            orders,
            active_monitors,
        }
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics handler - returns Prometheus metrics in text format
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry().gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("Content-Type", "text/plain; version=0.0.4")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        buffer,
    )
}

/// Create metrics router
pub fn metrics_router() -> Router<Arc<MetricsState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

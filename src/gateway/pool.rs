//! Ledger connection pool
//!
//! Fixed-size set of connections spread round-robin over the configured
//! endpoints. Selection order:
//! 1. an idle connection with no failure inside the cool-down
//! 2. any idle connection
//! 3. a temporary overflow connection, used once and dropped
//!
//! Acquisition never blocks waiting for a pooled connection to free up.

use super::transport::{ConnectionFactory, RpcTransport};
use crate::error::TransportError;
use crate::metrics::MetricsState;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Samples kept for the rolling latency window
const LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct ConnState {
    in_use: bool,
    last_failure: Option<Instant>,
    failures: u64,
    requests: u64,
}

struct PooledConnection {
    id: usize,
    transport: Arc<dyn RpcTransport>,
    state: Mutex<ConnState>,
}

/// Connection handed out by [`ConnectionPool::acquire`]
///
/// Pooled connections return to the pool when the lease drops.
pub struct ConnectionLease<'a> {
    pool: &'a ConnectionPool,
    pooled: Option<Arc<PooledConnection>>,
    transport: Arc<dyn RpcTransport>,
}

impl ConnectionLease<'_> {
    pub fn is_overflow(&self) -> bool {
        self.pooled.is_none()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Send a body over this connection, recording latency and failures
    pub async fn post(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let started = Instant::now();
        let result = self.transport.post(body).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.pool.record_latency(self.transport.endpoint(), method, elapsed_ms);

        if let Some(conn) = &self.pooled {
            let mut state = conn.state.lock();
            state.requests += 1;
            if let Err(e) = &result {
                if e.is_connection_fault() {
                    state.failures += 1;
                    state.last_failure = Some(Instant::now());
                }
            }
        }

        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.pool.failures_total.fetch_add(1, Ordering::Relaxed);
                self.pool
                    .metrics
                    .rpc_failures
                    .with_label_values(&[self.transport.endpoint()])
                    .inc();
                tracing::warn!(
                    endpoint = %self.transport.endpoint(),
                    method = %method,
                    error = %e,
                    "Ledger request failed"
                );
            }
        }

        result
    }
}

impl Drop for ConnectionLease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = &self.pooled {
            conn.state.lock().in_use = false;
        }
    }
}

/// Per-connection health for operators
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub id: usize,
    pub endpoint: String,
    pub in_use: bool,
    pub requests: u64,
    pub failures: u64,
    pub recently_failed: bool,
}

/// Gateway health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub connections: Vec<ConnectionStats>,
    pub overflow_total: u64,
    pub failures_total: u64,
    /// Mean latency over the rolling window
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub latency_samples: usize,
}

pub struct ConnectionPool {
    connections: Vec<Arc<PooledConnection>>,
    factory: Arc<dyn ConnectionFactory>,
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    failure_cooldown: Duration,
    overflow_total: AtomicU64,
    failures_total: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    metrics: Arc<MetricsState>,
}

impl ConnectionPool {
    pub fn new(
        endpoints: Vec<String>,
        size: usize,
        failure_cooldown: Duration,
        factory: Arc<dyn ConnectionFactory>,
        metrics: Arc<MetricsState>,
    ) -> Result<Self, TransportError> {
        if endpoints.is_empty() {
            return Err(TransportError::Connect("no ledger endpoints configured".to_string()));
        }

        let connections = (0..size.max(1))
            .map(|id| {
                let endpoint = &endpoints[id % endpoints.len()];
                Ok(Arc::new(PooledConnection {
                    id,
                    transport: factory.connect(endpoint)?,
                    state: Mutex::new(ConnState::default()),
                }))
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        tracing::info!(
            connections = connections.len(),
            endpoints = endpoints.len(),
            "Ledger connection pool initialized"
        );

        Ok(Self {
            connections,
            factory,
            endpoints,
            cursor: AtomicUsize::new(0),
            failure_cooldown,
            overflow_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            metrics,
        })
    }

    /// Take a connection without blocking
    pub fn acquire(&self) -> Result<ConnectionLease<'_>, TransportError> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let n = self.connections.len();
        let now = Instant::now();

        let healthy = |state: &ConnState| match state.last_failure {
            Some(at) => now.duration_since(at) >= self.failure_cooldown,
            None => true,
        };

        for prefer_healthy in [true, false] {
            for offset in 0..n {
                let conn = &self.connections[(start + offset) % n];
                let mut state = conn.state.lock();
                if state.in_use || (prefer_healthy && !healthy(&state)) {
                    continue;
                }
                state.in_use = true;
                drop(state);
                return Ok(ConnectionLease {
                    pool: self,
                    pooled: Some(conn.clone()),
                    transport: conn.transport.clone(),
                });
            }
        }

        let endpoint = &self.endpoints[start % self.endpoints.len()];
        let transport = self.factory.connect(endpoint)?;
        self.overflow_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.pool_overflow.inc();
        tracing::debug!(endpoint = %endpoint, "Pool exhausted, using temporary connection");

        Ok(ConnectionLease {
            pool: self,
            pooled: None,
            transport,
        })
    }

    /// Acquire a connection and send one body over it
    pub async fn request(&self, method: &str, body: &Value) -> Result<Value, TransportError> {
        let lease = self.acquire()?;
        lease.post(method, body).await
    }

    fn record_latency(&self, endpoint: &str, method: &str, elapsed_ms: f64) {
        self.metrics
            .rpc_latency
            .with_label_values(&[endpoint, method])
            .observe(elapsed_ms);

        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(elapsed_ms);
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn stats(&self) -> GatewayStats {
        let now = Instant::now();
        let connections = self
            .connections
            .iter()
            .map(|conn| {
                let state = conn.state.lock();
                ConnectionStats {
                    id: conn.id,
                    endpoint: conn.transport.endpoint().to_string(),
                    in_use: state.in_use,
                    requests: state.requests,
                    failures: state.failures,
                    recently_failed: state
                        .last_failure
                        .map(|at| now.duration_since(at) < self.failure_cooldown)
                        .unwrap_or(false),
                }
            })
            .collect();

        let latencies = self.latencies.lock();
        let samples = latencies.len();
        let avg = if samples == 0 {
            0.0
        } else {
            latencies.iter().sum::<f64>() / samples as f64
        };
        let max = latencies.iter().copied().fold(0.0, f64::max);

        GatewayStats {
            connections,
            overflow_total: self.overflow_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            avg_latency_ms: avg,
            max_latency_ms: max,
            latency_samples: samples,
        }
    }
}

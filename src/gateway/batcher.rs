//! Request batcher
//!
//! A single flush task collects calls for `window` (or until `max_batch`
//! calls arrive), groups them by method and sends each group as one JSON-RPC
//! batch array. Replies are routed back to callers by request id.

use super::pool::ConnectionPool;
use super::transport::into_result;
use crate::error::TransportError;
use crate::metrics::MetricsState;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

const QUEUE_CAPACITY: usize = 1024;

struct PendingCall {
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, TransportError>>,
}

/// Handle used to enqueue calls
#[derive(Clone)]
pub struct Batcher {
    tx: mpsc::Sender<PendingCall>,
}

impl Batcher {
    /// Spawn the flush task
    pub fn spawn(
        pool: Arc<ConnectionPool>,
        window: Duration,
        max_batch: usize,
        metrics: Arc<MetricsState>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(run_flush_loop(
            rx,
            pool,
            window,
            max_batch.max(1),
            metrics,
            cancel,
        ));
        (Self { tx }, handle)
    }

    /// Enqueue a call and wait for its result
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PendingCall {
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        rx.await.map_err(|_| TransportError::Closed)?
    }
}

async fn run_flush_loop(
    mut rx: mpsc::Receiver<PendingCall>,
    pool: Arc<ConnectionPool>,
    window: Duration,
    max_batch: usize,
    metrics: Arc<MetricsState>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            call = rx.recv() => match call {
                Some(call) => call,
                None => break,
            },
        };

        let deadline = Instant::now() + window;
        let mut pending = vec![first];
        while pending.len() < max_batch {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(call)) => pending.push(call),
                Ok(None) | Err(_) => break,
            }
        }

        let mut groups: BTreeMap<String, Vec<PendingCall>> = BTreeMap::new();
        for call in pending {
            groups.entry(call.method.clone()).or_default().push(call);
        }

        for (method, calls) in groups {
            metrics.batch_size.observe(calls.len() as f64);
            let pool = pool.clone();
            tokio::spawn(async move {
                send_group(&pool, &method, calls).await;
            });
        }
    }

    tracing::debug!("Batch flush task stopped");
}

async fn send_group(pool: &ConnectionPool, method: &str, calls: Vec<PendingCall>) {
    if calls.len() == 1 {
        if let Some(call) = calls.into_iter().next() {
            let body = json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": call.method,
                "params": call.params,
            });
            let result = pool.request(method, &body).await.and_then(into_result);
            let _ = call.reply.send(result);
        }
        return;
    }

    let body = Value::Array(
        calls
            .iter()
            .enumerate()
            .map(|(id, call)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": call.method,
                    "params": call.params,
                })
            })
            .collect(),
    );

    tracing::trace!(method = %method, size = calls.len(), "Flushing batch");

    match pool.request(method, &body).await {
        Ok(Value::Array(responses)) => {
            let mut by_id: HashMap<u64, Value> = responses
                .into_iter()
                .filter_map(|r| r.get("id").and_then(Value::as_u64).map(|id| (id, r)))
                .collect();

            for (id, call) in calls.into_iter().enumerate() {
                let result = match by_id.remove(&(id as u64)) {
                    Some(response) => into_result(response),
                    None => Err(TransportError::Decode(format!(
                        "batch response missing id {}",
                        id
                    ))),
                };
                let _ = call.reply.send(result);
            }
        }
        Ok(other) => {
            // Some endpoints answer a rejected batch with a single error object
            let err = match into_result(other) {
                Err(e) => e,
                Ok(_) => TransportError::Decode("expected batch array response".to_string()),
            };
            for call in calls {
                let _ = call.reply.send(Err(err.clone()));
            }
        }
        Err(e) => {
            for call in calls {
                let _ = call.reply.send(Err(e.clone()));
            }
        }
    }
}

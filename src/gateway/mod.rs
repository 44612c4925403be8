//! Resource gateway
//!
//! Shared access to the ledger network: pooled connections with health
//! tracking and overflow, plus batched reads so near-simultaneous callers of
//! the same method share one round trip.

mod batcher;
mod ledger;
mod pool;
mod transport;

pub use batcher::Batcher;
pub use ledger::{LedgerClient, SignatureInfo, SignatureStatus};
pub use pool::{ConnectionLease, ConnectionPool, ConnectionStats, GatewayStats};
pub use transport::{into_result, ConnectionFactory, HttpConnectionFactory, HttpTransport, RpcTransport};

use crate::config::RpcConfig;
use crate::error::TransportError;
use crate::metrics::MetricsState;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ledger client backed by the connection pool and the batcher
pub struct ResourceGateway {
    pool: Arc<ConnectionPool>,
    batcher: Batcher,
    cancel: CancellationToken,
    flush_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ResourceGateway {
    /// Build the pool and spawn the batch flush task
    pub fn new(
        config: &RpcConfig,
        factory: Arc<dyn ConnectionFactory>,
        metrics: Arc<MetricsState>,
    ) -> Result<Self, TransportError> {
        let pool = Arc::new(ConnectionPool::new(
            config.endpoints(),
            config.pool_size,
            Duration::from_millis(config.failure_cooldown_ms),
            factory,
            metrics.clone(),
        )?);

        let cancel = CancellationToken::new();
        let (batcher, flush_task) = Batcher::spawn(
            pool.clone(),
            Duration::from_millis(config.batch_window_ms),
            config.max_batch_size,
            metrics,
            cancel.clone(),
        );

        Ok(Self {
            pool,
            batcher,
            cancel,
            flush_task: parking_lot::Mutex::new(Some(flush_task)),
        })
    }

    /// HTTP gateway for the configured endpoints
    pub fn http(config: &RpcConfig, metrics: Arc<MetricsState>) -> Result<Self, TransportError> {
        let factory = Arc::new(HttpConnectionFactory::new(Duration::from_millis(config.timeout_ms)));
        Self::new(config, factory, metrics)
    }

    pub fn stats(&self) -> GatewayStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Batched JSON-RPC call
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.batcher.call(method, params).await
    }

    /// Unbatched JSON-RPC call on a directly acquired connection
    pub async fn call_direct(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        into_result(self.pool.request(method, &body).await?)
    }

    /// Stop the flush task; pending calls fail with `Closed`
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.flush_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Resource gateway stopped");
    }
}

impl Drop for ResourceGateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl LedgerClient for ResourceGateway {
    async fn recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, TransportError> {
        let result = self
            .call(
                "getSignaturesForAddress",
                json!([address, {"limit": limit, "commitment": "confirmed"}]),
            )
            .await?;
        ledger::parse_signatures(result)
    }

    async fn transaction(&self, signature: &str) -> Result<Option<Value>, TransportError> {
        let result = self
            .call(
                "getTransaction",
                json!([signature, {
                    "encoding": "jsonParsed",
                    "commitment": "confirmed",
                    "maxSupportedTransactionVersion": 0
                }]),
            )
            .await?;
        Ok((!result.is_null()).then_some(result))
    }

    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransportError> {
        let result = self
            .call(
                "getSignatureStatuses",
                json!([[signature], {"searchTransactionHistory": true}]),
            )
            .await?;
        ledger::parse_signature_status(result)
    }

    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, TransportError> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([owner, {"mint": mint}, {"encoding": "jsonParsed", "commitment": "confirmed"}]),
            )
            .await?;
        ledger::parse_token_accounts_balance(result)
    }

    async fn native_balance(&self, owner: &str) -> Result<u64, TransportError> {
        let result = self
            .call("getBalance", json!([owner, {"commitment": "confirmed"}]))
            .await?;
        result
            .get("value")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::Decode("balance response without value".to_string()))
    }

    async fn mint_decimals(&self, mint: &str) -> Result<u8, TransportError> {
        let result = self.call("getTokenSupply", json!([mint])).await?;
        result
            .pointer("/value/decimals")
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| TransportError::Decode("token supply response without decimals".to_string()))
    }

    async fn send_transaction(&self, signed: &[u8]) -> Result<String, TransportError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(signed);
        let result = self
            .call_direct(
                "sendTransaction",
                json!([encoded, {
                    "encoding": "base64",
                    "skipPreflight": false,
                    "preflightCommitment": "confirmed",
                    "maxRetries": 3
                }]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransportError::Decode("sendTransaction returned no signature".to_string()))
    }
}

//! JSON-RPC transports
//!
//! A transport is one live connection to one ledger endpoint. The pool owns a
//! fixed set of them and asks the factory for temporary ones on exhaustion.

use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One connection to a ledger endpoint
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Endpoint URL this transport talks to
    fn endpoint(&self) -> &str;

    /// POST a JSON-RPC body (single request or batch array) and return the parsed response
    async fn post(&self, body: &Value) -> Result<Value, TransportError>;
}

/// Creates transports for the pool
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcTransport>, TransportError>;
}

/// HTTP transport backed by its own reqwest client
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Decode(e.to_string())
            }
        })
    }
}

/// Factory producing [`HttpTransport`]s with a shared timeout
pub struct HttpConnectionFactory {
    timeout: Duration,
}

impl HttpConnectionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RpcTransport>, TransportError> {
        Ok(Arc::new(HttpTransport::new(endpoint, self.timeout)?))
    }
}

/// Extract `result` from a single JSON-RPC response object
pub fn into_result(response: Value) -> Result<Value, TransportError> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        return Err(TransportError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    match response {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| TransportError::Decode("response has neither result nor error".to_string())),
        other => Err(TransportError::Decode(format!("unexpected response: {}", other))),
    }
}

//! Push channel transport
//!
//! One subscription per watched address. Notifications carry the full
//! transaction with metadata so the monitor classifies without a fetch.

use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

/// No frame at all for this long means the socket is dead
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Transaction pushed for a watched address
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub signature: String,
    pub slot: u64,
    /// `{transaction, meta}` as returned by `getTransaction`
    pub transaction: Value,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn subscribe(&self, address: &str) -> Result<Box<dyn StreamSubscription>, TransportError>;
}

#[async_trait]
pub trait StreamSubscription: Send {
    /// Next pushed transaction, `None` when the server ends the stream
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, TransportError>;
}

/// `transactionSubscribe` over a websocket
pub struct WebSocketTransport {
    ws_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn subscribe(&self, address: &str) -> Result<Box<dyn StreamSubscription>, TransportError> {
        let (mut ws, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", self.ws_url, e)))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "transactionSubscribe",
            "params": [
                { "accountInclude": [address], "failed": false },
                {
                    "commitment": "confirmed",
                    "encoding": "jsonParsed",
                    "transactionDetails": "full",
                    "maxSupportedTransactionVersion": 0
                }
            ]
        });
        ws.send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| TransportError::Connect(format!("subscribe failed: {}", e)))?;

        tracing::debug!(address = %address, "Push subscription sent");

        Ok(Box::new(WebSocketSubscription { ws }))
    }
}

struct WebSocketSubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamSubscription for WebSocketSubscription {
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, TransportError> {
        loop {
            let frame = tokio::time::timeout(IDLE_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| TransportError::Timeout)?;

            match frame {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    if let Some(message) = parse_frame(text.as_ref())? {
                        return Ok(Some(message));
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| TransportError::Connect(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Push stream closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Decode one text frame. Undecodable frames are logged and skipped; only a
/// server error ends the subscription.
pub(crate) fn parse_frame(text: &str) -> Result<Option<StreamMessage>, TransportError> {
    let parsed = serde_json::from_str::<Value>(text)
        .map_err(|e| TransportError::Decode(e.to_string()))
        .and_then(|value| parse_notification(&value));

    match parsed {
        Err(TransportError::Decode(reason)) => {
            tracing::warn!(error = %reason, "Skipping undecodable push frame");
            Ok(None)
        }
        other => other,
    }
}

/// Extract a transaction notification; other frames yield `None`
pub(crate) fn parse_notification(value: &Value) -> Result<Option<StreamMessage>, TransportError> {
    if let Some(error) = value.get("error") {
        return Err(TransportError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subscription error")
                .to_string(),
        });
    }

    if value.get("method").and_then(Value::as_str) != Some("transactionNotification") {
        return Ok(None);
    }

    let result = value
        .pointer("/params/result")
        .ok_or_else(|| TransportError::Decode("notification without result".to_string()))?;
    let signature = result
        .get("signature")
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::Decode("notification without signature".to_string()))?;

    Ok(Some(StreamMessage {
        signature: signature.to_string(),
        slot: result.get("slot").and_then(Value::as_u64).unwrap_or_default(),
        transaction: result.get("transaction").cloned().unwrap_or(Value::Null),
    }))
}

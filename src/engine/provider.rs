//! Execution provider capability
//!
//! A provider quotes a swap and builds the unsigned transaction for it.
//! Signing and submission go through the engine so every provider is
//! verified the same way.

use crate::error::ProviderError;
use crate::models::Quote;
use async_trait::async_trait;
use serde_json::Value;

/// Quote parameters in raw units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub slippage_bps: u32,
}

#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Stable identifier used for breakers, metrics and attempt records
    fn id(&self) -> &str;

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ProviderError>;

    /// Serialized unsigned transaction executing `quote` for `user_public_key`
    async fn build_swap(&self, quote: &Quote, user_public_key: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Amounts arrive as decimal strings in provider payloads
pub(crate) fn u64_field(value: &Value, field: &str) -> Result<u64, ProviderError> {
    match value.get(field) {
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|e| ProviderError::Api(format!("invalid {}: {}", field, e))),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ProviderError::Api(format!("invalid {}: {}", field, n))),
        _ => Err(ProviderError::Api(format!("missing {}", field))),
    }
}

pub(crate) fn f64_field(value: &Value, field: &str) -> Option<f64> {
    match value.get(field)? {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub(crate) fn decode_transaction(encoded: &str) -> Result<Vec<u8>, ProviderError> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ProviderError::Api(format!("invalid transaction encoding: {}", e)))?;
    if bytes.is_empty() {
        return Err(ProviderError::Api("empty transaction".to_string()));
    }
    Ok(bytes)
}

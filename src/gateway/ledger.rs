//! Ledger read/write capability used by the monitor and the engine

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Entry of an address's signature history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    /// Transaction landed with an on-chain error
    pub failed: bool,
    pub block_time: Option<i64>,
}

/// Confirmation status of a submitted transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Reached at least `confirmed` commitment
    pub confirmed: bool,
    /// On-chain error, if the transaction failed
    pub err: Option<String>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Most recent signatures for an address, newest first
    async fn recent_signatures(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, TransportError>;

    /// Full parsed transaction, `None` while not yet visible
    async fn transaction(&self, signature: &str) -> Result<Option<Value>, TransportError>;

    /// Status of a signature, `None` when the ledger does not know it
    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransportError>;

    /// Raw token balance of `owner` for `mint`, summed over its token accounts
    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, TransportError>;

    /// Native balance in lamports
    async fn native_balance(&self, owner: &str) -> Result<u64, TransportError>;

    async fn mint_decimals(&self, mint: &str) -> Result<u8, TransportError>;

    /// Submit a signed, serialized transaction and return its signature
    async fn send_transaction(&self, signed: &[u8]) -> Result<String, TransportError>;
}

pub(crate) fn parse_signatures(result: Value) -> Result<Vec<SignatureInfo>, TransportError> {
    let entries = result
        .as_array()
        .ok_or_else(|| TransportError::Decode("signature list is not an array".to_string()))?;

    entries
        .iter()
        .map(|entry| {
            let signature = entry
                .get("signature")
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::Decode("signature entry without signature".to_string()))?;
            Ok(SignatureInfo {
                signature: signature.to_string(),
                slot: entry.get("slot").and_then(Value::as_u64).unwrap_or_default(),
                failed: entry.get("err").map(|e| !e.is_null()).unwrap_or(false),
                block_time: entry.get("blockTime").and_then(Value::as_i64),
            })
        })
        .collect()
}

pub(crate) fn parse_signature_status(result: Value) -> Result<Option<SignatureStatus>, TransportError> {
    let entry = result
        .get("value")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or(Value::Null);

    if entry.is_null() {
        return Ok(None);
    }

    let confirmed = matches!(
        entry.get("confirmationStatus").and_then(Value::as_str),
        Some("confirmed") | Some("finalized")
    ) || entry.get("confirmations").map(Value::is_null).unwrap_or(false);

    let err = entry
        .get("err")
        .filter(|e| !e.is_null())
        .map(|e| e.to_string());

    Ok(Some(SignatureStatus {
        slot: entry.get("slot").and_then(Value::as_u64).unwrap_or_default(),
        confirmed,
        err,
    }))
}

pub(crate) fn parse_token_accounts_balance(result: Value) -> Result<u64, TransportError> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::Decode("token accounts response without value".to_string()))?;

    let mut total: u64 = 0;
    for account in accounts {
        let amount = account
            .pointer("/account/data/parsed/info/tokenAmount/amount")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Decode("token account without parsed amount".to_string()))?
            .parse::<u64>()
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        total = total.saturating_add(amount);
    }
    Ok(total)
}

//! Balance-delta classification of transactions on a watched address
//!
//! Works on the `{transaction, meta}` shape returned by `getTransaction`
//! and carried inside push notifications. Native lamports are folded into
//! the wrapped SOL mint so a swap paid from either counts the same.

use crate::constants::{mints, SOL_DECIMALS};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed balance entry: {0}")]
    MalformedBalance(String),
}

/// Token acquired in exchange for a base asset
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub acquired_mint: String,
    pub acquired_amount: Decimal,
    pub paid_mint: String,
    pub paid_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Acquisition(Acquisition),
    /// Non-base token left the address
    Disposal { mint: String, amount: Decimal },
    /// Non-base token arrived without a base asset leaving
    Transfer { mint: String, amount: Decimal },
    /// No net movement of a non-base token
    Neutral,
    /// Landed with an on-chain error
    Failed { reason: String },
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Acquisition(_) => "acquisition",
            Classification::Disposal { .. } => "disposal",
            Classification::Transfer { .. } => "transfer",
            Classification::Neutral => "neutral",
            Classification::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct MintDelta {
    raw: i128,
    decimals: u8,
}

impl MintDelta {
    /// Signed change in UI units
    fn ui(&self, mint: &str) -> Result<Decimal, ClassifyError> {
        Decimal::try_from_i128_with_scale(self.raw, self.decimals as u32).map_err(|_| {
            ClassifyError::MalformedBalance(format!(
                "{} raw {} with {} decimals is out of range",
                mint, self.raw, self.decimals
            ))
        })
    }
}

/// Classify one transaction from the point of view of `address`
pub fn classify(
    tx: &Value,
    address: &str,
    base_mints: &HashSet<String>,
) -> Result<Classification, ClassifyError> {
    let meta = tx.get("meta").ok_or(ClassifyError::MissingField("meta"))?;

    if let Some(err) = meta.get("err").filter(|e| !e.is_null()) {
        return Ok(Classification::Failed {
            reason: err.to_string(),
        });
    }

    let mut deltas = token_deltas(meta, address)?;

    let native = native_delta(tx, meta, address)?;
    if native != 0 {
        let entry = deltas.entry(mints::SOL.to_string()).or_insert(MintDelta {
            raw: 0,
            decimals: SOL_DECIMALS,
        });
        entry.raw += native;
    }

    let changes = deltas
        .iter()
        .map(|(mint, delta)| delta.ui(mint).map(|ui| (mint.as_str(), ui)))
        .collect::<Result<Vec<_>, _>>()?;

    let is_base = |mint: &str| base_mints.contains(mint) || mint == mints::SOL;

    let acquired = changes
        .iter()
        .filter(|(mint, ui)| !is_base(mint) && ui.is_sign_positive() && !ui.is_zero())
        .max_by(|a, b| a.1.cmp(&b.1));
    let paid = changes
        .iter()
        .filter(|(mint, ui)| is_base(mint) && ui.is_sign_negative() && !ui.is_zero())
        .min_by(|a, b| a.1.cmp(&b.1));

    let classification = match (acquired, paid) {
        (Some((acquired_mint, acquired)), Some((paid_mint, paid))) => {
            Classification::Acquisition(Acquisition {
                acquired_mint: acquired_mint.to_string(),
                acquired_amount: *acquired,
                paid_mint: paid_mint.to_string(),
                paid_amount: paid.abs(),
            })
        }
        (Some((mint, ui)), None) => Classification::Transfer {
            mint: mint.to_string(),
            amount: *ui,
        },
        (None, _) => match changes
            .iter()
            .find(|(mint, ui)| !is_base(mint) && ui.is_sign_negative() && !ui.is_zero())
        {
            Some((mint, ui)) => Classification::Disposal {
                mint: mint.to_string(),
                amount: ui.abs(),
            },
            None => Classification::Neutral,
        },
    };

    Ok(classification)
}

/// First signature of the transaction
pub fn signature_of(tx: &Value) -> Option<&str> {
    tx.pointer("/transaction/signatures/0").and_then(Value::as_str)
}

/// Post minus pre token balance per mint for accounts owned by `address`
fn token_deltas(meta: &Value, address: &str) -> Result<BTreeMap<String, MintDelta>, ClassifyError> {
    let mut deltas: BTreeMap<String, MintDelta> = BTreeMap::new();

    for (field, sign) in [("preTokenBalances", -1i128), ("postTokenBalances", 1i128)] {
        let Some(entries) = meta.get(field).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            if entry.get("owner").and_then(Value::as_str) != Some(address) {
                continue;
            }
            let mint = entry
                .get("mint")
                .and_then(Value::as_str)
                .ok_or_else(|| ClassifyError::MalformedBalance(format!("{} entry without mint", field)))?;
            let amount = entry
                .pointer("/uiTokenAmount/amount")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i128>().ok())
                .ok_or_else(|| ClassifyError::MalformedBalance(format!("{} amount for {}", field, mint)))?;
            let decimals = entry
                .pointer("/uiTokenAmount/decimals")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            let decimals = u8::try_from(decimals)
                .map_err(|_| ClassifyError::MalformedBalance(format!("{} decimals {} for {}", field, decimals, mint)))?;

            let delta = deltas.entry(mint.to_string()).or_default();
            delta.raw += sign * amount;
            delta.decimals = decimals;
        }
    }

    Ok(deltas)
}

/// Lamport change of `address`, with the fee added back when it paid it
fn native_delta(tx: &Value, meta: &Value, address: &str) -> Result<i128, ClassifyError> {
    let keys = account_keys(tx, meta);
    let Some(index) = keys.iter().position(|k| *k == address) else {
        return Ok(0);
    };

    let balance_at = |field: &'static str| -> Result<i128, ClassifyError> {
        meta.get(field)
            .and_then(Value::as_array)
            .and_then(|balances| balances.get(index))
            .and_then(Value::as_u64)
            .map(i128::from)
            .ok_or(ClassifyError::MissingField(field))
    };

    let mut delta = balance_at("postBalances")? - balance_at("preBalances")?;
    if index == 0 {
        delta += meta.get("fee").and_then(Value::as_u64).unwrap_or_default() as i128;
    }
    Ok(delta)
}

/// Account keys in index order, including addresses loaded from lookup tables
fn account_keys<'a>(tx: &'a Value, meta: &'a Value) -> Vec<&'a str> {
    let Some(keys) = tx
        .pointer("/transaction/message/accountKeys")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    // jsonParsed encoding already lists loaded addresses as objects
    let parsed = keys.first().map(Value::is_object).unwrap_or(false);
    let mut out: Vec<&str> = keys
        .iter()
        .filter_map(|k| k.as_str().or_else(|| k.get("pubkey").and_then(Value::as_str)))
        .collect();

    if !parsed {
        for group in ["writable", "readonly"] {
            if let Some(loaded) = meta
                .pointer(&format!("/loadedAddresses/{}", group))
                .and_then(Value::as_array)
            {
                out.extend(loaded.iter().filter_map(Value::as_str));
            }
        }
    }

    out
}

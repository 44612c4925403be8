//! Post-submission verification against the ledger

use crate::gateway::LedgerClient;
use serde_json::Value;
use std::time::Duration;

/// Balance reads after confirmation before declaring a mismatch
const BALANCE_CHECK_ATTEMPTS: u32 = 3;

/// Result of polling a signature
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Confirmed { slot: u64 },
    /// Landed with an on-chain error
    Failed { reason: String },
    /// Not confirmed within the poll budget
    TimedOut,
}

/// Poll the signature status until confirmed, failed, or out of polls
///
/// Transport errors consume a poll and are otherwise ignored.
pub async fn await_confirmation(
    ledger: &dyn LedgerClient,
    signature: &str,
    poll_interval: Duration,
    max_polls: u32,
) -> Confirmation {
    for poll in 1..=max_polls {
        match ledger.signature_status(signature).await {
            Ok(Some(status)) => {
                if let Some(reason) = status.err {
                    return Confirmation::Failed { reason };
                }
                if status.confirmed {
                    tracing::debug!(signature = %signature, slot = status.slot, poll, "Transaction confirmed");
                    return Confirmation::Confirmed { slot: status.slot };
                }
            }
            Ok(None) => {
                tracing::trace!(signature = %signature, poll, "Transaction not yet visible");
            }
            Err(e) => {
                tracing::warn!(signature = %signature, poll, error = %e, "Status poll failed");
            }
        }

        if poll < max_polls {
            tokio::time::sleep(poll_interval).await;
        }
    }

    Confirmation::TimedOut
}

/// Raw amount by which `owner`'s balance of `mint` rose above `pre_balance`
///
/// `None` when no increase is visible after a few reads.
pub async fn balance_increase(
    ledger: &dyn LedgerClient,
    owner: &str,
    mint: &str,
    pre_balance: u64,
    retry_interval: Duration,
) -> Option<u64> {
    for attempt in 1..=BALANCE_CHECK_ATTEMPTS {
        match ledger.token_balance(owner, mint).await {
            Ok(post) if post > pre_balance => return Some(post - pre_balance),
            Ok(post) => {
                tracing::debug!(owner = %owner, mint = %mint, pre_balance, post, attempt, "No balance increase yet");
            }
            Err(e) => {
                tracing::warn!(owner = %owner, mint = %mint, attempt, error = %e, "Balance check failed");
            }
        }

        if attempt < BALANCE_CHECK_ATTEMPTS {
            tokio::time::sleep(retry_interval).await;
        }
    }

    None
}

/// Network fee in lamports from the confirmed transaction, best effort
pub async fn network_fee(ledger: &dyn LedgerClient, signature: &str) -> Option<u64> {
    match ledger.transaction(signature).await {
        Ok(Some(tx)) => tx.pointer("/meta/fee").and_then(Value::as_u64),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(signature = %signature, error = %e, "Could not fetch fee");
            None
        }
    }
}

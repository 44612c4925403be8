//! Watched wallets and the purchase events observed on them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// External address monitored on behalf of one owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedWallet {
    pub address: String,
    pub owner_id: String,
    /// Deactivated wallets keep their record but run no monitor
    pub active: bool,
    pub last_activity_time: Option<DateTime<Utc>>,
}

impl WatchedWallet {
    pub fn new(address: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            owner_id: owner_id.into(),
            active: true,
            last_activity_time: None,
        }
    }
}

/// Channel a transaction was first observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationChannel {
    Push,
    Poll,
    /// Catch-up fetch after the push channel reconnected
    Reconciled,
}

impl ObservationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationChannel::Push => "push",
            ObservationChannel::Poll => "poll",
            ObservationChannel::Reconciled => "reconciled",
        }
    }
}

impl std::fmt::Display for ObservationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token acquisition detected on a watched address
///
/// Immutable once emitted. `source_signature` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub source_signature: String,
    pub wallet_address: String,
    pub acquired_mint: String,
    /// UI units of the acquired token
    pub acquired_amount: Decimal,
    pub paid_mint: String,
    /// UI units of the base asset paid
    pub paid_amount: Decimal,
    /// Slot the transaction landed in, used for delivery order
    pub slot: u64,
    pub observed_at: DateTime<Utc>,
    pub channel: ObservationChannel,
}

//! Order models - intents, their status machine and execution attempts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Spend the base asset to acquire the token
    Buy,
    /// Sell the token for the base asset
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Unknown order side: {}", s)),
        }
    }
}

/// How much of the input asset an order spends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OrderAmount {
    /// Fixed amount of the input asset in UI units (SOL for buys, tokens for sells)
    Exact(Decimal),
    /// Percentage (0, 100] of the owner's current input-asset balance
    PercentOfBalance(Decimal),
}

impl OrderAmount {
    /// The numeric value regardless of kind
    pub fn value(&self) -> Decimal {
        match self {
            OrderAmount::Exact(v) | OrderAmount::PercentOfBalance(v) => *v,
        }
    }
}

impl std::fmt::Display for OrderAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAmount::Exact(v) => write!(f, "{}", v),
            OrderAmount::PercentOfBalance(v) => write!(f, "{}%", v),
        }
    }
}

/// A request to buy or sell a token for one owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Owning user (foreign key into the external user record)
    pub owner_id: String,
    /// Token mint being bought or sold
    pub token_address: String,
    pub side: OrderSide,
    pub amount: OrderAmount,
    /// Slippage bound in basis points
    pub max_slippage_bps: u32,
    /// Source signature when the intent was derived from a purchase event
    pub originating_event_id: Option<String>,
}

impl OrderIntent {
    pub fn buy(owner_id: impl Into<String>, token: impl Into<String>, sol: Decimal, slippage_bps: u32) -> Self {
        Self {
            owner_id: owner_id.into(),
            token_address: token.into(),
            side: OrderSide::Buy,
            amount: OrderAmount::Exact(sol),
            max_slippage_bps: slippage_bps,
            originating_event_id: None,
        }
    }

    pub fn sell(owner_id: impl Into<String>, token: impl Into<String>, amount: OrderAmount, slippage_bps: u32) -> Self {
        Self {
            owner_id: owner_id.into(),
            token_address: token.into(),
            side: OrderSide::Sell,
            amount,
            max_slippage_bps: slippage_bps,
            originating_event_id: None,
        }
    }
}

/// Order status representing the state machine
///
/// State transitions:
/// ```text
/// CREATED -> QUOTING -> READY -> SUBMITTING -> VERIFYING -> CONFIRMED
///               ^          |          |            |
///               +----------+          v            v
///            (quote expired, or     FAILED <-------+
///             next provider)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Intent accepted, nothing contacted yet
    Created,
    /// Requesting a quote from a provider
    Quoting,
    /// Quote in hand, awaiting submission
    Ready,
    /// Signed transaction in flight to the network
    Submitting,
    /// Polling the ledger for confirmation
    Verifying,
    /// Confirmed and verified
    Confirmed,
    /// All providers exhausted or verification mismatch
    Failed,
}

impl OrderStatus {
    /// Check if transition to new status is valid
    pub fn can_transition_to(&self, new_status: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, new_status),
            // Forward flow
            (Created, Quoting)
                | (Quoting, Ready)
                | (Ready, Submitting)
                | (Submitting, Verifying)
                | (Verifying, Confirmed)
                // Quote expired before submission
                | (Ready, Quoting)
                // Provider failure, next provider
                | (Quoting, Quoting)
                | (Submitting, Quoting)
                | (Verifying, Quoting)
                // Exhaustion
                | (Created, Failed)
                | (Quoting, Failed)
                | (Ready, Failed)
                | (Submitting, Failed)
                | (Verifying, Failed)
        )
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Created => write!(f, "created"),
            OrderStatus::Quoting => write!(f, "quoting"),
            OrderStatus::Ready => write!(f, "ready"),
            OrderStatus::Submitting => write!(f, "submitting"),
            OrderStatus::Verifying => write!(f, "verifying"),
            OrderStatus::Confirmed => write!(f, "confirmed"),
            OrderStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(OrderStatus::Created),
            "quoting" => Ok(OrderStatus::Quoting),
            "ready" => Ok(OrderStatus::Ready),
            "submitting" => Ok(OrderStatus::Submitting),
            "verifying" => Ok(OrderStatus::Verifying),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "failed" => Ok(OrderStatus::Failed),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// A provider quote for one swap
#[derive(Debug, Clone)]
pub struct Quote {
    pub provider: String,
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in raw units
    pub in_amount: u64,
    /// Expected output in raw units
    pub out_amount: u64,
    /// Minimum output after slippage
    pub min_out_amount: u64,
    pub price_impact_pct: f64,
    /// Platform fee charged by the provider, in output raw units
    pub platform_fee: u64,
    pub slippage_bps: u32,
    pub expires_at: Instant,
    /// Provider payload echoed back when building the transaction
    pub raw: Value,
}

impl Quote {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Confirmed,
    Rejected,
    TimedOut,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Pending => write!(f, "pending"),
            AttemptOutcome::Confirmed => write!(f, "confirmed"),
            AttemptOutcome::Rejected => write!(f, "rejected"),
            AttemptOutcome::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One provider's attempt at an order
///
/// Built as pending while in flight and appended to the order's history only
/// once settled; settled attempts are never edited.
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    pub order_id: String,
    pub provider: String,
    pub quote: Option<Quote>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    pub outcome: AttemptOutcome,
    /// Failure reason for rejected and timed-out attempts
    pub detail: Option<String>,
}

impl ExecutionAttempt {
    pub fn pending(order_id: &str, provider: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            provider: provider.to_string(),
            quote: None,
            submitted_at: None,
            signature: None,
            outcome: AttemptOutcome::Pending,
            detail: None,
        }
    }

    /// Settle the attempt, consuming the in-flight value
    pub fn settle(mut self, outcome: AttemptOutcome, detail: Option<String>) -> Self {
        self.outcome = outcome;
        self.detail = detail;
        self
    }
}

/// Last failed order of an owner, kept for one-touch retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOrderRecord {
    pub owner_id: String,
    pub token_address: String,
    pub side: OrderSide,
    pub amount: OrderAmount,
    pub max_slippage_bps: u32,
    /// Human-readable cause surfaced to the owner
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedOrderRecord {
    pub fn from_intent(intent: &OrderIntent, reason: String) -> Self {
        Self {
            owner_id: intent.owner_id.clone(),
            token_address: intent.token_address.clone(),
            side: intent.side,
            amount: intent.amount,
            max_slippage_bps: intent.max_slippage_bps,
            reason,
            failed_at: Utc::now(),
        }
    }

    /// Rebuild a fresh intent for retry
    pub fn to_intent(&self) -> OrderIntent {
        OrderIntent {
            owner_id: self.owner_id.clone(),
            token_address: self.token_address.clone(),
            side: self.side,
            amount: self.amount,
            max_slippage_bps: self.max_slippage_bps,
            originating_event_id: None,
        }
    }
}

/// Successful execution result
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReceipt {
    pub order_id: String,
    pub provider: String,
    pub signature: String,
    /// Base asset per token
    pub realized_price: Decimal,
    /// Provider platform fee in output-asset UI units
    pub platform_fee: Decimal,
    /// Network fee in SOL
    pub network_fee: Decimal,
    pub price_impact_pct: f64,
    /// Tokens received (buy) or base asset received (sell), UI units
    pub out_amount: Decimal,
}

//! Order execution engine
//!
//! Runs an intent against the primary provider, then the secondary on
//! failure. Executions for one owner are serialized; different owners run
//! concurrently. Every attempt outcome feeds the provider breakers.

use super::provider::{ExecutionProvider, QuoteRequest};
use super::retry_cache::FailedOrderCache;
use super::signer::TransactionSigner;
use super::verification::{self, Confirmation};
use crate::circuit_breaker::ProviderBreakers;
use crate::config::ExecutionConfig;
use crate::constants::{mints, MAX_DECIMALS, SOL_DECIMALS};
use crate::db::{self, DbPool};
use crate::error::{
    AggregatedExecutionFailure, ExecutionError, ProviderError, ProviderFailure, TransportError,
};
use crate::gateway::LedgerClient;
use crate::metrics::MetricsState;
use crate::models::{
    AttemptOutcome, ExecutionAttempt, ExecutionReceipt, FailedOrderRecord, OrderAmount,
    OrderIntent, OrderSide, OrderStatus, Quote,
};
use crate::notifications::{CompositeNotifier, NotificationEvent, OrderOutcome};
use crate::utils::{raw_to_ui, ui_to_raw};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// Orders kept for introspection
const ORDER_HISTORY_CAPACITY: usize = 4096;

/// Status and attempt history of one order
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub intent: OrderIntent,
    pub status: OrderStatus,
    /// Settled attempts in execution order
    pub attempts: Vec<ExecutionAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    fn new(order_id: &str, intent: &OrderIntent) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.to_string(),
            intent: intent.clone(),
            status: OrderStatus::Created,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new status with validation
    pub fn transition_to(&mut self, new_status: OrderStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Invalid state transition: {} -> {}",
                self.status, new_status
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Intent resolved to raw units for the signing wallet
struct ResolvedOrder {
    request: QuoteRequest,
    wallet: String,
    side: OrderSide,
    token_decimals: u8,
    /// Price impact ceiling in percent
    impact_limit_pct: f64,
}

enum AttemptResult {
    Confirmed(ExecutionReceipt),
    Mismatch { signature: String },
    Failed(ProviderError),
}

pub struct OrderEngine {
    config: ExecutionConfig,
    /// Primary first, then secondary
    providers: Vec<Arc<dyn ExecutionProvider>>,
    ledger: Arc<dyn LedgerClient>,
    breakers: Arc<ProviderBreakers>,
    failed_orders: FailedOrderCache,
    owner_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    orders: Mutex<LruCache<String, OrderRecord>>,
    metrics: Arc<MetricsState>,
    notifier: Option<Arc<CompositeNotifier>>,
    db: Option<DbPool>,
}

impl OrderEngine {
    pub fn new(
        config: ExecutionConfig,
        primary: Arc<dyn ExecutionProvider>,
        secondary: Arc<dyn ExecutionProvider>,
        ledger: Arc<dyn LedgerClient>,
        breakers: Arc<ProviderBreakers>,
        metrics: Arc<MetricsState>,
    ) -> Self {
        let failed_orders = FailedOrderCache::new(Duration::from_secs(config.failed_order_ttl_secs));
        let capacity = NonZeroUsize::new(ORDER_HISTORY_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Self {
            config,
            providers: vec![primary, secondary],
            ledger,
            breakers,
            failed_orders,
            owner_locks: Mutex::new(HashMap::new()),
            orders: Mutex::new(LruCache::new(capacity)),
            metrics,
            notifier: None,
            db: None,
        }
    }

    /// Persist orders and attempts through the storage collaborator
    pub fn with_db(mut self, db: DbPool) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<CompositeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn breakers(&self) -> &Arc<ProviderBreakers> {
        &self.breakers
    }

    /// Reject malformed intents before any provider is contacted
    pub fn validate(&self, intent: &OrderIntent) -> Result<(), ExecutionError> {
        if intent.owner_id.trim().is_empty() {
            return Err(ExecutionError::Validation("owner id is empty".to_string()));
        }

        let amount = intent.amount.value();
        if amount <= Decimal::ZERO {
            return Err(ExecutionError::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if let OrderAmount::PercentOfBalance(pct) = intent.amount {
            if pct > Decimal::ONE_HUNDRED {
                return Err(ExecutionError::Validation(format!(
                    "percent of balance must be at most 100, got {}",
                    pct
                )));
            }
        }

        if Pubkey::from_str(&intent.token_address).is_err() {
            return Err(ExecutionError::Validation(format!(
                "invalid token address: {}",
                intent.token_address
            )));
        }
        if intent.token_address == mints::SOL {
            return Err(ExecutionError::Validation(
                "token must differ from the base asset".to_string(),
            ));
        }

        if intent.max_slippage_bps == 0 || intent.max_slippage_bps > self.config.max_slippage_bps {
            return Err(ExecutionError::Validation(format!(
                "max slippage {} bps outside 1..={}",
                intent.max_slippage_bps, self.config.max_slippage_bps
            )));
        }

        Ok(())
    }

    /// Execute an intent and return the verified result
    ///
    /// A second intent for the same owner waits until the first completes.
    pub async fn submit_order(
        &self,
        intent: OrderIntent,
        signer: &dyn TransactionSigner,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        self.validate(&intent)?;

        let order_id = Uuid::new_v4().to_string();
        self.track_order(&order_id, &intent).await;

        let owner_lock = self.owner_lock(&intent.owner_id);
        let result = {
            let _guard = owner_lock.lock().await;
            tracing::info!(
                order_id = %order_id,
                owner = %intent.owner_id,
                token = %intent.token_address,
                side = %intent.side,
                amount = %intent.amount,
                "Executing order"
            );
            let result = self.execute(&order_id, &intent, signer).await;
            self.finish(&order_id, &intent, &result).await;
            result
        };
        drop(owner_lock);
        self.release_owner_lock(&intent.owner_id);

        result
    }

    /// Replay the owner's last failed order as a fresh intent
    pub async fn retry_last_failed(
        &self,
        owner_id: &str,
        signer: &dyn TransactionSigner,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let record = self.failed_orders.take(owner_id).ok_or_else(|| {
            ExecutionError::Validation(format!("no recent failed order for {}", owner_id))
        })?;

        tracing::info!(owner = %owner_id, token = %record.token_address, "Retrying last failed order");
        self.submit_order(record.to_intent(), signer).await
    }

    pub fn get_last_failed_order(&self, owner_id: &str) -> Option<FailedOrderRecord> {
        self.failed_orders.get_last_failed(owner_id)
    }

    pub fn has_recent_failed_order(&self, owner_id: &str) -> bool {
        self.failed_orders.has_recent(owner_id)
    }

    pub fn prune_failed_orders(&self) -> usize {
        self.failed_orders.prune_expired()
    }

    /// Status and attempts of a recent order
    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.lock().peek(order_id).cloned()
    }

    /// Owners with an execution running or queued
    pub fn busy_owners(&self) -> usize {
        self.owner_locks.lock().len()
    }

    async fn execute(
        &self,
        order_id: &str,
        intent: &OrderIntent,
        signer: &dyn TransactionSigner,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let resolved = self.resolve(intent, signer).await?;

        // Least-recently-opened provider is tried when every breaker is open
        let open: Vec<bool> = self
            .providers
            .iter()
            .map(|p| {
                let open = self.breakers.is_open(p.id());
                self.metrics
                    .provider_breaker_open
                    .with_label_values(&[p.id()])
                    .set(open as i64);
                open
            })
            .collect();
        let forced = if open.iter().all(|o| *o) {
            let chosen = self
                .providers
                .iter()
                .min_by_key(|p| self.breakers.opened_at(p.id()))
                .map(|p| p.id().to_string());
            tracing::warn!(
                order_id = %order_id,
                provider = ?chosen,
                "All provider breakers open, trying least recently opened"
            );
            chosen
        } else {
            None
        };

        let mut failures = Vec::new();
        for (provider, is_open) in self.providers.iter().zip(open) {
            let skip = match &forced {
                Some(chosen) => chosen != provider.id(),
                None => is_open,
            };
            if skip {
                tracing::debug!(order_id = %order_id, provider = %provider.id(), "Skipping provider with open breaker");
                failures.push(ProviderFailure {
                    provider: provider.id().to_string(),
                    reason: ProviderError::CircuitOpen.to_string(),
                });
                continue;
            }

            let (attempt, result) = self.attempt(order_id, provider.as_ref(), &resolved, signer).await;
            self.append_attempt(attempt).await;

            match result {
                AttemptResult::Confirmed(receipt) => {
                    self.provider_succeeded(provider.id());
                    self.set_status(order_id, OrderStatus::Confirmed);
                    return Ok(receipt);
                }
                AttemptResult::Mismatch { signature } => {
                    self.provider_failed(provider.id(), "confirmed without balance change");
                    self.set_status(order_id, OrderStatus::Failed);
                    return Err(ExecutionError::VerificationMismatch {
                        provider: provider.id().to_string(),
                        signature,
                    });
                }
                AttemptResult::Failed(error) => {
                    tracing::warn!(
                        order_id = %order_id,
                        provider = %provider.id(),
                        error = %error,
                        "Provider attempt failed"
                    );
                    if error.counts_against_provider() {
                        self.provider_failed(provider.id(), &error.to_string());
                    }
                    failures.push(ProviderFailure {
                        provider: provider.id().to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        self.set_status(order_id, OrderStatus::Failed);
        Err(ExecutionError::Exhausted(AggregatedExecutionFailure {
            order_id: order_id.to_string(),
            failures,
        }))
    }

    /// Turn the intent into raw amounts for the signing wallet
    async fn resolve(
        &self,
        intent: &OrderIntent,
        signer: &dyn TransactionSigner,
    ) -> Result<ResolvedOrder, ExecutionError> {
        let wallet = signer.public_key();
        let token = intent.token_address.as_str();
        let token_decimals = self.ledger.mint_decimals(token).await?;
        if token_decimals > MAX_DECIMALS {
            return Err(ExecutionError::Validation(format!(
                "mint {} declares {} decimals, at most {} supported",
                token, token_decimals, MAX_DECIMALS
            )));
        }

        let (input_mint, output_mint, input_decimals) = match intent.side {
            OrderSide::Buy => (mints::SOL, token, SOL_DECIMALS),
            OrderSide::Sell => (token, mints::SOL, token_decimals),
        };

        let amount = match intent.amount {
            OrderAmount::Exact(ui) => ui_to_raw(ui, input_decimals)
                .ok_or_else(|| ExecutionError::Validation(format!("amount {} out of range", ui)))?,
            OrderAmount::PercentOfBalance(pct) => {
                let balance = match intent.side {
                    OrderSide::Buy => self.ledger.native_balance(&wallet).await?,
                    OrderSide::Sell => self.ledger.token_balance(&wallet, token).await?,
                };
                (Decimal::from(balance) * pct / Decimal::ONE_HUNDRED)
                    .trunc()
                    .to_u64()
                    .unwrap_or_default()
            }
        };

        if amount == 0 {
            return Err(ExecutionError::Validation(
                "resolved amount is zero".to_string(),
            ));
        }

        let impact_limit_pct =
            (intent.max_slippage_bps as f64 / 100.0).min(self.config.max_price_impact_pct);

        Ok(ResolvedOrder {
            request: QuoteRequest {
                input_mint: input_mint.to_string(),
                output_mint: output_mint.to_string(),
                amount,
                slippage_bps: intent.max_slippage_bps,
            },
            wallet,
            side: intent.side,
            token_decimals,
            impact_limit_pct,
        })
    }

    async fn attempt(
        &self,
        order_id: &str,
        provider: &dyn ExecutionProvider,
        resolved: &ResolvedOrder,
        signer: &dyn TransactionSigner,
    ) -> (ExecutionAttempt, AttemptResult) {
        let mut attempt = ExecutionAttempt::pending(order_id, provider.id());
        let result = match self
            .run_attempt(order_id, provider, resolved, signer, &mut attempt)
            .await
        {
            Ok(result) => result,
            Err(error) => AttemptResult::Failed(error),
        };

        let (outcome, detail) = match &result {
            AttemptResult::Confirmed(_) => (AttemptOutcome::Confirmed, None),
            AttemptResult::Mismatch { .. } => (
                AttemptOutcome::Rejected,
                Some("confirmed without balance increase".to_string()),
            ),
            AttemptResult::Failed(e @ ProviderError::ConfirmationTimeout { .. }) => {
                (AttemptOutcome::TimedOut, Some(e.to_string()))
            }
            AttemptResult::Failed(e) => (AttemptOutcome::Rejected, Some(e.to_string())),
        };

        (attempt.settle(outcome, detail), result)
    }

    async fn run_attempt(
        &self,
        order_id: &str,
        provider: &dyn ExecutionProvider,
        resolved: &ResolvedOrder,
        signer: &dyn TransactionSigner,
        attempt: &mut ExecutionAttempt,
    ) -> Result<AttemptResult, ProviderError> {
        let quote_timeout = Duration::from_millis(self.config.quote_timeout_ms);
        let submit_timeout = Duration::from_millis(self.config.submit_timeout_ms);
        let poll_interval = Duration::from_millis(self.config.confirm_poll_interval_ms);

        let mut requotes = 0;
        let (quote, unsigned) = loop {
            self.set_status(order_id, OrderStatus::Quoting);
            let quote = timeout(quote_timeout, provider.quote(&resolved.request))
                .await
                .map_err(|_| ProviderError::Timeout { stage: "quote" })??;
            attempt.quote = Some(quote.clone());

            if quote.price_impact_pct > resolved.impact_limit_pct {
                return Err(ProviderError::PriceImpact {
                    impact_pct: quote.price_impact_pct,
                    limit_pct: resolved.impact_limit_pct,
                });
            }

            self.set_status(order_id, OrderStatus::Ready);
            let unsigned = timeout(quote_timeout, provider.build_swap(&quote, &resolved.wallet))
                .await
                .map_err(|_| ProviderError::Timeout { stage: "swap build" })??;

            if !quote.is_expired() {
                break (quote, unsigned);
            }
            if requotes >= self.config.max_requotes {
                return Err(ProviderError::QuoteExpired { requotes });
            }
            requotes += 1;
            tracing::warn!(
                order_id = %order_id,
                provider = %provider.id(),
                requotes,
                "Quote expired before submission, re-quoting"
            );
        };

        let pre_balance = match resolved.side {
            OrderSide::Buy => Some(
                self.ledger
                    .token_balance(&resolved.wallet, &resolved.request.output_mint)
                    .await?,
            ),
            OrderSide::Sell => None,
        };

        self.set_status(order_id, OrderStatus::Submitting);
        let signed = signer
            .sign(&unsigned)
            .map_err(|e| ProviderError::Signing(e.to_string()))?;

        attempt.submitted_at = Some(Utc::now());
        let signature = match timeout(submit_timeout, self.ledger.send_transaction(&signed)).await {
            Err(_) => return Err(ProviderError::Timeout { stage: "submission" }),
            Ok(Err(TransportError::Rpc { message, .. })) => {
                return Err(ProviderError::Submission(message))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(signature)) => signature,
        };
        attempt.signature = Some(signature.clone());

        tracing::info!(
            order_id = %order_id,
            provider = %provider.id(),
            signature = %signature,
            "Transaction submitted"
        );

        self.set_status(order_id, OrderStatus::Verifying);
        match verification::await_confirmation(
            self.ledger.as_ref(),
            &signature,
            poll_interval,
            self.config.confirm_max_polls,
        )
        .await
        {
            Confirmation::Confirmed { slot } => {
                tracing::debug!(order_id = %order_id, signature = %signature, slot, "Confirmation observed");
            }
            Confirmation::Failed { reason } => {
                return Err(ProviderError::OnChain { signature, reason });
            }
            Confirmation::TimedOut => {
                return Err(ProviderError::ConfirmationTimeout { signature });
            }
        }

        let received = match pre_balance {
            Some(pre) => match verification::balance_increase(
                self.ledger.as_ref(),
                &resolved.wallet,
                &resolved.request.output_mint,
                pre,
                poll_interval,
            )
            .await
            {
                Some(delta) => delta,
                None => return Ok(AttemptResult::Mismatch { signature }),
            },
            None => quote.out_amount,
        };

        let fee_lamports = verification::network_fee(self.ledger.as_ref(), &signature).await;

        Ok(AttemptResult::Confirmed(build_receipt(
            order_id,
            &quote,
            resolved,
            signature,
            received,
            fee_lamports.unwrap_or_default(),
        )))
    }

    async fn finish(
        &self,
        order_id: &str,
        intent: &OrderIntent,
        result: &Result<ExecutionReceipt, ExecutionError>,
    ) {
        let outcome = match result {
            Ok(receipt) => {
                self.failed_orders.clear(&intent.owner_id);
                self.metrics.orders.with_label_values(&["confirmed"]).inc();
                tracing::info!(
                    order_id = %order_id,
                    owner = %intent.owner_id,
                    provider = %receipt.provider,
                    signature = %receipt.signature,
                    price = %receipt.realized_price,
                    "Order confirmed"
                );
                OrderOutcome::Confirmed(receipt.clone())
            }
            Err(error) => {
                let (label, failures) = match error {
                    ExecutionError::Exhausted(aggregated) => ("exhausted", aggregated.failures.clone()),
                    ExecutionError::VerificationMismatch { provider, .. } => (
                        "verification_mismatch",
                        vec![ProviderFailure {
                            provider: provider.clone(),
                            reason: error.to_string(),
                        }],
                    ),
                    ExecutionError::Ledger(_) => ("ledger_unavailable", Vec::new()),
                    ExecutionError::Validation(_) => ("rejected", Vec::new()),
                };
                self.set_status(order_id, OrderStatus::Failed);

                let retry_available = !matches!(error, ExecutionError::Validation(_));
                if retry_available {
                    self.failed_orders
                        .record(FailedOrderRecord::from_intent(intent, error.to_string()));
                }

                self.metrics.orders.with_label_values(&[label]).inc();
                tracing::error!(
                    order_id = %order_id,
                    owner = %intent.owner_id,
                    error = %error,
                    "Order failed"
                );
                OrderOutcome::Failed {
                    order_id: order_id.to_string(),
                    reason: error.to_string(),
                    failures,
                    retry_available,
                }
            }
        };

        if let Some(db) = &self.db {
            let status = match result {
                Ok(_) => OrderStatus::Confirmed,
                Err(_) => OrderStatus::Failed,
            };
            if let Err(e) = db::update_order_status(db, order_id, status).await {
                tracing::error!(order_id = %order_id, error = %e, "Failed to persist order status");
            }
        }

        self.notify(NotificationEvent::OrderResult {
            owner_id: intent.owner_id.clone(),
            outcome,
        });
    }

    async fn track_order(&self, order_id: &str, intent: &OrderIntent) {
        self.orders
            .lock()
            .put(order_id.to_string(), OrderRecord::new(order_id, intent));

        if let Some(db) = &self.db {
            if let Err(e) = db::insert_order(db, order_id, intent, OrderStatus::Created).await {
                tracing::error!(order_id = %order_id, error = %e, "Failed to persist order");
            }
        }
    }

    async fn append_attempt(&self, attempt: ExecutionAttempt) {
        if let Some(db) = &self.db {
            if let Err(e) = db::insert_execution_attempt(db, &attempt).await {
                tracing::error!(order_id = %attempt.order_id, error = %e, "Failed to persist attempt");
            }
        }

        let mut orders = self.orders.lock();
        if let Some(record) = orders.get_mut(&attempt.order_id) {
            record.attempts.push(attempt);
            record.updated_at = Utc::now();
        }
    }

    fn set_status(&self, order_id: &str, status: OrderStatus) {
        let mut orders = self.orders.lock();
        let Some(record) = orders.get_mut(order_id) else {
            return;
        };
        if record.status == status && status.is_terminal() {
            return;
        }
        if let Err(e) = record.transition_to(status) {
            tracing::warn!(order_id = %order_id, error = %e, "Unexpected order transition");
        }
    }

    fn provider_succeeded(&self, provider: &str) {
        self.breakers.record_success(provider);
        self.metrics
            .provider_breaker_open
            .with_label_values(&[provider])
            .set(0);
    }

    fn provider_failed(&self, provider: &str, reason: &str) {
        let opened = self.breakers.record_failure(provider);
        self.metrics
            .provider_breaker_open
            .with_label_values(&[provider])
            .set(self.breakers.is_open(provider) as i64);

        if opened {
            self.notify(NotificationEvent::ProviderTripped {
                provider: provider.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    fn notify(&self, event: NotificationEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_detached(event);
        }
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.owner_locks
            .lock()
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the owner's lock entry once nobody holds or waits on it
    fn release_owner_lock(&self, owner_id: &str) {
        let mut locks = self.owner_locks.lock();
        let idle = locks
            .get(owner_id)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(owner_id);
        }
    }
}

fn build_receipt(
    order_id: &str,
    quote: &Quote,
    resolved: &ResolvedOrder,
    signature: String,
    received: u64,
    fee_lamports: u64,
) -> ExecutionReceipt {
    let (in_decimals, out_decimals) = match resolved.side {
        OrderSide::Buy => (SOL_DECIMALS, resolved.token_decimals),
        OrderSide::Sell => (resolved.token_decimals, SOL_DECIMALS),
    };
    // Decimals were bounded in `resolve`
    let in_ui = raw_to_ui(quote.in_amount, in_decimals).unwrap_or_default();
    let out_ui = raw_to_ui(received, out_decimals).unwrap_or_default();

    // Base asset per token on both sides
    let realized_price = match resolved.side {
        OrderSide::Buy => in_ui.checked_div(out_ui),
        OrderSide::Sell => out_ui.checked_div(in_ui),
    }
    .unwrap_or_default();

    ExecutionReceipt {
        order_id: order_id.to_string(),
        provider: quote.provider.clone(),
        signature,
        realized_price,
        platform_fee: raw_to_ui(quote.platform_fee, out_decimals).unwrap_or_default(),
        network_fee: raw_to_ui(fee_lamports, SOL_DECIMALS).unwrap_or_default(),
        price_impact_pct: quote.price_impact_pct,
        out_amount: out_ui,
    }
}

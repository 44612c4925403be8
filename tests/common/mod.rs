//! Shared test doubles
//!
//! In-memory ledger, scripted execution providers, a pass-through signer and
//! a channel-fed push transport.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tandem_operator::engine::{ExecutionProvider, QuoteRequest, SigningError, TransactionSigner};
use tandem_operator::error::{ProviderError, TransportError};
use tandem_operator::gateway::{LedgerClient, SignatureInfo, SignatureStatus};
use tandem_operator::models::Quote;
use tandem_operator::models::PurchaseEvent;
use tandem_operator::monitoring::{PurchaseSubscriber, StreamMessage, StreamSubscription, StreamTransport};

pub const WALLET: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
pub const OWNER_WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub const TOKEN: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// What the ledger reports for submitted signatures
#[derive(Debug, Clone)]
pub enum ConfirmMode {
    Confirmed,
    OnChainError(String),
    NeverSeen,
}

pub struct MockLedger {
    pub signatures: Mutex<Vec<SignatureInfo>>,
    pub transactions: Mutex<HashMap<String, Value>>,
    pub token_balances: Mutex<HashMap<(String, String), u64>>,
    pub native_balance: Mutex<u64>,
    pub decimals: Mutex<HashMap<String, u8>>,
    pub confirm_mode: Mutex<ConfirmMode>,
    /// Raw amount credited to (owner, mint) on every submission
    pub fill: Mutex<Option<(String, String, u64)>>,
    pub fail_signature_fetch: Mutex<bool>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub signature_fetches: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            signatures: Mutex::new(Vec::new()),
            transactions: Mutex::new(HashMap::new()),
            token_balances: Mutex::new(HashMap::new()),
            native_balance: Mutex::new(5_000_000_000),
            decimals: Mutex::new(HashMap::new()),
            confirm_mode: Mutex::new(ConfirmMode::Confirmed),
            fill: Mutex::new(None),
            fail_signature_fetch: Mutex::new(false),
            sent: Mutex::new(Vec::new()),
            signature_fetches: AtomicUsize::new(0),
        }
    }

    /// Add a transaction to the address history, newest first
    pub fn push_transaction(&self, signature: &str, slot: u64, tx: Value) {
        self.signatures.lock().insert(
            0,
            SignatureInfo {
                signature: signature.to_string(),
                slot,
                failed: false,
                block_time: None,
            },
        );
        self.transactions.lock().insert(signature.to_string(), tx);
    }

    pub fn set_token_balance(&self, owner: &str, mint: &str, raw: u64) {
        self.token_balances
            .lock()
            .insert((owner.to_string(), mint.to_string()), raw);
    }

    pub fn set_fill(&self, owner: &str, mint: &str, raw: u64) {
        *self.fill.lock() = Some((owner.to_string(), mint.to_string(), raw));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn recent_signatures(
        &self,
        _address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, TransportError> {
        self.signature_fetches.fetch_add(1, Ordering::SeqCst);
        if *self.fail_signature_fetch.lock() {
            return Err(TransportError::Timeout);
        }
        Ok(self.signatures.lock().iter().take(limit).cloned().collect())
    }

    async fn transaction(&self, signature: &str) -> Result<Option<Value>, TransportError> {
        Ok(self.transactions.lock().get(signature).cloned())
    }

    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, TransportError> {
        if !self.transactions.lock().contains_key(signature) {
            return Ok(None);
        }
        let status = match &*self.confirm_mode.lock() {
            ConfirmMode::Confirmed => Some(SignatureStatus {
                slot: 100,
                confirmed: true,
                err: None,
            }),
            ConfirmMode::OnChainError(reason) => Some(SignatureStatus {
                slot: 100,
                confirmed: true,
                err: Some(reason.clone()),
            }),
            ConfirmMode::NeverSeen => None,
        };
        Ok(status)
    }

    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, TransportError> {
        Ok(self
            .token_balances
            .lock()
            .get(&(owner.to_string(), mint.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn native_balance(&self, _owner: &str) -> Result<u64, TransportError> {
        Ok(*self.native_balance.lock())
    }

    async fn mint_decimals(&self, mint: &str) -> Result<u8, TransportError> {
        Ok(self.decimals.lock().get(mint).copied().unwrap_or(6))
    }

    async fn send_transaction(&self, signed: &[u8]) -> Result<String, TransportError> {
        let signature = {
            let mut sent = self.sent.lock();
            sent.push(signed.to_vec());
            format!("sig-{}", sent.len())
        };

        self.transactions
            .lock()
            .insert(signature.clone(), json!({ "meta": { "err": null, "fee": 5000 } }));

        if let Some((owner, mint, raw)) = self.fill.lock().clone() {
            *self.token_balances.lock().entry((owner, mint)).or_default() += raw;
        }

        Ok(signature)
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QuoteBehavior {
    /// Quote with the given price impact in percent
    Ok { impact_pct: f64 },
    NoRoute,
    /// Quote that is already expired when built
    Stale,
}

/// Shared by providers to observe overlapping attempts
#[derive(Default)]
pub struct Concurrency {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub struct MockProvider {
    id: String,
    pub behavior: Mutex<QuoteBehavior>,
    pub quote_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub last_request: Mutex<Option<QuoteRequest>>,
    /// Simulated quote latency
    pub latency: Duration,
    pub log: Arc<Mutex<Vec<String>>>,
    pub concurrency: Arc<Concurrency>,
}

impl MockProvider {
    pub fn new(id: &str, behavior: QuoteBehavior, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: id.to_string(),
            behavior: Mutex::new(behavior),
            quote_calls: AtomicUsize::new(0),
            build_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            latency: Duration::ZERO,
            log,
            concurrency: Arc::new(Concurrency::default()),
        }
    }

    pub fn with_latency(mut self, latency: Duration, concurrency: Arc<Concurrency>) -> Self {
        self.latency = latency;
        self.concurrency = concurrency;
        self
    }

    pub fn set_behavior(&self, behavior: QuoteBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn quotes(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, ProviderError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("{}:quote", self.id));
        *self.last_request.lock() = Some(request.clone());

        if !self.latency.is_zero() {
            self.concurrency.enter();
            tokio::time::sleep(self.latency).await;
            self.concurrency.exit();
        }

        let behavior = self.behavior.lock().clone();
        let (impact_pct, ttl) = match behavior {
            QuoteBehavior::Ok { impact_pct } => (impact_pct, Duration::from_secs(30)),
            QuoteBehavior::Stale => (0.1, Duration::ZERO),
            QuoteBehavior::NoRoute => {
                return Err(ProviderError::NoRoute(format!(
                    "{} -> {}",
                    request.input_mint, request.output_mint
                )))
            }
        };

        Ok(Quote {
            provider: self.id.clone(),
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: request.amount,
            out_amount: 1_000_000_000,
            min_out_amount: 990_000_000,
            price_impact_pct: impact_pct,
            platform_fee: 0,
            slippage_bps: request.slippage_bps,
            expires_at: Instant::now() + ttl,
            raw: json!({}),
        })
    }

    async fn build_swap(&self, _quote: &Quote, _user_public_key: &str) -> Result<Vec<u8>, ProviderError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("{}:build", self.id));
        Ok(vec![1, 2, 3])
    }
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

pub struct MockSigner {
    pub public_key: String,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            public_key: OWNER_WALLET.to_string(),
        }
    }
}

impl TransactionSigner for MockSigner {
    fn public_key(&self) -> String {
        self.public_key.clone()
    }

    fn sign(&self, transaction: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(transaction.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Push transport
// ---------------------------------------------------------------------------

pub struct MockStream {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamMessage>>>,
    /// Subscribe attempts that fail before one succeeds
    pub failures_before_success: AtomicU32,
    pub subscribe_calls: AtomicUsize,
}

impl MockStream {
    pub fn new() -> (Self, mpsc::UnboundedSender<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                failures_before_success: AtomicU32::new(0),
                subscribe_calls: AtomicUsize::new(0),
            },
            tx,
        )
    }

    /// Stream whose subscriptions always fail
    pub fn failing() -> Self {
        let (stream, _tx) = Self::new();
        stream.failures_before_success.store(u32::MAX, Ordering::SeqCst);
        stream
    }
}

#[async_trait]
impl StreamTransport for MockStream {
    async fn subscribe(&self, _address: &str) -> Result<Box<dyn StreamSubscription>, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(TransportError::Connect("stream refused".to_string()));
        }
        Ok(Box::new(MockSubscription { rx: self.rx.clone() }))
    }
}

struct MockSubscription {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StreamMessage>>>,
}

#[async_trait]
impl StreamSubscription for MockSubscription {
    async fn next_message(&mut self) -> Result<Option<StreamMessage>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

pub type Delivered = (PurchaseEvent, Vec<String>);

/// Forwards every delivery to a channel the test reads
pub struct CollectingSubscriber {
    tx: mpsc::UnboundedSender<Delivered>,
}

impl CollectingSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Delivered>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl PurchaseSubscriber for CollectingSubscriber {
    fn name(&self) -> &str {
        "collector"
    }

    async fn on_purchase_event(&self, event: &PurchaseEvent, owners: &[String]) -> anyhow::Result<()> {
        let _ = self.tx.send((event.clone(), owners.to_vec()));
        Ok(())
    }
}

/// Fails every delivery
pub struct FailingSubscriber {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PurchaseSubscriber for FailingSubscriber {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_purchase_event(&self, _event: &PurchaseEvent, _owners: &[String]) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("downstream unavailable")
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// `getTransaction` payload for `wallet` paying `lamports_paid` (plus fee) for `token_raw` of `mint`
pub fn swap_transaction(wallet: &str, mint: &str, lamports_paid: u64, token_raw: u64, decimals: u8) -> Value {
    let fee = 5000u64;
    let pre = 10_000_000_000u64;
    json!({
        "slot": 250,
        "transaction": {
            "signatures": ["unused"],
            "message": { "accountKeys": [wallet, "11111111111111111111111111111111"] }
        },
        "meta": {
            "err": null,
            "fee": fee,
            "preBalances": [pre, 1],
            "postBalances": [pre - lamports_paid - fee, 1],
            "preTokenBalances": [],
            "postTokenBalances": [{
                "accountIndex": 2,
                "mint": mint,
                "owner": wallet,
                "uiTokenAmount": { "amount": token_raw.to_string(), "decimals": decimals }
            }]
        }
    })
}

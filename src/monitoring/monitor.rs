//! Wallet Activity Monitor
//!
//! Two loops per watched address: a push subscription and a fixed-interval
//! poll. Both feed one seen-signature set, so a transaction produces at most
//! one purchase event whichever channel sees it first. Transport failures are
//! retried forever; a run of failed reconnects or polls raises a degraded
//! signal to the supervisor.

use super::classifier::{self, Classification};
use super::seen::SeenSignatures;
use super::stream::StreamTransport;
use crate::config::MonitoringConfig;
use crate::gateway::LedgerClient;
use crate::metrics::MetricsState;
use crate::models::{ObservationChannel, PurchaseEvent};
use crate::utils::short_address;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Output of a monitor towards its supervisor
#[derive(Debug, Clone)]
pub enum MonitorMessage {
    Purchase(PurchaseEvent),
    Degraded {
        address: String,
        consecutive_failures: u32,
    },
    Recovered {
        address: String,
    },
}

/// Collaborators and settings shared by every monitor
pub struct MonitorContext {
    pub ledger: Arc<dyn LedgerClient>,
    pub stream: Arc<dyn StreamTransport>,
    pub settings: MonitoringConfig,
    pub base_mints: HashSet<String>,
    pub metrics: Arc<MetricsState>,
    pub events: mpsc::Sender<MonitorMessage>,
}

/// Consecutive transport failures per channel
#[derive(Default)]
struct LinkHealth {
    push_failures: AtomicU32,
    poll_failures: AtomicU32,
    degraded: AtomicBool,
}

#[derive(Clone, Copy)]
enum Link {
    Push,
    Poll,
}

impl LinkHealth {
    fn counter(&self, link: Link) -> &AtomicU32 {
        match link {
            Link::Push => &self.push_failures,
            Link::Poll => &self.poll_failures,
        }
    }

    fn worst(&self) -> u32 {
        self.push_failures
            .load(Ordering::Relaxed)
            .max(self.poll_failures.load(Ordering::Relaxed))
    }

    /// Returns the failure count when this failure crosses the threshold
    fn record_failure(&self, link: Link, threshold: u32) -> Option<u32> {
        let failures = self.counter(link).fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= threshold && !self.degraded.swap(true, Ordering::Relaxed) {
            return Some(failures);
        }
        None
    }

    /// Returns true when this success clears a degraded state
    fn record_success(&self, link: Link, threshold: u32) -> bool {
        self.counter(link).store(0, Ordering::Relaxed);
        self.worst() < threshold && self.degraded.swap(false, Ordering::Relaxed)
    }
}

struct MonitorShared {
    address: String,
    ctx: Arc<MonitorContext>,
    seen: SeenSignatures,
    health: LinkHealth,
}

/// Running monitor for one address
pub struct WalletMonitor {
    shared: Arc<MonitorShared>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WalletMonitor {
    /// Start both observation loops
    pub fn start(address: &str, ctx: Arc<MonitorContext>, parent: &CancellationToken) -> Self {
        let shared = Arc::new(MonitorShared {
            address: address.to_string(),
            seen: SeenSignatures::new(ctx.settings.seen_capacity),
            ctx,
            health: LinkHealth::default(),
        });
        let cancel = parent.child_token();

        let poll = tokio::spawn(poll_loop(shared.clone(), cancel.clone()));
        let push = tokio::spawn(push_loop(shared.clone(), cancel.clone()));

        tracing::info!(address = %address, "Wallet monitor started");

        Self {
            shared,
            cancel,
            tasks: vec![poll, push],
        }
    }

    pub fn address(&self) -> &str {
        &self.shared.address
    }

    pub fn seen_count(&self) -> usize {
        self.shared.seen.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.health.degraded.load(Ordering::Relaxed)
    }

    /// Cancel both loops and wait for them to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(address = %self.shared.address, error = %e, "Monitor task ended abnormally");
            }
        }
        tracing::info!(address = %self.shared.address, "Wallet monitor stopped");
    }
}

impl Drop for WalletMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(shared: Arc<MonitorShared>, cancel: CancellationToken) {
    let settings = &shared.ctx.settings;
    let mut interval = tokio::time::interval(Duration::from_secs(settings.poll_interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut primed = !settings.prime_on_start;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !primed {
                    primed = shared.prime().await;
                    continue;
                }
                shared.scan(ObservationChannel::Poll).await;
            }
        }
    }
}

async fn push_loop(shared: Arc<MonitorShared>, cancel: CancellationToken) {
    let delay = Duration::from_millis(shared.ctx.settings.reconnect_delay_ms);
    let mut reconnecting = false;

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.ctx.stream.subscribe(&shared.address) => result,
        };

        match subscribed {
            Ok(mut subscription) => {
                shared.link_succeeded(Link::Push).await;
                if reconnecting {
                    tracing::info!(address = %shared.address, "Push channel reconnected, reconciling");
                    shared.scan(ObservationChannel::Reconciled).await;
                }

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = subscription.next_message() => next,
                    };
                    match next {
                        Ok(Some(message)) => {
                            shared
                                .observe(&message.signature, message.slot, &message.transaction, ObservationChannel::Push)
                                .await;
                        }
                        Ok(None) => {
                            tracing::warn!(address = %shared.address, "Push stream ended");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(address = %shared.address, error = %e, "Push stream failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(address = %shared.address, error = %e, "Push subscription failed");
                shared.link_failed(Link::Push).await;
            }
        }

        reconnecting = true;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

impl MonitorShared {
    /// Mark current history seen without emitting
    async fn prime(&self) -> bool {
        let limit = self.ctx.settings.signature_fetch_limit;
        match self.ctx.ledger.recent_signatures(&self.address, limit).await {
            Ok(signatures) => {
                self.link_succeeded(Link::Poll).await;
                for info in &signatures {
                    self.seen.insert_if_new(&info.signature);
                }
                tracing::debug!(address = %self.address, primed = signatures.len(), "Seen set primed");
                true
            }
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "Priming fetch failed");
                self.link_failed(Link::Poll).await;
                false
            }
        }
    }

    /// Fetch recent signatures and classify the unseen ones, oldest first
    async fn scan(&self, channel: ObservationChannel) {
        let limit = self.ctx.settings.signature_fetch_limit;
        let signatures = match self.ctx.ledger.recent_signatures(&self.address, limit).await {
            Ok(signatures) => {
                self.link_succeeded(Link::Poll).await;
                signatures
            }
            Err(e) => {
                tracing::warn!(address = %self.address, channel = %channel, error = %e, "Signature fetch failed");
                self.link_failed(Link::Poll).await;
                return;
            }
        };

        for info in signatures.iter().rev() {
            if self.seen.contains(&info.signature) {
                continue;
            }
            if info.failed {
                self.seen.insert_if_new(&info.signature);
                tracing::trace!(signature = %info.signature, "Skipping failed transaction");
                continue;
            }

            match self.ctx.ledger.transaction(&info.signature).await {
                Ok(Some(tx)) => {
                    let slot = tx.get("slot").and_then(Value::as_u64).unwrap_or(info.slot);
                    self.observe(&info.signature, slot, &tx, channel).await;
                }
                // Not visible yet; retried on the next scan
                Ok(None) => {
                    tracing::debug!(signature = %info.signature, "Transaction not yet available");
                }
                Err(e) => {
                    tracing::warn!(signature = %info.signature, error = %e, "Transaction fetch failed");
                }
            }
        }
    }

    async fn observe(&self, signature: &str, slot: u64, tx: &Value, channel: ObservationChannel) {
        if !self.seen.insert_if_new(signature) {
            tracing::trace!(signature = %signature, channel = %channel, "Already seen");
            return;
        }

        let classification = match classifier::classify(tx, &self.address, &self.ctx.base_mints) {
            Ok(classification) => classification,
            Err(e) => {
                // A pushed payload may be incomplete; let the poll fetch retry it
                let retry_by_poll = channel == ObservationChannel::Push && self.seen.remove(signature);
                tracing::warn!(
                    address = %self.address,
                    signature = %signature,
                    channel = %channel,
                    error = %e,
                    retry_by_poll,
                    "Skipping malformed transaction"
                );
                return;
            }
        };

        let Classification::Acquisition(acquisition) = classification else {
            tracing::debug!(
                address = %short_address(&self.address),
                signature = %signature,
                kind = classification.label(),
                "Transaction classified"
            );
            return;
        };

        let event = PurchaseEvent {
            source_signature: signature.to_string(),
            wallet_address: self.address.clone(),
            acquired_mint: acquisition.acquired_mint,
            acquired_amount: acquisition.acquired_amount,
            paid_mint: acquisition.paid_mint,
            paid_amount: acquisition.paid_amount,
            slot,
            observed_at: Utc::now(),
            channel,
        };

        tracing::info!(
            address = %self.address,
            signature = %signature,
            mint = %event.acquired_mint,
            amount = %event.acquired_amount,
            paid = %event.paid_amount,
            channel = %channel,
            "Purchase detected"
        );
        self.ctx
            .metrics
            .purchase_events
            .with_label_values(&[channel.as_str()])
            .inc();
        self.send(MonitorMessage::Purchase(event)).await;
    }

    async fn link_failed(&self, link: Link) {
        let threshold = self.ctx.settings.degraded_after_failures;
        if let Some(consecutive_failures) = self.health.record_failure(link, threshold) {
            tracing::error!(
                address = %self.address,
                consecutive_failures,
                "Wallet monitor degraded"
            );
            self.send(MonitorMessage::Degraded {
                address: self.address.clone(),
                consecutive_failures,
            })
            .await;
        }
    }

    async fn link_succeeded(&self, link: Link) {
        let threshold = self.ctx.settings.degraded_after_failures;
        if self.health.record_success(link, threshold) {
            tracing::info!(address = %self.address, "Wallet monitor recovered");
            self.send(MonitorMessage::Recovered {
                address: self.address.clone(),
            })
            .await;
        }
    }

    async fn send(&self, message: MonitorMessage) {
        if self.ctx.events.send(message).await.is_err() {
            tracing::debug!(address = %self.address, "Supervisor gone, dropping monitor message");
        }
    }
}

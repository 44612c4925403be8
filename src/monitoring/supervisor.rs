//! Monitor Supervisor
//!
//! Owns one `WalletMonitor` per watched address and fans their purchase
//! events out to subscribers. Each subscriber has its own worker and bounded
//! queue, so a slow or failing subscriber never holds up monitors or other
//! subscribers.
//!
//! Events of one address are held for `reorder_hold_ms` and released in slot
//! order. Ordering holds only inside that window: an earlier slot that
//! reaches the dispatcher after a later one has already been released (for
//! example, seen by a poll that runs long after the push of a newer
//! transaction) is delivered late, after the newer event. The seen set still
//! keeps delivery to one event per signature.

use super::monitor::{MonitorContext, MonitorMessage, WalletMonitor};
use super::reorder::ReorderBuffer;
use super::stream::StreamTransport;
use crate::config::MonitoringConfig;
use crate::error::{AppError, AppResult};
use crate::gateway::LedgerClient;
use crate::metrics::MetricsState;
use crate::models::{PurchaseEvent, WatchedWallet};
use crate::notifications::{CompositeNotifier, NotificationEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Monitor output buffer between monitors and the dispatcher
const MONITOR_CHANNEL_CAPACITY: usize = 1024;

/// Receives purchase events for decisioning
#[async_trait]
pub trait PurchaseSubscriber: Send + Sync {
    fn name(&self) -> &str;

    /// `owners` are the active owners watching the event's address
    async fn on_purchase_event(&self, event: &PurchaseEvent, owners: &[String]) -> anyhow::Result<()>;
}

/// Forwards purchase events to the notification collaborators
pub struct NotificationSubscriber {
    notifier: Arc<CompositeNotifier>,
}

impl NotificationSubscriber {
    pub fn new(notifier: Arc<CompositeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl PurchaseSubscriber for NotificationSubscriber {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn on_purchase_event(&self, event: &PurchaseEvent, owners: &[String]) -> anyhow::Result<()> {
        self.notifier
            .notify(NotificationEvent::PurchaseDetected {
                event: event.clone(),
                owners: owners.to_vec(),
            })
            .await;
        Ok(())
    }
}

/// Monitor state for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub address: String,
    pub owners: Vec<String>,
    pub degraded: bool,
    pub seen_signatures: usize,
    pub last_activity_time: Option<DateTime<Utc>>,
}

struct Delivery {
    event: Arc<PurchaseEvent>,
    owners: Arc<[String]>,
}

struct SubscriberSlot {
    name: String,
    queue: mpsc::Sender<Delivery>,
}

/// State shared with the dispatcher task
struct Registry {
    /// address -> one record per owner
    watches: RwLock<HashMap<String, Vec<WatchedWallet>>>,
    /// Addresses with a running monitor
    running: RwLock<HashSet<String>>,
    degraded: RwLock<HashMap<String, u32>>,
    subscribers: RwLock<Vec<SubscriberSlot>>,
    notifier: Option<Arc<CompositeNotifier>>,
}

impl Registry {
    fn active_owners(&self, address: &str) -> Vec<String> {
        self.watches
            .read()
            .get(address)
            .map(|wallets| {
                wallets
                    .iter()
                    .filter(|w| w.active)
                    .map(|w| w.owner_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn should_run(&self, address: &str) -> bool {
        self.watches
            .read()
            .get(address)
            .map(|wallets| wallets.iter().any(|w| w.active))
            .unwrap_or(false)
    }

    fn touch(&self, address: &str, at: DateTime<Utc>) {
        if let Some(wallets) = self.watches.write().get_mut(address) {
            for wallet in wallets.iter_mut() {
                wallet.last_activity_time = Some(at);
            }
        }
    }

    fn notify(&self, event: NotificationEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_detached(event);
        }
    }

    fn deliver(&self, event: PurchaseEvent) {
        if !self.running.read().contains(&event.wallet_address) {
            tracing::debug!(address = %event.wallet_address, "Dropping event for stopped monitor");
            return;
        }

        self.touch(&event.wallet_address, event.observed_at);
        let owners: Arc<[String]> = self.active_owners(&event.wallet_address).into();
        let event = Arc::new(event);

        for slot in self.subscribers.read().iter() {
            let delivery = Delivery {
                event: event.clone(),
                owners: owners.clone(),
            };
            if let Err(e) = slot.queue.try_send(delivery) {
                tracing::warn!(
                    subscriber = %slot.name,
                    signature = %event.source_signature,
                    error = %e,
                    "Subscriber queue unavailable, dropping event"
                );
            }
        }
    }
}

pub struct MonitorSupervisor {
    ctx: Arc<MonitorContext>,
    registry: Arc<Registry>,
    /// Start and stop happen under this lock so an address never has two monitors
    monitors: tokio::sync::Mutex<HashMap<String, WalletMonitor>>,
    queue_capacity: usize,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorSupervisor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        stream: Arc<dyn StreamTransport>,
        settings: MonitoringConfig,
        metrics: Arc<MetricsState>,
        notifier: Option<Arc<CompositeNotifier>>,
        cancel: CancellationToken,
    ) -> Self {
        let (events, rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
        let queue_capacity = settings.subscriber_queue.max(1);
        let hold = Duration::from_millis(settings.reorder_hold_ms);

        let ctx = Arc::new(MonitorContext {
            ledger,
            stream,
            base_mints: settings.base_mints.iter().cloned().collect(),
            settings,
            metrics,
            events,
        });
        let registry = Arc::new(Registry {
            watches: RwLock::new(HashMap::new()),
            running: RwLock::new(HashSet::new()),
            degraded: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            notifier,
        });

        let dispatcher = tokio::spawn(dispatch_loop(rx, registry.clone(), hold, cancel.clone()));

        Self {
            ctx,
            registry,
            monitors: tokio::sync::Mutex::new(HashMap::new()),
            queue_capacity,
            cancel,
            tasks: parking_lot::Mutex::new(vec![dispatcher]),
        }
    }

    /// Attach a subscriber with its own worker
    pub fn add_subscriber(&self, subscriber: Arc<dyn PurchaseSubscriber>) {
        let (queue, mut rx) = mpsc::channel::<Delivery>(self.queue_capacity);
        let name = subscriber.name().to_string();
        let cancel = self.cancel.clone();

        let worker = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivery = rx.recv() => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                if let Err(e) = subscriber
                    .on_purchase_event(&delivery.event, &delivery.owners)
                    .await
                {
                    tracing::warn!(
                        subscriber = %subscriber.name(),
                        signature = %delivery.event.source_signature,
                        error = %e,
                        "Subscriber failed to handle purchase event"
                    );
                }
            }
        });

        tracing::info!(subscriber = %name, "Purchase subscriber attached");
        self.registry.subscribers.write().push(SubscriberSlot { name, queue });
        self.tasks.lock().push(worker);
    }

    /// Watch `address` for `owner_id`, starting its monitor if needed
    pub async fn register_watch(&self, address: &str, owner_id: &str) -> AppResult<()> {
        Pubkey::from_str(address)
            .map_err(|_| AppError::Validation(format!("invalid wallet address: {}", address)))?;
        if owner_id.trim().is_empty() {
            return Err(AppError::Validation("owner id is empty".to_string()));
        }

        {
            let mut watches = self.registry.watches.write();
            let wallets = watches.entry(address.to_string()).or_default();
            match wallets.iter_mut().find(|w| w.owner_id == owner_id) {
                Some(existing) => existing.active = true,
                None => wallets.push(WatchedWallet::new(address, owner_id)),
            }
        }

        tracing::info!(address = %address, owner = %owner_id, "Watch registered");
        self.reconcile(address).await;
        Ok(())
    }

    /// Forget every watch on `address` and stop its monitor
    pub async fn deregister_watch(&self, address: &str) -> bool {
        let removed = self.registry.watches.write().remove(address).is_some();
        self.reconcile(address).await;
        if removed {
            tracing::info!(address = %address, "Watch deregistered");
        }
        removed
    }

    /// Toggle one owner's watch without deleting it
    pub async fn set_active(&self, address: &str, owner_id: &str, active: bool) -> AppResult<()> {
        {
            let mut watches = self.registry.watches.write();
            let wallet = watches
                .get_mut(address)
                .and_then(|wallets| wallets.iter_mut().find(|w| w.owner_id == owner_id))
                .ok_or_else(|| AppError::NotFound(format!("watch {} for {}", address, owner_id)))?;
            wallet.active = active;
        }

        self.reconcile(address).await;
        Ok(())
    }

    /// Run monitors for exactly `desired`; idempotent
    ///
    /// Addresses without a registered watch are monitored with no owners.
    pub async fn sync(&self, desired: &[String]) {
        let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
        let mut monitors = self.monitors.lock().await;

        let stale: Vec<String> = monitors
            .keys()
            .filter(|address| !desired.contains(address.as_str()))
            .cloned()
            .collect();
        for address in stale {
            if let Some(monitor) = monitors.remove(&address) {
                self.stop_monitor(monitor).await;
            }
        }

        for address in desired {
            if !monitors.contains_key(address) {
                if Pubkey::from_str(address).is_err() {
                    tracing::warn!(address = %address, "Ignoring invalid address in sync");
                    continue;
                }
                monitors.insert(address.to_string(), self.start_monitor(address));
            }
        }

        self.ctx.metrics.active_monitors.set(monitors.len() as i64);
    }

    pub fn watched_wallets(&self) -> Vec<WatchedWallet> {
        self.registry
            .watches
            .read()
            .values()
            .flat_map(|wallets| wallets.iter().cloned())
            .collect()
    }

    pub fn active_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.registry.running.read().iter().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn degraded_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.registry.degraded.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn monitor_count(&self) -> usize {
        self.registry.running.read().len()
    }

    pub fn last_activity_time(&self, address: &str) -> Option<DateTime<Utc>> {
        self.registry
            .watches
            .read()
            .get(address)
            .and_then(|wallets| wallets.iter().filter_map(|w| w.last_activity_time).max())
    }

    pub async fn snapshot(&self) -> Vec<MonitorSnapshot> {
        let monitors = self.monitors.lock().await;
        let degraded = self.registry.degraded.read().clone();
        let mut snapshots: Vec<MonitorSnapshot> = monitors
            .values()
            .map(|monitor| MonitorSnapshot {
                address: monitor.address().to_string(),
                owners: self.registry.active_owners(monitor.address()),
                degraded: degraded.contains_key(monitor.address()),
                seen_signatures: monitor.seen_count(),
                last_activity_time: self.last_activity_time(monitor.address()),
            })
            .collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    /// Stop every monitor and subscriber worker
    pub async fn shutdown(&self) {
        let monitors: Vec<WalletMonitor> = self.monitors.lock().await.drain().map(|(_, m)| m).collect();
        for monitor in monitors {
            self.stop_monitor(monitor).await;
        }
        self.ctx.metrics.active_monitors.set(0);

        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Monitor supervisor stopped");
    }

    /// Start or stop the monitor for one address to match its watches
    async fn reconcile(&self, address: &str) {
        let mut monitors = self.monitors.lock().await;
        let should_run = self.registry.should_run(address);

        match (should_run, monitors.contains_key(address)) {
            (true, false) => {
                monitors.insert(address.to_string(), self.start_monitor(address));
            }
            (false, true) => {
                if let Some(monitor) = monitors.remove(address) {
                    self.stop_monitor(monitor).await;
                }
            }
            _ => {}
        }

        self.ctx.metrics.active_monitors.set(monitors.len() as i64);
    }

    fn start_monitor(&self, address: &str) -> WalletMonitor {
        self.registry.running.write().insert(address.to_string());
        WalletMonitor::start(address, self.ctx.clone(), &self.cancel)
    }

    async fn stop_monitor(&self, monitor: WalletMonitor) {
        let address = monitor.address().to_string();
        self.registry.running.write().remove(&address);
        self.registry.degraded.write().remove(&address);
        monitor.stop().await;
    }
}

impl Drop for MonitorSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Hold purchase events per address and release them in slot order
async fn dispatch_loop(
    mut rx: mpsc::Receiver<MonitorMessage>,
    registry: Arc<Registry>,
    hold: Duration,
    cancel: CancellationToken,
) {
    let mut buffers: HashMap<String, ReorderBuffer> = HashMap::new();
    let mut arrival_seq: u64 = 0;

    loop {
        let wait = buffers
            .values()
            .filter_map(ReorderBuffer::wait_duration)
            .min();

        tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => {
                let Some(message) = message else { break };
                match message {
                    MonitorMessage::Purchase(event) => {
                        arrival_seq += 1;
                        buffers
                            .entry(event.wallet_address.clone())
                            .or_insert_with(|| ReorderBuffer::new(hold))
                            .push(event, arrival_seq);
                    }
                    MonitorMessage::Degraded { address, consecutive_failures } => {
                        if registry.running.read().contains(&address) {
                            registry.degraded.write().insert(address.clone(), consecutive_failures);
                            registry.notify(NotificationEvent::MonitorDegraded { address, consecutive_failures });
                        }
                    }
                    MonitorMessage::Recovered { address } => {
                        if registry.degraded.write().remove(&address).is_some() {
                            registry.notify(NotificationEvent::MonitorRecovered { address });
                        }
                    }
                }
            }
            _ = sleep_for(wait) => {}
        }

        for buffer in buffers.values_mut() {
            for event in buffer.pop_ready() {
                registry.deliver(event);
            }
        }
        buffers.retain(|_, buffer| !buffer.is_empty());
    }

    // Deliver what is still held rather than lose it
    for buffer in buffers.values_mut() {
        for event in buffer.drain() {
            registry.deliver(event);
        }
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

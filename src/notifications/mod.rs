//! Notification service for Tandem Operator
//!
//! Outbound collaborator interface. Events raised by the core:
//! - Purchase detected on a watched address
//! - Order result (confirmed, or failed with per-provider reasons)
//! - Provider circuit breaker opened
//! - Monitor degraded / recovered

pub mod webhook;

pub use webhook::WebhookNotifier;

use crate::error::ProviderFailure;
use crate::models::{ExecutionReceipt, PurchaseEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Alert level for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Critical alerts (provider breaker opened)
    Critical,
    /// Important alerts (order failed, monitor degraded)
    Important,
    /// Informational alerts (purchases, confirmed orders)
    Info,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Critical => write!(f, "CRITICAL"),
            AlertLevel::Important => write!(f, "IMPORTANT"),
            AlertLevel::Info => write!(f, "INFO"),
        }
    }
}

/// Final outcome of an order as reported to collaborators
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderOutcome {
    Confirmed(ExecutionReceipt),
    Failed {
        order_id: String,
        reason: String,
        failures: Vec<ProviderFailure>,
        /// A FailedOrderRecord is available for one-touch retry
        retry_available: bool,
    },
}

/// Notification event types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// Acquisition observed on a watched address
    PurchaseDetected {
        event: PurchaseEvent,
        owners: Vec<String>,
    },
    /// Result of a submitted order
    OrderResult { owner_id: String, outcome: OrderOutcome },
    /// Provider circuit breaker opened
    ProviderTripped { provider: String, reason: String },
    /// Push channel keeps failing for an address
    MonitorDegraded {
        address: String,
        consecutive_failures: u32,
    },
    /// Push channel reconnected after being degraded
    MonitorRecovered { address: String },
}

impl NotificationEvent {
    /// Get the alert level for this event
    pub fn level(&self) -> AlertLevel {
        match self {
            NotificationEvent::ProviderTripped { .. } => AlertLevel::Critical,
            NotificationEvent::OrderResult {
                outcome: OrderOutcome::Failed { .. },
                ..
            } => AlertLevel::Important,
            NotificationEvent::MonitorDegraded { .. } => AlertLevel::Important,
            NotificationEvent::OrderResult { .. } => AlertLevel::Info,
            NotificationEvent::PurchaseDetected { .. } => AlertLevel::Info,
            NotificationEvent::MonitorRecovered { .. } => AlertLevel::Info,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        match self {
            NotificationEvent::PurchaseDetected { event, owners } => format!(
                "{} bought {} of {} for {} {} ({} owners)",
                event.wallet_address,
                event.acquired_amount,
                event.acquired_mint,
                event.paid_amount,
                event.paid_mint,
                owners.len()
            ),
            NotificationEvent::OrderResult { owner_id, outcome } => match outcome {
                OrderOutcome::Confirmed(receipt) => format!(
                    "order {} for {} confirmed via {}: {}",
                    receipt.order_id, owner_id, receipt.provider, receipt.signature
                ),
                OrderOutcome::Failed { order_id, reason, .. } => {
                    format!("order {} for {} failed: {}", order_id, owner_id, reason)
                }
            },
            NotificationEvent::ProviderTripped { provider, reason } => {
                format!("provider {} disabled: {}", provider, reason)
            }
            NotificationEvent::MonitorDegraded {
                address,
                consecutive_failures,
            } => format!(
                "monitor for {} degraded after {} reconnect failures",
                address, consecutive_failures
            ),
            NotificationEvent::MonitorRecovered { address } => {
                format!("monitor for {} recovered", address)
            }
        }
    }

    /// Key used to rate limit similar events
    pub fn rate_key(&self) -> String {
        match self {
            NotificationEvent::PurchaseDetected { event, .. } => {
                format!("purchase:{}", event.source_signature)
            }
            NotificationEvent::OrderResult { owner_id, outcome } => match outcome {
                OrderOutcome::Confirmed(receipt) => format!("order:{}", receipt.order_id),
                OrderOutcome::Failed { order_id, .. } => format!("order:{}:{}", owner_id, order_id),
            },
            NotificationEvent::ProviderTripped { provider, .. } => format!("breaker:{}", provider),
            NotificationEvent::MonitorDegraded { address, .. } => format!("degraded:{}", address),
            NotificationEvent::MonitorRecovered { address } => format!("recovered:{}", address),
        }
    }
}

/// Notification service trait
#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    /// Send a notification
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()>;

    /// Check if the service is enabled
    fn is_enabled(&self) -> bool;
}

/// Writes every event to the log
pub struct TracingNotifier;

#[async_trait::async_trait]
impl NotificationService for TracingNotifier {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()> {
        match event.level() {
            AlertLevel::Critical => tracing::error!(level = %event.level(), "{}", event.summary()),
            AlertLevel::Important => tracing::warn!(level = %event.level(), "{}", event.summary()),
            AlertLevel::Info => tracing::info!(level = %event.level(), "{}", event.summary()),
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Composite notifier that can send to multiple services
pub struct CompositeNotifier {
    services: Vec<Arc<dyn NotificationService>>,
}

impl CompositeNotifier {
    /// Create a new composite notifier
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    /// Add a notification service
    pub fn add_service(&mut self, service: Arc<dyn NotificationService>) {
        self.services.push(service);
    }

    /// Send notification to all enabled services
    pub async fn notify(&self, event: NotificationEvent) {
        for service in &self.services {
            if service.is_enabled() {
                if let Err(e) = service.notify(event.clone()).await {
                    tracing::error!(
                        error = %e,
                        event = ?event.level(),
                        "Failed to send notification"
                    );
                }
            }
        }
    }

    /// Deliver in the background
    pub fn notify_detached(self: &Arc<Self>, event: NotificationEvent) {
        if self.services.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.notify(event).await;
        });
    }
}

impl Default for CompositeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

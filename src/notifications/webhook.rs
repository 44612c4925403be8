//! Webhook notification service
//!
//! POSTs each event as JSON to a collaborator endpoint, with rate limiting
//! of repeated non-critical events.

use super::{AlertLevel, NotificationEvent, NotificationService};
use crate::config::NotificationsConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter for notifications
struct RateLimiter {
    /// Last sent time for each message key
    last_sent: RwLock<HashMap<String, Instant>>,
    /// Minimum interval between messages
    interval: Duration,
}

impl RateLimiter {
    fn new(interval_seconds: u64) -> Self {
        Self {
            last_sent: RwLock::new(HashMap::new()),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    fn can_send(&self, key: &str) -> bool {
        let last_sent = self.last_sent.read();
        match last_sent.get(key) {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    fn mark_sent(&self, key: &str) {
        let mut last_sent = self.last_sent.write();
        last_sent.retain(|_, at| at.elapsed() < self.interval);
        last_sent.insert(key.to_string(), Instant::now());
    }
}

/// Webhook notification service
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
    enabled: bool,
    rate_limiter: RateLimiter,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: config.webhook_url.clone().unwrap_or_default(),
            client,
            enabled: config.enabled,
            rate_limiter: RateLimiter::new(config.rate_limit_seconds),
        })
    }
}

#[async_trait::async_trait]
impl NotificationService for WebhookNotifier {
    async fn notify(&self, event: NotificationEvent) -> anyhow::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        // Critical alerts bypass the rate limit
        let rate_key = event.rate_key();
        if event.level() != AlertLevel::Critical && !self.rate_limiter.can_send(&rate_key) {
            tracing::debug!(key = %rate_key, "Rate limited, skipping webhook notification");
            return Ok(());
        }

        let payload = serde_json::json!({
            "level": event.level(),
            "summary": event.summary(),
            "event": &event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Webhook error: {} - {}", status, body);
        }

        self.rate_limiter.mark_sent(&rate_key);
        tracing::debug!(level = %event.level(), "Sent webhook notification");

        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled && !self.url.is_empty()
    }
}

//! Circuit breakers for execution providers
//!
//! One breaker per provider, each behind its own lock so unrelated providers
//! never contend. A breaker opens after `failure_threshold` consecutive
//! failures that all fall inside `failure_window`, stays open for `cooldown`,
//! then closes lazily on the next read. Any success closes it immediately.

use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    /// Provider receives attempts
    Closed,
    /// Provider is skipped until the cool-down elapses
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
        }
    }
}

/// Health of a single provider
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub consecutive_failures: u32,
    /// Start of the current failure streak
    pub streak_started: Option<Instant>,
    pub opened_at: Option<Instant>,
    pub state: BreakerState,
}

impl ProviderHealth {
    fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            consecutive_failures: 0,
            streak_started: None,
            opened_at: None,
            state: BreakerState::Closed,
        }
    }
}

/// Serializable view for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthSnapshot {
    pub provider: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    /// Seconds until an open breaker closes
    pub reopens_in_secs: Option<u64>,
}

/// Per-provider breaker registry
///
/// The provider set is fixed at construction, so the outer map needs no lock.
pub struct ProviderBreakers {
    failure_threshold: u32,
    failure_window: Duration,
    cooldown: Duration,
    providers: HashMap<String, Mutex<ProviderHealth>>,
}

impl ProviderBreakers {
    pub fn new<I, S>(config: &CircuitBreakerConfig, provider_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let providers = provider_ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), Mutex::new(ProviderHealth::new(id)))
            })
            .collect();

        Self {
            failure_threshold: config.failure_threshold.max(1),
            failure_window: config.failure_window(),
            cooldown: config.cooldown(),
            providers,
        }
    }

    /// Current state, closing the breaker if its cool-down elapsed
    pub fn state(&self, provider: &str) -> BreakerState {
        let Some(health) = self.providers.get(provider) else {
            return BreakerState::Closed;
        };
        let mut health = health.lock();
        self.expire_cooldown(&mut health);
        health.state
    }

    pub fn is_open(&self, provider: &str) -> bool {
        self.state(provider) == BreakerState::Open
    }

    /// When the breaker opened, if it is open
    pub fn opened_at(&self, provider: &str) -> Option<Instant> {
        let health = self.providers.get(provider)?;
        let mut health = health.lock();
        self.expire_cooldown(&mut health);
        match health.state {
            BreakerState::Open => health.opened_at,
            BreakerState::Closed => None,
        }
    }

    /// Record a provider failure. Returns true when this failure opened the breaker.
    pub fn record_failure(&self, provider: &str) -> bool {
        let Some(health) = self.providers.get(provider) else {
            return false;
        };
        let mut health = health.lock();
        self.expire_cooldown(&mut health);

        let now = Instant::now();
        match health.streak_started {
            Some(started) if now.duration_since(started) <= self.failure_window => {
                health.consecutive_failures += 1;
            }
            _ => {
                health.streak_started = Some(now);
                health.consecutive_failures = 1;
            }
        }

        if health.state == BreakerState::Closed
            && health.consecutive_failures >= self.failure_threshold
        {
            health.state = BreakerState::Open;
            health.opened_at = Some(now);
            tracing::error!(
                provider = %provider,
                failures = health.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Provider circuit breaker opened"
            );
            return true;
        }

        false
    }

    /// Record a provider success, closing the breaker
    pub fn record_success(&self, provider: &str) {
        let Some(health) = self.providers.get(provider) else {
            return;
        };
        let mut health = health.lock();
        if health.state == BreakerState::Open {
            tracing::info!(provider = %provider, "Provider circuit breaker closed after success");
        }
        health.consecutive_failures = 0;
        health.streak_started = None;
        health.opened_at = None;
        health.state = BreakerState::Closed;
    }

    pub fn snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let now = Instant::now();
        let mut out: Vec<ProviderHealthSnapshot> = self
            .providers
            .values()
            .map(|health| {
                let mut health = health.lock();
                self.expire_cooldown(&mut health);
                let reopens_in_secs = match (health.state, health.opened_at) {
                    (BreakerState::Open, Some(opened)) => Some(
                        (opened + self.cooldown)
                            .saturating_duration_since(now)
                            .as_secs(),
                    ),
                    _ => None,
                };
                ProviderHealthSnapshot {
                    provider: health.provider_id.clone(),
                    state: health.state,
                    consecutive_failures: health.consecutive_failures,
                    reopens_in_secs,
                }
            })
            .collect();
        out.sort_by(|a, b| a.provider.cmp(&b.provider));
        out
    }

    fn expire_cooldown(&self, health: &mut ProviderHealth) {
        if health.state != BreakerState::Open {
            return;
        }
        if let Some(opened) = health.opened_at {
            if Instant::now().duration_since(opened) >= self.cooldown {
                tracing::info!(provider = %health.provider_id, "Provider circuit breaker cool-down elapsed");
                health.state = BreakerState::Closed;
                health.opened_at = None;
                health.consecutive_failures = 0;
                health.streak_started = None;
            }
        }
    }
}

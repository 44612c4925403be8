//! Configuration management for Tandem Operator
//!
//! Loads configuration from YAML files and environment variables.
//! Environment variables override YAML values.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::default_base_mints;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Ledger RPC endpoints and gateway tuning
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Execution providers
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Provider circuit breaker thresholds
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerConfig,
    /// Order execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Wallet activity monitoring
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Default copy-trade settings
    #[serde(default)]
    pub copy_trade: CopyTradeConfig,
    /// Outbound notification webhook
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Addresses to watch at start-up
    #[serde(default)]
    pub watch: Vec<WatchEntry>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Ledger RPC configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Primary RPC endpoint URL
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    /// Additional endpoints the pool spreads connections over
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    /// Websocket endpoint for the push channel
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,
    /// Number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// A connection that failed within this window is not preferred
    #[serde(default = "default_failure_cooldown")]
    pub failure_cooldown_ms: u64,
    /// Batch collection window in milliseconds
    #[serde(default = "default_batch_window")]
    pub batch_window_ms: u64,
    /// Maximum requests folded into one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_primary_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_ws_url() -> String {
    "wss://api.mainnet-beta.solana.com".to_string()
}

fn default_rpc_timeout() -> u64 {
    2000
}

fn default_pool_size() -> usize {
    4
}

fn default_failure_cooldown() -> u64 {
    5000
}

fn default_batch_window() -> u64 {
    25
}

fn default_max_batch_size() -> usize {
    50
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            fallback_urls: Vec::new(),
            ws_url: default_ws_url(),
            timeout_ms: default_rpc_timeout(),
            pool_size: default_pool_size(),
            failure_cooldown_ms: default_failure_cooldown(),
            batch_window_ms: default_batch_window(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl RpcConfig {
    /// All endpoints, primary first, without duplicates
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints = vec![self.primary_url.clone()];
        for url in &self.fallback_urls {
            if !url.trim().is_empty() && !endpoints.contains(url) {
                endpoints.push(url.clone());
            }
        }
        endpoints
    }
}

/// Execution provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Jupiter,
    Raydium,
}

/// Single execution provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Adapter kind
    pub kind: ProviderKind,
    /// API base URL
    pub api_url: String,
    /// HTTP timeout in milliseconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: u64,
}

fn default_provider_timeout() -> u64 {
    3000
}

/// Primary and secondary execution providers
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_primary_provider")]
    pub primary: ProviderConfig,
    #[serde(default = "default_secondary_provider")]
    pub secondary: ProviderConfig,
}

fn default_primary_provider() -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Jupiter,
        api_url: "https://lite-api.jup.ag/swap/v1".to_string(),
        timeout_ms: default_provider_timeout(),
    }
}

fn default_secondary_provider() -> ProviderConfig {
    ProviderConfig {
        kind: ProviderKind::Raydium,
        api_url: "https://transaction-v1.raydium.io".to_string(),
        timeout_ms: default_provider_timeout(),
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_provider(),
            secondary: default_secondary_provider(),
        }
    }
}

/// Provider circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Window in which the consecutive failures must occur
    #[serde(default = "default_failure_window")]
    pub failure_window_secs: u64,
    /// How long an open breaker stays open
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window(),
            cooldown_secs: default_cooldown(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Order execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Upper bound accepted for an intent's slippage
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    /// Price impact ceiling (percent) above which a quote counts as a provider failure
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact_pct: f64,
    #[serde(default = "default_quote_timeout")]
    pub quote_timeout_ms: u64,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_confirm_poll_interval")]
    pub confirm_poll_interval_ms: u64,
    #[serde(default = "default_confirm_max_polls")]
    pub confirm_max_polls: u32,
    /// Re-quotes allowed when a quote expires before submission
    #[serde(default = "default_max_requotes")]
    pub max_requotes: u32,
    /// Lifetime of a quote
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_ms: u64,
    /// Retention of the last failed order per owner
    #[serde(default = "default_failed_order_ttl")]
    pub failed_order_ttl_secs: u64,
}

fn default_max_slippage_bps() -> u32 {
    5000
}

fn default_max_price_impact() -> f64 {
    25.0
}

fn default_quote_timeout() -> u64 {
    3000
}

fn default_submit_timeout() -> u64 {
    5000
}

fn default_confirm_poll_interval() -> u64 {
    2000
}

fn default_confirm_max_polls() -> u32 {
    20
}

fn default_max_requotes() -> u32 {
    2
}

fn default_quote_ttl() -> u64 {
    15_000
}

fn default_failed_order_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: default_max_slippage_bps(),
            max_price_impact_pct: default_max_price_impact(),
            quote_timeout_ms: default_quote_timeout(),
            submit_timeout_ms: default_submit_timeout(),
            confirm_poll_interval_ms: default_confirm_poll_interval(),
            confirm_max_polls: default_confirm_max_polls(),
            max_requotes: default_max_requotes(),
            quote_ttl_ms: default_quote_ttl(),
            failed_order_ttl_secs: default_failed_order_ttl(),
        }
    }
}

/// Wallet activity monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Poll loop interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Signatures fetched per poll
    #[serde(default = "default_signature_fetch_limit")]
    pub signature_fetch_limit: usize,
    /// Capacity of the recently-seen signature set
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,
    /// Fixed delay between push channel reconnects
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Consecutive reconnect failures before the monitor reports degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after_failures: u32,
    /// How long an event is held to restore on-chain order; events arriving
    /// further apart than this are delivered in arrival order
    #[serde(default = "default_reorder_hold")]
    pub reorder_hold_ms: u64,
    /// Mark pre-existing signatures as seen on the first poll
    #[serde(default = "default_true")]
    pub prime_on_start: bool,
    /// Base assets that count as payment when classifying acquisitions
    #[serde(default = "default_base_mints")]
    pub base_mints: Vec<String>,
    /// Per-subscriber delivery queue capacity
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    8
}

fn default_signature_fetch_limit() -> usize {
    20
}

fn default_seen_capacity() -> usize {
    1000
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_degraded_after() -> u32 {
    5
}

fn default_reorder_hold() -> u64 {
    1500
}

fn default_subscriber_queue() -> usize {
    256
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            signature_fetch_limit: default_signature_fetch_limit(),
            seen_capacity: default_seen_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
            degraded_after_failures: default_degraded_after(),
            reorder_hold_ms: default_reorder_hold(),
            prime_on_start: true,
            base_mints: default_base_mints(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/tandem.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Copy-trade defaults applied to owners without explicit settings
#[derive(Debug, Clone, Deserialize)]
pub struct CopyTradeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_buy_amount")]
    pub buy_amount_sol: f64,
    #[serde(default = "default_max_buy")]
    pub max_buy_sol: f64,
    #[serde(default = "default_copy_slippage")]
    pub max_slippage_bps: u32,
}

fn default_buy_amount() -> f64 {
    0.1
}

fn default_max_buy() -> f64 {
    1.0
}

fn default_copy_slippage() -> u32 {
    500
}

impl Default for CopyTradeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buy_amount_sol: default_buy_amount(),
            max_buy_sol: default_max_buy(),
            max_slippage_bps: default_copy_slippage(),
        }
    }
}

/// Notification webhook configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Collaborator endpoint receiving JSON events
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Minimum interval between similar non-critical events
    #[serde(default = "default_rate_limit")]
    pub rate_limit_seconds: u64,
}

fn default_rate_limit() -> u64 {
    60
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            rate_limit_seconds: default_rate_limit(),
        }
    }
}

/// Address registered at start-up
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEntry {
    pub address: String,
    pub owner_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rpc: RpcConfig::default(),
            providers: ProvidersConfig::default(),
            circuit_breakers: CircuitBreakerConfig::default(),
            execution: ExecutionConfig::default(),
            monitoring: MonitoringConfig::default(),
            database: DatabaseConfig::default(),
            copy_trade: CopyTradeConfig::default(),
            notifications: NotificationsConfig::default(),
            watch: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (TANDEM__*)
    /// 2. config/config.yaml (if exists)
    /// 3. config.yaml (if exists)
    /// 4. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "data/tandem.db")?
            .set_default("rpc.primary_url", "https://api.mainnet-beta.solana.com")?
            .set_default("rpc.timeout_ms", 2000)?
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config/config").required(false))
            // TANDEM__RPC__POOL_SIZE=8 -> rpc.pool_size = 8
            .add_source(
                Environment::with_prefix("TANDEM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rpc.fallback_urls")
                    .with_list_parse_key("monitoring.base_mints"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.primary_url.trim().is_empty() {
            return Err(ConfigError::Message("RPC primary URL must be set".to_string()));
        }

        if self.rpc.pool_size == 0 {
            return Err(ConfigError::Message("rpc.pool_size must be at least 1".to_string()));
        }

        if self.circuit_breakers.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "circuit_breakers.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.execution.max_slippage_bps == 0 || self.execution.max_slippage_bps > 10_000 {
            return Err(ConfigError::Message(
                "execution.max_slippage_bps must be within 1..=10000".to_string(),
            ));
        }

        let primary = &self.providers.primary;
        let secondary = &self.providers.secondary;
        if primary.kind == secondary.kind && primary.api_url == secondary.api_url {
            return Err(ConfigError::Message(
                "primary and secondary providers must differ".to_string(),
            ));
        }

        if self.notifications.enabled && self.notifications.webhook_url.is_none() {
            return Err(ConfigError::Message(
                "notifications.webhook_url is required when notifications are enabled".to_string(),
            ));
        }

        if self.monitoring.seen_capacity == 0 {
            return Err(ConfigError::Message(
                "monitoring.seen_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

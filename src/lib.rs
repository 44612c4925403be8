//! Tandem Operator Library
//!
//! Event-detection-to-execution core for reactive trading on Solana:
//! wallet activity monitoring, multi-provider order execution, and the
//! shared ledger resource layer beneath both.

pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod monitoring;
pub mod notifications;
pub mod utils;

// Re-export commonly used types for tests
pub use circuit_breaker::{BreakerState, ProviderBreakers};
pub use config::AppConfig;
pub use db::DbPool;
pub use engine::{ExecutionProvider, OrderEngine, TransactionSigner};
pub use error::{AppError, AppResult, ExecutionError, ProviderError, TransportError};
pub use gateway::{LedgerClient, ResourceGateway};
pub use metrics::MetricsState;
pub use models::{OrderIntent, PurchaseEvent};
pub use monitoring::{MonitorSupervisor, PurchaseSubscriber};
pub use notifications::{CompositeNotifier, NotificationEvent};

//! Error types for Tandem Operator

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Ledger transport errors raised by the resource gateway
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Connection could not be established or was dropped
    #[error("connection failed: {0}")]
    Connect(String),

    /// Endpoint answered with a non-success HTTP status
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// JSON-RPC error object in the response
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Response body could not be interpreted
    #[error("decode error: {0}")]
    Decode(String),

    /// Gateway is shutting down
    #[error("gateway closed")]
    Closed,
}

impl TransportError {
    /// Whether the failure counts against the connection that produced it
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Status { .. } | TransportError::Timeout
        )
    }
}

/// Failure of a single execution provider for one attempt
///
/// Recovered inside the engine by advancing to the next provider.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Provider found no route for the pair
    #[error("no route found: {0}")]
    NoRoute(String),

    /// Quote price impact exceeds the allowed bound
    #[error("price impact {impact_pct:.2}% exceeds limit {limit_pct:.2}%")]
    PriceImpact { impact_pct: f64, limit_pct: f64 },

    /// Quote expired and the re-quote allowance is used up
    #[error("quote expired after {requotes} re-quotes")]
    QuoteExpired { requotes: u32 },

    /// Provider API rejected the request
    #[error("provider API error: {0}")]
    Api(String),

    /// Quote or submission exceeded its deadline
    #[error("{stage} timed out")]
    Timeout { stage: &'static str },

    /// Transaction could not be decoded or signed
    #[error("signing failed: {0}")]
    Signing(String),

    /// Network refused the transaction
    #[error("submission rejected: {0}")]
    Submission(String),

    /// Transaction landed but carries an on-chain error
    #[error("transaction {signature} failed on-chain: {reason}")]
    OnChain { signature: String, reason: String },

    /// Transaction not found within the verification window
    #[error("transaction {signature} not confirmed in time")]
    ConfirmationTimeout { signature: String },

    /// Provider skipped because its circuit breaker is open
    #[error("circuit breaker open")]
    CircuitOpen,

    /// Ledger transport failure during the attempt
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

impl ProviderError {
    /// Whether the failure is the provider's and feeds its circuit breaker
    pub fn counts_against_provider(&self) -> bool {
        !matches!(
            self,
            ProviderError::CircuitOpen | ProviderError::Transport(_) | ProviderError::Signing(_)
        )
    }
}

/// Per-provider failure reason inside an aggregated failure
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

/// All providers exhausted for one order
#[derive(Debug, Clone, serde::Serialize)]
pub struct AggregatedExecutionFailure {
    pub order_id: String,
    pub failures: Vec<ProviderFailure>,
}

impl std::fmt::Display for AggregatedExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all providers failed for order {}", self.order_id)?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.provider, failure.reason)?;
        }
        Ok(())
    }
}

/// Errors that cross the execution engine boundary
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// Intent rejected before any provider was contacted
    #[error("validation failed: {0}")]
    Validation(String),

    /// Every provider failed
    #[error("{0}")]
    Exhausted(AggregatedExecutionFailure),

    /// Ledger unreachable while resolving the order, before any provider was contacted
    #[error("ledger unavailable: {0}")]
    Ledger(#[from] TransportError),

    /// Network accepted the transaction but the expected balance change is absent
    #[error("verification mismatch: {provider} reported {signature} but no balance increase was observed")]
    VerificationMismatch { provider: String, signature: String },
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Ledger transport error
    #[error("RPC error: {0}")]
    Rpc(#[from] TransportError),

    /// Order execution error
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for API
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, status, reason) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error", "configuration_error"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error", "database_error"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "rejected", "validation_failed"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "rejected", "not_found"),
            AppError::Rpc(_) => (StatusCode::SERVICE_UNAVAILABLE, "error", "rpc_error"),
            AppError::Execution(ExecutionError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "rejected", "validation_failed")
            }
            AppError::Execution(_) => (StatusCode::BAD_GATEWAY, "error", "execution_failed"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error", "internal_error"),
        };

        let error_response = ErrorResponse {
            status,
            reason: reason.to_string(),
            details: Some(self.to_string()),
        };

        tracing::error!(
            error_type = %self,
            status_code = %status_code,
            "Request error"
        );

        (status_code, Json(json!(error_response))).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

//! Health check endpoint

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::circuit_breaker::{BreakerState, ProviderHealthSnapshot};
use crate::db::DbPool;
use crate::engine::OrderEngine;
use crate::gateway::{GatewayStats, ResourceGateway};
use crate::monitoring::{MonitorSnapshot, MonitorSupervisor};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Uptime in seconds
    pub uptime_seconds: i64,
    /// Running wallet monitors
    pub monitors_active: usize,
    /// Addresses whose transport keeps failing
    pub degraded_addresses: Vec<String>,
    pub monitors: Vec<MonitorSnapshot>,
    /// Provider circuit breakers
    pub providers: Vec<ProviderHealthSnapshot>,
    /// Connection pool and latency
    pub gateway: GatewayStats,
    /// Database status, absent when running without persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentHealth>,
}

/// Health status enum
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but operational
    Degraded,
    /// Critical systems failing
    Unhealthy,
}

/// Component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for health checks
pub struct AppState {
    pub supervisor: Arc<MonitorSupervisor>,
    pub engine: Arc<OrderEngine>,
    pub gateway: Arc<ResourceGateway>,
    pub db: Option<DbPool>,
    /// Application start time
    pub started_at: chrono::DateTime<Utc>,
}

/// Health check handler
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let uptime = (Utc::now() - state.started_at).num_seconds();

    let database = match &state.db {
        Some(pool) => Some(check_database(pool).await),
        None => None,
    };
    let monitors = state.supervisor.snapshot().await;
    let degraded_addresses = state.supervisor.degraded_addresses();
    let providers = state.engine.breakers().snapshot();
    let gateway = state.gateway.stats();

    let all_providers_open =
        !providers.is_empty() && providers.iter().all(|p| p.state == BreakerState::Open);
    let any_provider_open = providers.iter().any(|p| p.state == BreakerState::Open);

    let overall_status = if all_providers_open
        || matches!(database, Some(ComponentHealth { status: HealthStatus::Unhealthy, .. }))
    {
        HealthStatus::Unhealthy
    } else if any_provider_open || !degraded_addresses.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let status_code = match overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status: overall_status,
        uptime_seconds: uptime,
        monitors_active: state.supervisor.monitor_count(),
        degraded_addresses,
        monitors,
        providers,
        gateway,
        database,
    };

    (status_code, Json(response))
}

/// Check database health
async fn check_database(pool: &DbPool) -> ComponentHealth {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => ComponentHealth {
            status: HealthStatus::Healthy,
            message: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            ComponentHealth {
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
            }
        }
    }
}

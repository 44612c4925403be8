//! Tandem Operator - reactive trading core for Solana
//!
//! Starts the resource gateway, execution engine and monitor supervisor,
//! then serves the operator health and metrics endpoints.

use chrono::Utc;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tandem_operator::circuit_breaker::ProviderBreakers;
use tandem_operator::config::AppConfig;
use tandem_operator::engine::{self, KeypairSigner, OrderEngine, TransactionSigner};
use tandem_operator::gateway::ResourceGateway;
use tandem_operator::handlers::{self, AppState};
use tandem_operator::metrics::MetricsState;
use tandem_operator::monitoring::{
    CopySettings, CopyTradeSubscriber, MonitorSupervisor, NotificationSubscriber, SharedSigner,
    StaticSettings, WebSocketTransport,
};
use tandem_operator::db;
use tandem_operator::notifications::{CompositeNotifier, TracingNotifier, WebhookNotifier};

/// Hex-encoded keypair used for copy trading in single-wallet deployments
const WALLET_KEY_ENV: &str = "TANDEM_WALLET_KEY";

/// How often expired failed-order records are dropped
const FAILED_ORDER_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting Tandem Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        primary = ?config.providers.primary.kind,
        secondary = ?config.providers.secondary.kind,
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let metrics = Arc::new(MetricsState::new());

    let db_pool = db::init_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;
    tracing::info!(path = %config.database.path.display(), "Database initialized");

    // Notifications
    let mut notifier = CompositeNotifier::new();
    notifier.add_service(Arc::new(TracingNotifier));
    if config.notifications.enabled {
        notifier.add_service(Arc::new(WebhookNotifier::new(&config.notifications)?));
        tracing::info!("Webhook notifications enabled");
    }
    let notifier = Arc::new(notifier);

    // Resource gateway
    let gateway = Arc::new(ResourceGateway::http(&config.rpc, metrics.clone())?);
    tracing::info!(
        endpoints = config.rpc.endpoints().len(),
        pool_size = config.rpc.pool_size,
        "Resource gateway started"
    );

    // Execution engine
    let quote_ttl = Duration::from_millis(config.execution.quote_ttl_ms);
    let primary = engine::build_provider("primary", &config.providers.primary, quote_ttl)?;
    let secondary = engine::build_provider("secondary", &config.providers.secondary, quote_ttl)?;
    let breakers = Arc::new(ProviderBreakers::new(
        &config.circuit_breakers,
        [primary.id(), secondary.id()],
    ));
    let order_engine = Arc::new(
        OrderEngine::new(
            config.execution.clone(),
            primary,
            secondary,
            gateway.clone(),
            breakers,
            metrics.clone(),
        )
        .with_db(db_pool.clone())
        .with_notifier(notifier.clone()),
    );
    tracing::info!(providers = ?order_engine.provider_ids(), "Order engine initialized");

    // Monitor supervisor
    let supervisor = Arc::new(MonitorSupervisor::new(
        gateway.clone(),
        Arc::new(WebSocketTransport::new(&config.rpc.ws_url)),
        config.monitoring.clone(),
        metrics.clone(),
        Some(notifier.clone()),
        cancel.child_token(),
    ));
    supervisor.add_subscriber(Arc::new(NotificationSubscriber::new(notifier.clone())));

    if config.copy_trade.enabled {
        match std::env::var(WALLET_KEY_ENV) {
            Ok(key) => {
                let signer = KeypairSigner::new(SecretString::new(key))?;
                tracing::info!(wallet = %signer.public_key(), "Copy trading enabled");
                supervisor.add_subscriber(Arc::new(CopyTradeSubscriber::new(
                    order_engine.clone(),
                    Arc::new(StaticSettings::new(CopySettings::from(&config.copy_trade))),
                    Arc::new(SharedSigner::new(Arc::new(signer))),
                )));
            }
            Err(_) => {
                tracing::warn!(env = WALLET_KEY_ENV, "Copy trading enabled but no wallet key set, skipping");
            }
        }
    }

    for entry in &config.watch {
        if let Err(e) = supervisor.register_watch(&entry.address, &entry.owner_id).await {
            tracing::warn!(address = %entry.address, error = %e, "Skipping invalid watch entry");
        }
    }
    tracing::info!(monitors = supervisor.monitor_count(), "Monitor supervisor started");

    // Failed-order pruning
    let prune_engine = order_engine.clone();
    let prune_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FAILED_ORDER_PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = prune_cancel.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = prune_engine.prune_failed_orders();
                    if pruned > 0 {
                        tracing::debug!(pruned, "Pruned expired failed orders");
                    }
                }
            }
        }
    });

    let app_state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        engine: order_engine,
        gateway: gateway.clone(),
        db: Some(db_pool),
        started_at: Utc::now(),
    });
    let app = handlers::router(app_state, metrics);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    supervisor.shutdown().await;
    gateway.shutdown().await;
    tracing::info!("Tandem Operator stopped");

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM and cancel background work
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_operator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Load and validate configuration
fn load_config() -> anyhow::Result<AppConfig> {
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    Ok(config)
}

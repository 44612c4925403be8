//! Database module for Tandem Operator
//!
//! Manages SQLite connection pool with WAL mode and records orders and their
//! execution attempts. Attempts are insert-only.

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ExecutionAttempt, OrderIntent, OrderStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

/// Type alias for the SQLite connection pool
pub type DbPool = Pool<Sqlite>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL UNIQUE,
    owner_id TEXT NOT NULL,
    token_address TEXT NOT NULL,
    side TEXT NOT NULL,
    amount TEXT NOT NULL,
    max_slippage_bps INTEGER NOT NULL,
    status TEXT NOT NULL,
    originating_event TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_orders_owner ON orders(owner_id);

CREATE TABLE IF NOT EXISTS execution_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL REFERENCES orders(order_id),
    provider TEXT NOT NULL,
    submitted_at TEXT,
    signature TEXT,
    outcome TEXT NOT NULL,
    detail TEXT,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_attempts_order ON execution_attempts(order_id)
"#;

/// Initialize the database connection pool
pub async fn init_pool(config: &DatabaseConfig) -> AppResult<DbPool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(format!("Failed to create database directory: {}", e))
            })?;
            info!(path = ?parent, "Created database directory");
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", config.path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)?
        // Enable WAL mode for concurrent reads
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    info!(
        path = ?config.path,
        max_connections = config.max_connections,
        "Database pool initialized"
    );

    Ok(pool)
}

/// Apply the embedded schema
pub async fn run_migrations(pool: &DbPool) -> AppResult<()> {
    // SQLite doesn't support multiple statements in one query
    for statement in SCHEMA.split(';') {
        let stmt = statement.trim();
        if stmt.is_empty() {
            continue;
        }
        sqlx::query(stmt).execute(pool).await?;
    }

    info!("Database schema applied successfully");
    Ok(())
}

/// Insert an order record
pub async fn insert_order(
    pool: &DbPool,
    order_id: &str,
    intent: &OrderIntent,
    status: OrderStatus,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_id, owner_id, token_address, side, amount,
            max_slippage_bps, status, originating_event
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(order_id)
    .bind(&intent.owner_id)
    .bind(&intent.token_address)
    .bind(intent.side.to_string())
    .bind(intent.amount.to_string())
    .bind(intent.max_slippage_bps as i64)
    .bind(status.to_string())
    .bind(intent.originating_event_id.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Update order status
pub async fn update_order_status(pool: &DbPool, order_id: &str, status: OrderStatus) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET status = ?, updated_at = datetime('now')
        WHERE order_id = ?
        "#,
    )
    .bind(status.to_string())
    .bind(order_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append a settled execution attempt
pub async fn insert_execution_attempt(pool: &DbPool, attempt: &ExecutionAttempt) -> AppResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO execution_attempts (
            order_id, provider, submitted_at, signature, outcome, detail
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&attempt.order_id)
    .bind(&attempt.provider)
    .bind(attempt.submitted_at.map(|t| t.to_rfc3339()))
    .bind(attempt.signature.as_deref())
    .bind(attempt.outcome.to_string())
    .bind(attempt.detail.as_deref())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Get the stored status of an order
pub async fn get_order_status(pool: &DbPool, order_id: &str) -> AppResult<Option<OrderStatus>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE order_id = ?")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

    row.map(|(status,)| status.parse::<OrderStatus>().map_err(AppError::Internal))
        .transpose()
}

/// Attempt row as stored
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttemptRecord {
    pub provider: String,
    pub signature: Option<String>,
    pub outcome: String,
    pub detail: Option<String>,
}

/// Attempts of an order in insertion order
pub async fn get_execution_attempts(pool: &DbPool, order_id: &str) -> AppResult<Vec<AttemptRecord>> {
    let rows = sqlx::query_as::<_, AttemptRecord>(
        r#"
        SELECT provider, signature, outcome, detail
        FROM execution_attempts
        WHERE order_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Count orders by status
pub async fn count_orders_by_status(pool: &DbPool, status: OrderStatus) -> AppResult<i64> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = ?")
        .bind(status.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Terminal process startup                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← pool settings + LedgerConfig                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← create pool + run migrations             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                            │
//! │  │            SqlitePool                   │                            │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐        │  (max_connections)         │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...    │                            │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘        │                            │
//! │  └─────────────────────────────────────────┘                            │
//! │       │                                                                 │
//! │       │ Concurrent ledger calls from multiple terminals                 │
//! │       ▼                                                                 │
//! │  Readers run in parallel under WAL; SQLite serializes writers.          │
//! │  A writer that loses the race sees SQLITE_BUSY → Contention, and the    │
//! │  caller retries. Nobody queues indefinitely.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled for:
//! - Better concurrent read performance
//! - Readers don't block writers, writers don't block readers
//! - Better crash recovery

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use dukan_core::{LedgerConfig, TransferService};

use crate::audit::AuditTrail;
use crate::error::{DbError, DbResult};
use crate::ledger::repairs::RepairLedger;
use crate::ledger::sales::SalesEngine;
use crate::ledger::stock::StockLedger;
use crate::ledger::transfers::TransferLedger;
use crate::ledger::users::UserLedger;
use crate::migrations;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/dukan.db")
///     .max_connections(5)
///     .ledger(ledger_config_from_env());
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5 (sufficient for a handful of terminals)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Pool acquire timeout. Exceeding it surfaces as `Contention`.
    pub acquire_timeout: Duration,

    /// How long a connection waits on SQLITE_BUSY before giving up.
    /// Kept short: losers of a write race must fail fast, not deadlock.
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect. Default: true
    pub run_migrations: bool,

    /// Ledger behavior flags (backorder, overdraft, tax rate).
    pub ledger: LedgerConfig,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_millis(500),
            run_migrations: true,
            ledger: LedgerConfig::default(),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the ledger behavior flags.
    pub fn ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection keeps the in-memory database alive and makes
    /// tests deterministic: concurrent operations serialize on the pool.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_millis(500),
            run_migrations: true,
            ledger: LedgerConfig::default(),
        }
    }
}

/// Reads ledger behavior flags from the environment:
///
/// - `DUKAN_ALLOW_BACKORDER`: `1`/`true` permits negative stock
/// - `DUKAN_TAX_RATE_BPS`: whole-shop tax rate in basis points
/// - `DUKAN_OVERDRAFT_SERVICES`: comma-separated service names that may
///   cash out beyond their balance, e.g. `vodafone_cash,card_charge`
pub fn ledger_config_from_env() -> LedgerConfig {
    let mut config = LedgerConfig::default();

    if let Ok(value) = std::env::var("DUKAN_ALLOW_BACKORDER") {
        config.allow_backorder = matches!(value.trim(), "1" | "true" | "yes");
    }

    if let Ok(value) = std::env::var("DUKAN_TAX_RATE_BPS") {
        match value.trim().parse::<u32>() {
            Ok(bps) => config.tax_rate_bps = bps,
            Err(_) => warn!(value, "Ignoring unparseable DUKAN_TAX_RATE_BPS"),
        }
    }

    if let Ok(value) = std::env::var("DUKAN_OVERDRAFT_SERVICES") {
        for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let service = TransferService::ALL
                .into_iter()
                .find(|s| s.as_str() == name);
            match service {
                Some(service) => {
                    config.overdraft.insert(service, true);
                }
                None => warn!(name, "Ignoring unknown service in DUKAN_OVERDRAFT_SERVICES"),
            }
        }
    }

    config
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing ledger access.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./dukan.db")).await?;
///
/// let invoice = db.sales().create_draft(&cashier_id, None).await?;
/// db.sales().add_line(&invoice.id, &product_id, 2, &cashier_id).await?;
/// db.sales().finalize(&invoice.id, PaymentMethod::Cash, &cashier_id).await?;
/// ```
///
/// Cloning is cheap; the pool and ledger configuration are shared.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    ledger_config: Arc<LedgerConfig>,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite for a multi-terminal shop:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous (balance of safety/speed)
    ///    - Foreign keys enabled
    ///    - Short busy timeout so write races fail fast
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_options = if config.database_path == PathBuf::from(":memory:") {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            // sqlite://path?mode=rwc creates the file if not exists
            let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
            SqliteConnectOptions::from_str(&url)
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .create_if_missing(true)
        };

        let connect_options = connect_options
            // WAL mode: readers don't block writers and vice versa
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL synchronous: safe from corruption, may lose the very
            // last transaction on power cut
            .synchronous(SqliteSynchronous::Normal)
            // SQLite ships with foreign keys off for backwards compatibility
            .foreign_keys(true)
            // Losers of a write race wait at most this long, then surface
            // SQLITE_BUSY which the ledgers map to Contention
            .busy_timeout(config.busy_timeout);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            ledger_config: Arc::new(config.ledger.clone()),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent; automatically called by
    /// `new()` unless disabled in the config.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns a reference to the connection pool.
    ///
    /// For read-only queries not covered by the ledger surfaces. Writing
    /// ledger state through this bypasses every invariant; don't.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The active ledger behavior flags.
    pub fn ledger_config(&self) -> &LedgerConfig {
        &self.ledger_config
    }

    /// Returns the inventory stock ledger.
    pub fn stock(&self) -> StockLedger {
        StockLedger::new(self.pool.clone(), self.ledger_config.clone())
    }

    /// Returns the sales engine.
    pub fn sales(&self) -> SalesEngine {
        SalesEngine::new(self.pool.clone(), self.ledger_config.clone())
    }

    /// Returns the repair ticket ledger.
    pub fn repairs(&self) -> RepairLedger {
        RepairLedger::new(self.pool.clone(), self.ledger_config.clone())
    }

    /// Returns the transfer ledger.
    pub fn transfers(&self) -> TransferLedger {
        TransferLedger::new(self.pool.clone(), self.ledger_config.clone())
    }

    /// Returns the user / permission ledger.
    pub fn users(&self) -> UserLedger {
        UserLedger::new(self.pool.clone())
    }

    /// Returns the audit trail.
    pub fn audit(&self) -> AuditTrail {
        AuditTrail::new(self.pool.clone())
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db").max_connections(10);
        assert_eq!(config.max_connections, 10);
        assert!(!config.ledger.allow_backorder);
    }
}

//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← adds context and categorization                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CoreError (dukan-core) ← the kinds collaborators see:                  │
//! │       Busy/PoolExhausted → Contention (retryable)                       │
//! │       NotFound           → NotFound                                     │
//! │       everything else    → Storage                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dukan_core::CoreError;
use thiserror::Error;

/// Database operation errors.
///
/// These wrap sqlx errors and provide additional context before being
/// mapped to the core error kinds at the ledger surface.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation (duplicate SKU, invoice number, ...).
    #[error("Duplicate {field}: already exists")]
    UniqueViolation { field: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Another writer holds the database lock. Mapped to `Contention`;
    /// callers retry with backoff instead of queuing indefinitely.
    #[error("Database is busy")]
    Busy,

    /// Pool exhausted (all connections in use past the acquire timeout).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → analyze code/message for constraint or lock
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();

                // SQLITE_BUSY (5) and SQLITE_BUSY_SNAPSHOT (517): a concurrent
                // writer won the race. SQLITE_LOCKED (6/262) for table locks.
                if matches!(code.as_str(), "5" | "6" | "262" | "517")
                    || msg.contains("database is locked")
                    || msg.contains("database table is locked")
                {
                    DbError::Busy
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation { field }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation { message: msg }
                } else {
                    DbError::QueryFailed(msg)
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Map database failures to the core error kinds collaborators see.
///
/// Lock contention and pool exhaustion both become `Contention`, the one
/// retryable kind. Everything else that isn't a NotFound is a storage
/// failure that aborts the business operation.
impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Busy | DbError::PoolExhausted => CoreError::Contention,
            DbError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            other => CoreError::Storage(other.to_string()),
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

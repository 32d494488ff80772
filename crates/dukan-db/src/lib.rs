//! # Dukan DB
//!
//! SQLite persistence for the Dukan POS business ledger.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         dukan-db                                        │
//! │                                                                         │
//! │  Collaborator (UI / CLI / reports)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database ──┬── StockLedger      (ledger/stock.rs)                      │
//! │             ├── SalesEngine      (ledger/sales.rs)                      │
//! │             ├── RepairLedger     (ledger/repairs.rs)                    │
//! │             ├── TransferLedger   (ledger/transfers.rs)                  │
//! │             ├── UserLedger       (ledger/users.rs)                      │
//! │             └── AuditTrail       (audit.rs)                             │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │             SqlitePool (WAL, single writer)                             │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │             migrations/sqlite/*.sql (embedded)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Business rules live in `dukan-core`; this crate binds them to storage and
//! makes every mutating operation atomic.

pub mod audit;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod pool;

pub use audit::AuditTrail;
pub use error::{DbError, DbResult};
pub use ledger::repairs::{NewTicket, RepairLedger};
pub use ledger::sales::SalesEngine;
pub use ledger::stock::{NewProduct, ProductPatch, Reconciliation, StockLedger};
pub use ledger::transfers::TransferLedger;
pub use ledger::users::UserLedger;
pub use pool::{ledger_config_from_env, Database, DbConfig};

/// The atomic unit: every mutating ledger operation runs inside one of
/// these. Dropping it without commit rolls everything back, including the
/// audit entry written alongside the mutation.
pub type UnitOfWork<'c> = sqlx::Transaction<'c, sqlx::Sqlite>;

// ============================================================================
// Shared test fixtures
// ============================================================================

#[cfg(test)]
pub(crate) mod testutil {
    use crate::pool::{Database, DbConfig};
    use dukan_core::{LedgerConfig, Product};

    /// In-memory database with a bootstrapped admin and one category.
    /// Returns `(db, admin_id, category_id)`.
    pub async fn shop() -> (Database, String, String) {
        shop_with(LedgerConfig::default()).await
    }

    pub async fn shop_with(ledger: LedgerConfig) -> (Database, String, String) {
        let db = Database::new(DbConfig::in_memory().ledger(ledger))
            .await
            .unwrap();
        let admin = db
            .users()
            .bootstrap_admin("admin", "Administrator", "s3cret!")
            .await
            .unwrap();
        let category = db.stock().create_category("Parts", &admin.id).await.unwrap();
        (db, admin.id, category.id)
    }

    /// Creates a product under the given category with opening stock.
    pub async fn seed_product(
        db: &Database,
        admin_id: &str,
        category_id: &str,
        sku: &str,
        price_cents: i64,
        opening_quantity: i64,
    ) -> Product {
        db.stock()
            .create_product(
                crate::ledger::stock::NewProduct {
                    sku: sku.to_string(),
                    name: format!("{sku} part"),
                    description: None,
                    category_id: category_id.to_string(),
                    supplier_id: None,
                    cost_cents: price_cents / 2,
                    price_cents,
                    reorder_level: 2,
                    opening_quantity,
                },
                admin_id,
            )
            .await
            .unwrap()
    }
}

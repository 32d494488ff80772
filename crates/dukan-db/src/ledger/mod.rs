//! # Ledger Module
//!
//! The five ledgers of Dukan POS. Each owns one aggregate and is the only
//! writer of that aggregate's state:
//!
//! - [`stock::StockLedger`] - products and the stock movement log, the sole
//!   source of truth for on-hand quantity
//! - [`sales::SalesEngine`] - draft invoices, finalization, voiding
//! - [`repairs::RepairLedger`] - repair tickets and part consumption
//! - [`transfers::TransferLedger`] - balance transfers with running balances
//! - [`users::UserLedger`] - staff, roles, authentication, permission
//!   resolution
//!
//! ## The Atomic Unit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every mutating operation follows the same shape:                       │
//! │                                                                         │
//! │    let mut tx = pool.begin().await?;        ← unit of work opens        │
//! │    let actor = load_actor(&mut tx, id)?;    ← permissions read in-tx    │
//! │    actor.require(Permission::X)?;           ← pure check                │
//! │    ...reads, guarded writes...                                          │
//! │    AuditTrail::append(&mut tx, ...)?;       ← audit rides the tx        │
//! │    tx.commit().await?;                                                  │
//! │                                                                         │
//! │  Any early return drops the transaction, which rolls it back: no        │
//! │  partial state is ever observable. A write race surfaces SQLITE_BUSY    │
//! │  which maps to Contention; the caller retries.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod repairs;
pub mod sales;
pub mod stock;
pub mod transfers;
pub mod users;

use dukan_core::CoreResult;

use crate::{DbError, UnitOfWork};

/// Allocates the next per-day business number: `{prefix}YYYYMMDD-NNNN`.
///
/// Runs inside the caller's transaction; the MAX scan and the insert that
/// follows are serialized by the single-writer lock, so two terminals cannot
/// take the same number. `table` and `column` are compile-time constants at
/// every call site, never user input.
pub(crate) async fn next_business_number(
    tx: &mut UnitOfWork<'_>,
    table: &str,
    column: &str,
    prefix: &str,
) -> CoreResult<String> {
    let day_prefix = format!("{prefix}{}-", chrono::Utc::now().format("%Y%m%d"));
    let sql = format!("SELECT MAX({column}) FROM {table} WHERE {column} LIKE ?1");
    let max = sqlx::query_scalar::<_, Option<String>>(&sql)
        .bind(format!("{day_prefix}%"))
        .fetch_one(&mut **tx)
        .await
        .map_err(DbError::from)?;

    let next = max
        .and_then(|number| number.rsplit('-').next()?.parse::<u32>().ok())
        .unwrap_or(0)
        + 1;
    Ok(format!("{day_prefix}{next:04}"))
}

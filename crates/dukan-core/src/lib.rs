//! # dukan-core: Pure Business Logic for Dukan POS
//!
//! This crate is the **heart** of the Dukan POS business ledger. It contains
//! all business rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Dukan POS Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │            Collaborators (UI / CLI / report tooling)            │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ dukan-core (THIS CRATE) ★                       │    │
//! │  │                                                                 │    │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐   │    │
//! │  │   │  types  │ │  money  │ │ invoice │ │  repair  │ │ perms  │   │    │
//! │  │   │ Product │ │  Money  │ │ totals  │ │  state   │ │ Actor  │   │    │
//! │  │   │ Invoice │ │   bps   │ │  math   │ │ machine  │ │ tokens │   │    │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └──────────┘ └────────┘   │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                  dukan-db (Ledger Layer)                        │    │
//! │  │        SQLite transactions, the five ledgers, audit trail       │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Invoice, RepairTicket, Transfer, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`invoice`] - Invoice totals math
//! - [`repair`] - Repair ticket transition table
//! - [`permissions`] - Capability tokens and the authorization check
//! - [`config`] - Explicit ledger configuration (backorder, overdraft, tax)
//! - [`validation`] - Input validation
//! - [`error`] - Domain error kinds
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: deterministic - same input, same output
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: all monetary values are cents (i64), never floats
//! 4. **Explicit Errors**: all errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use dukan_core::money::Money;
//!
//! let price = Money::from_cents(15_000); // 150.00, never from floats
//! let discount = price.take_bps(1000);   // 10% = 15.00
//! assert_eq!((price - discount).cents(), 13_500);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod invoice;
pub mod money;
pub mod permissions;
pub mod repair;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use dukan_core::Money` instead of
// `use dukan_core::money::Money`

pub use config::LedgerConfig;
pub use error::{CoreError, CoreResult, ValidationError};
pub use invoice::InvoiceTotals;
pub use money::Money;
pub use permissions::{Actor, Permission, PermissionSet};
pub use types::*;

//! # Error Types
//!
//! Domain-specific error types for dukan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dukan-core errors (this file)                                          │
//! │  ├── CoreError        - Ledger rule violations, one variant per kind    │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  dukan-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError ← DbError (mapped at ledger surface) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, status, balance)
//! 3. Errors are enum variants, never String
//! 4. Every failure path leaves the ledgers untouched; the error is the
//!    entire observable effect of a failed operation

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger errors surfaced to collaborators (UI, CLI, reports).
///
/// Each variant is one failure kind of the business ledger. None of them are
/// recovered inside the core; `Contention` is the only kind a caller should
/// retry automatically.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Actor lacks the capability required by the operation.
    ///
    /// ## When This Occurs
    /// - Cashier tries to void an invoice without `void_invoice`
    /// - A deactivated user invokes any mutating operation
    #[error("Permission denied: {actor} lacks '{permission}'")]
    PermissionDenied { actor: String, permission: String },

    /// Requested state change is not an edge of the entity's state machine.
    ///
    /// ## When This Occurs
    /// - Voiding a draft or already-voided invoice
    /// - Advancing a repair ticket out of a terminal state
    /// - Editing an invoice that is no longer a draft
    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// Quantity is zero, negative, or otherwise unusable.
    #[error("Invalid quantity {quantity}: {reason}")]
    InvalidQuantity { quantity: i64, reason: String },

    /// Monetary amount is zero, negative, or nonsensical for the operation.
    #[error("Invalid amount {amount_cents}: {reason}")]
    InvalidAmount { amount_cents: i64, reason: String },

    /// A negative movement would drive on-hand quantity below zero and
    /// backorder mode was not requested.
    ///
    /// ## User Workflow
    /// ```text
    /// Finalize invoice (SCREEN-A52 × 3)
    ///      │
    ///      ▼
    /// Stock check: available = 2
    ///      │
    ///      ▼
    /// InsufficientStock { sku: "SCREEN-A52", available: 2, requested: 3 }
    ///      │
    ///      ▼
    /// UI shows the shortfall; zero movements recorded
    /// ```
    #[error("Insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// A cash-out would exceed the service's running balance and the service
    /// does not allow overdraft.
    #[error(
        "Insufficient balance for {service}: balance {balance_cents}, requested {requested_cents}"
    )]
    InsufficientBalance {
        service: String,
        balance_cents: i64,
        requested_cents: i64,
    },

    /// Another terminal holds the write lock; fail fast instead of queuing.
    /// Callers are expected to retry with backoff.
    #[error("Ledger contention, retry the operation")]
    Contention,

    /// Entity does not exist (or is soft-deactivated where that matters).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input validation failure (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Underlying storage failure (connection, migration, constraint).
    /// The triggering business operation fails with it; nothing was applied.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidTransition error.
    pub fn invalid_transition(
        entity: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        CoreError::InvalidTransition {
            entity: entity.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// True for the one kind a caller should retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Contention)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when input doesn't meet requirements, before any ledger
/// state is read or written.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., bad characters in a SKU).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., duplicate SKU or username).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            sku: "SCREEN-A52".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SCREEN-A52: available 2, requested 3"
        );

        let err = CoreError::invalid_transition("invoice", "voided", "voided");
        assert_eq!(err.to_string(), "Invalid transition for invoice: voided -> voided");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "sku".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }

    #[test]
    fn test_only_contention_is_retryable() {
        assert!(CoreError::Contention.is_retryable());
        assert!(!CoreError::not_found("Product", "p1").is_retryable());
    }
}

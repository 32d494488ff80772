//! # Validation Module
//!
//! Input validation utilities for the ledgers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Collaborator (UI/CLI)                                         │
//! │  └── Basic format checks, immediate feedback                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - before any ledger state is touched              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  └── NOT NULL, UNIQUE, FOREIGN KEY constraints                          │
//! │                                                                         │
//! │  Defense in depth: multiple layers catch different errors               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum quantity of a single item per movement or invoice line.
/// Prevents accidental over-ordering (typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum lines on a single invoice.
pub const MAX_INVOICE_LINES: usize = 100;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 50 characters
/// - Alphanumeric characters, hyphens, underscores only
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name (product, customer, role, user).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a username: non-empty, lowercase alphanumeric plus `._-`.
pub fn validate_username(username: &str) -> ValidationResult<()> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::Required {
            field: "username".to_string(),
        });
    }

    if username.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "username".to_string(),
            max: 50,
        });
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidFormat {
            field: "username".to_string(),
            reason: "must be lowercase letters, digits, '.', '_' or '-'".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity for a movement or invoice line: 1..=MAX_ITEM_QUANTITY.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a non-negative money amount in cents (prices, costs).
pub fn validate_price_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("SCREEN-A52").is_ok());
        assert!(validate_sku("  BAT_IP13  ").is_ok());
        assert!(validate_sku("").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Galaxy A52 screen").is_ok());
        assert!(validate_name("name", "   ").is_err());
        assert!(validate_name("name", &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("sara.h").is_ok());
        assert!(validate_username("tech_01").is_ok());
        assert!(validate_username("Sara").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-3).is_err());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price_cents("price", 0).is_ok());
        assert!(validate_price_cents("price", 1500).is_ok());
        assert!(validate_price_cents("price", -1).is_err());
    }
}

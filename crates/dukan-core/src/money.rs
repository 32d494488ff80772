//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  A running balance that drifts by fractions of a cent per transfer      │
//! │  will never reconcile against the transfer log.                         │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    Every ledger column, calculation and API value is i64 cents.         │
//! │    Rounding happens once, explicitly, in basis-point math.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: refunds, compensating transfers and overdrafted
///   balances are negative values, not special cases
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **Derives**: full serde support for audit snapshots and DTOs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies by a quantity (line totals).
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Takes a basis-point fraction of this amount, rounded half-up.
    ///
    /// 1 basis point = 0.01% = 1/10000. Used for both discount and tax
    /// amounts: `subtotal.take_bps(1000)` is 10% of the subtotal.
    ///
    /// ## Implementation
    /// Integer math in i128 to avoid overflow: `(cents * bps + 5000) / 10000`.
    /// The +5000 rounds the half-cent case up; rounding happens exactly once
    /// per derived amount so totals always reconcile to the stored parts.
    pub fn take_bps(&self, bps: u32) -> Money {
        let cents = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(cents as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display for debugging and log output. Collaborators handle currency
/// symbols and localization themselves.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

/// Negation, used when recording compensating transfers.
impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

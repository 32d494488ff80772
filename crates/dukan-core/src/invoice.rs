//! # Invoice Totals
//!
//! Pure totals math for the sales engine.
//!
//! ## Calculation Order
//! ```text
//! subtotal = Σ line totals (unit price snapshot × quantity)
//!      │
//!      ▼
//! discount = subtotal × discount_bps        (whole-invoice discount)
//!      │
//!      ▼
//! tax      = (subtotal − discount) × tax_bps  (tax on the discounted amount)
//!      │
//!      ▼
//! total    = subtotal − discount + tax
//! ```
//!
//! The same function runs while a draft is being built (for display) and
//! inside the finalize transaction (for the committed figures), so the two
//! can never disagree.

use crate::money::Money;
use crate::types::InvoiceLine;

/// The derived monetary figures of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

impl InvoiceTotals {
    /// Computes totals from lines and invoice-level rates.
    ///
    /// `discount_bps` applies to the subtotal; `tax_bps` applies to the
    /// discounted amount. Both in basis points (1000 = 10%).
    pub fn compute(lines: &[InvoiceLine], discount_bps: u32, tax_bps: u32) -> Self {
        let subtotal = lines
            .iter()
            .fold(Money::zero(), |acc, line| {
                acc + Money::from_cents(line.line_total_cents)
            });

        let discount = subtotal.take_bps(discount_bps);
        let taxable = subtotal - discount;
        let tax = taxable.take_bps(tax_bps);

        InvoiceTotals {
            subtotal,
            discount,
            tax,
            total: taxable + tax,
        }
    }
}

/// Computes a line total from a snapshot price and quantity.
#[inline]
pub fn line_total(unit_price: Money, quantity: i64) -> Money {
    unit_price.multiply_quantity(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(unit_price_cents: i64, quantity: i64) -> InvoiceLine {
        InvoiceLine {
            id: "l1".into(),
            invoice_id: "i1".into(),
            product_id: "p1".into(),
            sku_snapshot: "SKU".into(),
            name_snapshot: "name".into(),
            unit_price_cents,
            quantity,
            line_total_cents: unit_price_cents * quantity,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_invoice() {
        let totals = InvoiceTotals::compute(&[], 0, 0);
        assert_eq!(totals.subtotal, Money::zero());
        assert_eq!(totals.total, Money::zero());
    }

    #[test]
    fn test_plain_sum() {
        let lines = [line(150_00, 2), line(25_50, 1)];
        let totals = InvoiceTotals::compute(&lines, 0, 0);
        assert_eq!(totals.subtotal.cents(), 325_50);
        assert_eq!(totals.discount.cents(), 0);
        assert_eq!(totals.tax.cents(), 0);
        assert_eq!(totals.total.cents(), 325_50);
    }

    #[test]
    fn test_discount_then_tax() {
        // 100.00 subtotal, 10% discount, 14% tax on the discounted 90.00
        let lines = [line(100_00, 1)];
        let totals = InvoiceTotals::compute(&lines, 1000, 1400);
        assert_eq!(totals.subtotal.cents(), 100_00);
        assert_eq!(totals.discount.cents(), 10_00);
        assert_eq!(totals.tax.cents(), 12_60);
        assert_eq!(totals.total.cents(), 102_60);
    }

    #[test]
    fn test_total_reconciles_to_parts() {
        // Awkward figures: rounding happens once per derived amount, and
        // total must still equal subtotal - discount + tax exactly.
        let lines = [line(33_33, 3), line(9_99, 7)];
        let totals = InvoiceTotals::compute(&lines, 333, 825);
        assert_eq!(
            totals.total,
            totals.subtotal - totals.discount + totals.tax
        );
    }
}

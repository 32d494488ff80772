//! # Sales Engine
//!
//! Draft invoices, finalization, and voiding.
//!
//! ## Invoice Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_draft ──▶ DRAFT ──── finalize ────▶ FINALIZED ── void ──▶ VOIDED
//! │                      │                           │                  │   │
//! │     add_line ────────┤            one Sale movement         one Return │
//! │     remove_line ─────┤            per line, same tx         movement   │
//! │     apply_discount ──┘                                      per line   │
//! │                                                                         │
//! │   Drafts touch no stock. Finalize is the commit point: stock checks,    │
//! │   movements, totals, status flip, and the audit entry are one           │
//! │   transaction. A draft is never voided; it is simply abandoned.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Line items snapshot SKU, name, and unit price at add time, so later
//! catalog edits never change what a past receipt says.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use dukan_core::validation::{validate_quantity, MAX_INVOICE_LINES};
use dukan_core::{
    CoreError, CoreResult, Invoice, InvoiceLine, InvoiceStatus, InvoiceTotals, LedgerConfig,
    MovementReason, PaymentMethod, Permission,
};

use crate::audit::AuditTrail;
use crate::ledger::next_business_number;
use crate::ledger::stock::{apply_movement, fetch_active_product};
use crate::ledger::users::load_actor;
use crate::{DbError, UnitOfWork};

/// Runs the sales side of the shop.
#[derive(Clone)]
pub struct SalesEngine {
    pool: SqlitePool,
    config: Arc<LedgerConfig>,
    audit: AuditTrail,
}

impl SalesEngine {
    pub fn new(pool: SqlitePool, config: Arc<LedgerConfig>) -> Self {
        let audit = AuditTrail::new(pool.clone());
        Self {
            pool,
            config,
            audit,
        }
    }

    // ------------------------------------------------------------------
    // Draft building
    // ------------------------------------------------------------------

    /// Opens a draft invoice. Requires `CreateInvoice`.
    #[instrument(skip(self))]
    pub async fn create_draft(
        &self,
        customer_id: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let result = self.create_draft_tx(customer_id, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("invoice", "(new)", "create_draft", actor_id, err)
                .await;
        }
        result
    }

    async fn create_draft_tx(
        &self,
        customer_id: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::CreateInvoice)?;

        if let Some(customer_id) = customer_id {
            let exists =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers WHERE id = ?1")
                    .bind(customer_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(DbError::from)?;
            if exists == 0 {
                return Err(CoreError::not_found("customer", customer_id));
            }
        }

        let invoice_number = next_business_number(&mut tx, "invoices", "invoice_number", "").await?;
        let invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            invoice_number,
            customer_id: customer_id.map(str::to_string),
            status: InvoiceStatus::Draft,
            payment_method: None,
            subtotal_cents: 0,
            discount_bps: 0,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: 0,
            cashier_id: actor_id.to_string(),
            created_at: Utc::now(),
            finalized_at: None,
        };
        sqlx::query(
            "INSERT INTO invoices
                (id, invoice_number, customer_id, status, payment_method, subtotal_cents,
                 discount_bps, discount_cents, tax_cents, total_cents, cashier_id,
                 created_at, finalized_at)
             VALUES (?1, ?2, ?3, ?4, NULL, 0, 0, 0, 0, 0, ?5, ?6, NULL)",
        )
        .bind(&invoice.id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.customer_id)
        .bind(invoice.status)
        .bind(&invoice.cashier_id)
        .bind(invoice.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        info!(number = %invoice.invoice_number, "draft invoice opened");
        Ok(invoice)
    }

    /// Adds a line to a draft, snapshotting the product's SKU, name, and
    /// price. Requires `CreateInvoice`. Stock is not checked here; the
    /// check belongs to finalize, where the decrement actually happens.
    #[instrument(skip(self))]
    pub async fn add_line(
        &self,
        invoice_id: &str,
        product_id: &str,
        quantity: i64,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let result = self
            .add_line_tx(invoice_id, product_id, quantity, actor_id)
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure("invoice", invoice_id, "add_line", actor_id, err)
                .await;
        }
        result
    }

    async fn add_line_tx(
        &self,
        invoice_id: &str,
        product_id: &str,
        quantity: i64,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        validate_quantity(quantity)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::CreateInvoice)?;

        let invoice = fetch_invoice(&mut tx, invoice_id).await?;
        require_draft(&invoice, "add_line")?;

        let line_count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoice_lines WHERE invoice_id = ?1")
                .bind(invoice_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DbError::from)?;
        if line_count as usize >= MAX_INVOICE_LINES {
            return Err(CoreError::InvalidQuantity {
                quantity: line_count + 1,
                reason: format!("invoice is limited to {MAX_INVOICE_LINES} lines"),
            });
        }

        let product = fetch_active_product(&mut tx, product_id).await?;
        let line = InvoiceLine {
            id: Uuid::new_v4().to_string(),
            invoice_id: invoice_id.to_string(),
            product_id: product_id.to_string(),
            sku_snapshot: product.sku.clone(),
            name_snapshot: product.name.clone(),
            unit_price_cents: product.price_cents,
            quantity,
            line_total_cents: product.price_cents * quantity,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO invoice_lines
                (id, invoice_id, product_id, sku_snapshot, name_snapshot,
                 unit_price_cents, quantity, line_total_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&line.id)
        .bind(&line.invoice_id)
        .bind(&line.product_id)
        .bind(&line.sku_snapshot)
        .bind(&line.name_snapshot)
        .bind(line.unit_price_cents)
        .bind(line.quantity)
        .bind(line.line_total_cents)
        .bind(line.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let invoice =
            recompute_draft_totals(&mut tx, invoice_id, invoice.discount_bps, &self.config).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(invoice)
    }

    /// Removes a line from a draft. Requires `CreateInvoice`.
    #[instrument(skip(self))]
    pub async fn remove_line(
        &self,
        invoice_id: &str,
        line_id: &str,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::CreateInvoice)?;

        let invoice = fetch_invoice(&mut tx, invoice_id).await?;
        require_draft(&invoice, "remove_line")?;

        let result = sqlx::query("DELETE FROM invoice_lines WHERE id = ?1 AND invoice_id = ?2")
            .bind(line_id)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("invoice line", line_id));
        }

        let invoice =
            recompute_draft_totals(&mut tx, invoice_id, invoice.discount_bps, &self.config).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(invoice)
    }

    /// Sets the whole-invoice discount on a draft, in basis points.
    /// Requires `CreateInvoice`.
    #[instrument(skip(self))]
    pub async fn apply_discount(
        &self,
        invoice_id: &str,
        discount_bps: u32,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        if discount_bps > 10_000 {
            return Err(CoreError::InvalidAmount {
                amount_cents: discount_bps as i64,
                reason: "discount cannot exceed 10000 basis points".to_string(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::CreateInvoice)?;

        let invoice = fetch_invoice(&mut tx, invoice_id).await?;
        require_draft(&invoice, "apply_discount")?;

        let invoice =
            recompute_draft_totals(&mut tx, invoice_id, discount_bps as i64, &self.config).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(invoice)
    }

    // ------------------------------------------------------------------
    // Finalize / void
    // ------------------------------------------------------------------

    /// Commits a draft: checks stock, issues one `Sale` movement per line,
    /// fixes the totals, and flips the status. Requires `FinalizeInvoice`.
    ///
    /// Any line failing its stock check aborts the whole finalize; no
    /// partial invoices, no partial movements.
    #[instrument(skip(self))]
    pub async fn finalize(
        &self,
        invoice_id: &str,
        payment_method: PaymentMethod,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let result = self
            .finalize_tx(invoice_id, payment_method, actor_id)
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure("invoice", invoice_id, "finalize", actor_id, err)
                .await;
        }
        result
    }

    async fn finalize_tx(
        &self,
        invoice_id: &str,
        payment_method: PaymentMethod,
        actor_id: &str,
    ) -> CoreResult<Invoice> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::FinalizeInvoice)?;

        let before = fetch_invoice(&mut tx, invoice_id).await?;
        require_draft(&before, "finalize")?;

        let lines = fetch_lines(&mut tx, invoice_id).await?;
        if lines.is_empty() {
            return Err(CoreError::InvalidQuantity {
                quantity: 0,
                reason: "invoice has no lines".to_string(),
            });
        }

        for line in &lines {
            apply_movement(
                &mut tx,
                self.config.allow_backorder,
                &line.product_id,
                -line.quantity,
                MovementReason::Sale,
                Some(invoice_id),
                None,
                actor_id,
            )
            .await?;
        }

        let totals = InvoiceTotals::compute(
            &lines,
            before.discount_bps as u32,
            self.config.tax_rate_bps,
        );
        let now = Utc::now();
        sqlx::query(
            "UPDATE invoices
             SET status = ?1, payment_method = ?2, subtotal_cents = ?3, discount_cents = ?4,
                 tax_cents = ?5, total_cents = ?6, finalized_at = ?7
             WHERE id = ?8",
        )
        .bind(InvoiceStatus::Finalized)
        .bind(payment_method)
        .bind(totals.subtotal.cents())
        .bind(totals.discount.cents())
        .bind(totals.tax.cents())
        .bind(totals.total.cents())
        .bind(now)
        .bind(invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let after = fetch_invoice(&mut tx, invoice_id).await?;
        AuditTrail::append(
            &mut tx,
            "invoice",
            invoice_id,
            "finalize",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(
            number = %after.invoice_number,
            total_cents = after.total_cents,
            "invoice finalized"
        );
        Ok(after)
    }

    /// Reverses a finalized invoice with one `Return` movement per line.
    /// Requires `VoidInvoice`. Drafts cannot be voided; abandon them.
    #[instrument(skip(self))]
    pub async fn void(&self, invoice_id: &str, actor_id: &str) -> CoreResult<Invoice> {
        let result = self.void_tx(invoice_id, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("invoice", invoice_id, "void", actor_id, err)
                .await;
        }
        result
    }

    async fn void_tx(&self, invoice_id: &str, actor_id: &str) -> CoreResult<Invoice> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::VoidInvoice)?;

        let before = fetch_invoice(&mut tx, invoice_id).await?;
        if before.status != InvoiceStatus::Finalized {
            return Err(CoreError::invalid_transition(
                "invoice",
                before.status.as_str(),
                "voided",
            ));
        }

        let lines = fetch_lines(&mut tx, invoice_id).await?;
        for line in &lines {
            apply_movement(
                &mut tx,
                self.config.allow_backorder,
                &line.product_id,
                line.quantity,
                MovementReason::Return,
                Some(invoice_id),
                None,
                actor_id,
            )
            .await?;
        }

        sqlx::query("UPDATE invoices SET status = ?1 WHERE id = ?2")
            .bind(InvoiceStatus::Voided)
            .bind(invoice_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        let after = fetch_invoice(&mut tx, invoice_id).await?;
        AuditTrail::append(
            &mut tx,
            "invoice",
            invoice_id,
            "void",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(number = %after.invoice_number, "invoice voided");
        Ok(after)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetches an invoice by id.
    pub async fn get(&self, invoice_id: &str) -> CoreResult<Invoice> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("invoice", invoice_id))
    }

    /// Fetches an invoice by its printed business number.
    pub async fn get_by_number(&self, invoice_number: &str) -> CoreResult<Invoice> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE invoice_number = ?1")
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("invoice", invoice_number))
    }

    /// Lines of an invoice in add order.
    pub async fn lines(&self, invoice_id: &str) -> CoreResult<Vec<InvoiceLine>> {
        let lines = sqlx::query_as::<_, InvoiceLine>(
            "SELECT * FROM invoice_lines WHERE invoice_id = ?1 ORDER BY created_at, id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(lines)
    }

    /// Most recent invoices, newest first.
    pub async fn recent(&self, limit: i64) -> CoreResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices ORDER BY created_at DESC, invoice_number DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(invoices)
    }
}

// ============================================================================
// Transaction-scoped helpers
// ============================================================================

async fn fetch_invoice(tx: &mut UnitOfWork<'_>, invoice_id: &str) -> CoreResult<Invoice> {
    sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?1")
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CoreError::not_found("invoice", invoice_id))
}

async fn fetch_lines(tx: &mut UnitOfWork<'_>, invoice_id: &str) -> CoreResult<Vec<InvoiceLine>> {
    let lines = sqlx::query_as::<_, InvoiceLine>(
        "SELECT * FROM invoice_lines WHERE invoice_id = ?1 ORDER BY created_at, id",
    )
    .bind(invoice_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(DbError::from)?;
    Ok(lines)
}

fn require_draft(invoice: &Invoice, operation: &str) -> CoreResult<()> {
    if invoice.status != InvoiceStatus::Draft {
        return Err(CoreError::invalid_transition(
            "invoice",
            invoice.status.as_str(),
            operation,
        ));
    }
    Ok(())
}

/// Rewrites the display totals of a draft from its current lines. The same
/// `InvoiceTotals::compute` runs again at finalize, so draft and receipt
/// figures cannot drift apart.
async fn recompute_draft_totals(
    tx: &mut UnitOfWork<'_>,
    invoice_id: &str,
    discount_bps: i64,
    config: &LedgerConfig,
) -> CoreResult<Invoice> {
    let lines = fetch_lines(tx, invoice_id).await?;
    let totals = InvoiceTotals::compute(&lines, discount_bps as u32, config.tax_rate_bps);
    sqlx::query(
        "UPDATE invoices
         SET subtotal_cents = ?1, discount_bps = ?2, discount_cents = ?3,
             tax_cents = ?4, total_cents = ?5
         WHERE id = ?6",
    )
    .bind(totals.subtotal.cents())
    .bind(discount_bps)
    .bind(totals.discount.cents())
    .bind(totals.tax.cents())
    .bind(totals.total.cents())
    .bind(invoice_id)
    .execute(&mut **tx)
    .await
    .map_err(DbError::from)?;
    fetch_invoice(tx, invoice_id).await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::stock::ProductPatch;
    use crate::testutil::{seed_product, shop, shop_with};
    use dukan_core::PermissionSet;

    #[tokio::test]
    async fn finalize_decrements_stock_and_fixes_totals() {
        let config = LedgerConfig {
            tax_rate_bps: 1400,
            ..LedgerConfig::default()
        };
        let (db, admin, category) = shop_with(config).await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        db.sales()
            .add_line(&draft.id, &screen.id, 2, &admin)
            .await
            .unwrap();
        let draft = db
            .sales()
            .apply_discount(&draft.id, 1000, &admin)
            .await
            .unwrap();
        assert_eq!(draft.subtotal_cents, 300_00);

        let invoice = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Cash, &admin)
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Finalized);
        assert_eq!(invoice.subtotal_cents, 300_00);
        assert_eq!(invoice.discount_cents, 30_00);
        assert_eq!(invoice.tax_cents, 37_80); // 14% of 270.00
        assert_eq!(invoice.total_cents, 307_80);
        assert!(invoice.finalized_at.is_some());

        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn line_snapshot_survives_price_change() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        db.sales()
            .add_line(&draft.id, &screen.id, 1, &admin)
            .await
            .unwrap();

        // Price hike after the line was added.
        db.stock()
            .update_product(
                &screen.id,
                ProductPatch {
                    price_cents: Some(999_00),
                    ..ProductPatch::default()
                },
                &admin,
            )
            .await
            .unwrap();

        let invoice = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Cash, &admin)
            .await
            .unwrap();
        let lines = db.sales().lines(&invoice.id).await.unwrap();
        assert_eq!(lines[0].unit_price_cents, 150_00);
        assert_eq!(invoice.total_cents, 150_00);
    }

    #[tokio::test]
    async fn short_stock_aborts_the_whole_finalize() {
        let (db, admin, category) = shop().await;
        let plenty = seed_product(&db, &admin, &category, "PLENTY", 10_00, 50).await;
        let scarce = seed_product(&db, &admin, &category, "SCARCE", 20_00, 1).await;

        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        db.sales()
            .add_line(&draft.id, &plenty.id, 5, &admin)
            .await
            .unwrap();
        db.sales()
            .add_line(&draft.id, &scarce.id, 3, &admin)
            .await
            .unwrap();

        let err = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Cash, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { .. }));

        // First line's movement rolled back with the rest.
        assert_eq!(db.stock().current_quantity(&plenty.id).await.unwrap(), 50);
        assert_eq!(db.stock().current_quantity(&scarce.id).await.unwrap(), 1);
        let invoice = db.sales().get(&draft.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Draft);
    }

    #[tokio::test]
    async fn void_restores_stock_exactly_once() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        db.sales()
            .add_line(&draft.id, &screen.id, 2, &admin)
            .await
            .unwrap();
        let invoice = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Card, &admin)
            .await
            .unwrap();
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 3);

        let voided = db.sales().void(&invoice.id, &admin).await.unwrap();
        assert_eq!(voided.status, InvoiceStatus::Voided);
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 5);

        // Voiding twice is not a transition.
        let err = db.sales().void(&invoice.id, &admin).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn drafts_cannot_be_voided_or_edited_after_finalize() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        let err = db.sales().void(&draft.id, &admin).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        db.sales()
            .add_line(&draft.id, &screen.id, 1, &admin)
            .await
            .unwrap();
        db.sales()
            .finalize(&draft.id, PaymentMethod::Cash, &admin)
            .await
            .unwrap();

        let err = db
            .sales()
            .add_line(&draft.id, &screen.id, 1, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn empty_draft_cannot_finalize() {
        let (db, admin, _) = shop().await;
        let draft = db.sales().create_draft(None, &admin).await.unwrap();
        let err = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Cash, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuantity { .. }));
    }

    #[tokio::test]
    async fn concurrent_finalizes_cannot_both_take_the_last_unit() {
        let (db, admin, category) = shop().await;
        let scarce = seed_product(&db, &admin, &category, "SCARCE", 20_00, 1).await;

        let mut drafts = Vec::new();
        for _ in 0..2 {
            let draft = db.sales().create_draft(None, &admin).await.unwrap();
            db.sales()
                .add_line(&draft.id, &scarce.id, 1, &admin)
                .await
                .unwrap();
            drafts.push(draft);
        }

        let sales_a = db.sales();
        let sales_b = db.sales();
        let (a, b) = tokio::join!(
            sales_a.finalize(&drafts[0].id, PaymentMethod::Cash, &admin),
            sales_b.finalize(&drafts[1].id, PaymentMethod::Cash, &admin),
        );

        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1, "exactly one finalize may win the last unit");
        for result in [a, b] {
            if let Err(err) = result {
                assert!(matches!(
                    err,
                    CoreError::InsufficientStock { .. } | CoreError::Contention
                ));
            }
        }
        assert_eq!(db.stock().current_quantity(&scarce.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cashier_cannot_void() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;
        let role = db
            .users()
            .create_role("cashier", PermissionSet::cashier(), &admin)
            .await
            .unwrap();
        let cashier = db
            .users()
            .create_user("sara", "Sara", "p4ssword", &role.id, &admin)
            .await
            .unwrap();

        let draft = db.sales().create_draft(None, &cashier.id).await.unwrap();
        db.sales()
            .add_line(&draft.id, &screen.id, 1, &cashier.id)
            .await
            .unwrap();
        let invoice = db
            .sales()
            .finalize(&draft.id, PaymentMethod::Cash, &cashier.id)
            .await
            .unwrap();

        let err = db.sales().void(&invoice.id, &cashier.id).await.unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn invoice_numbers_count_up_within_the_day() {
        let (db, admin, _) = shop().await;
        let first = db.sales().create_draft(None, &admin).await.unwrap();
        let second = db.sales().create_draft(None, &admin).await.unwrap();
        assert!(first.invoice_number.ends_with("-0001"));
        assert!(second.invoice_number.ends_with("-0002"));
        assert_eq!(
            first.invoice_number.len(),
            "YYYYMMDD-NNNN".len(),
        );
    }
}

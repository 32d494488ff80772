//! # Stock Ledger
//!
//! Products, the catalog around them, and the append-only stock movement
//! log. On-hand quantity is defined as the sum of a product's movement
//! deltas; `products.quantity_cached` mirrors that sum and is updated in the
//! same transaction as every movement insert.
//!
//! ## The Guarded Update
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE products                                                        │
//! │  SET quantity_cached = quantity_cached + :delta                         │
//! │  WHERE id = :id                                                         │
//! │    AND (quantity_cached + :delta >= 0 OR :allow_backorder)              │
//! │                                                                         │
//! │  rows_affected = 0  →  InsufficientStock (or NotFound)                  │
//! │  rows_affected = 1  →  insert movement row, same transaction            │
//! │                                                                         │
//! │  The non-negativity check and the decrement are one statement, so two   │
//! │  terminals can never both take the last unit.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sales engine and repair ledger issue their movements through
//! [`apply_movement`] inside their own transactions, so an invoice and its
//! stock effects commit or roll back together.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use dukan_core::validation::{validate_name, validate_price_cents, validate_quantity, validate_sku};
use dukan_core::{
    Category, CoreError, CoreResult, Customer, LedgerConfig, MovementReason, Permission, Product,
    StockMovement, Supplier, ValidationError,
};

use crate::audit::AuditTrail;
use crate::ledger::users::load_actor;
use crate::{DbError, UnitOfWork};

// ============================================================================
// Movement primitive (shared with sales and repairs)
// ============================================================================

/// Applies one signed movement to a product inside the caller's transaction.
///
/// This is the only code path that changes on-hand quantity. The guarded
/// update rejects any delta that would drive the quantity negative unless
/// backorder mode is on; in backorder mode the movement is flagged until a
/// later positive movement brings the quantity back to zero or above.
pub(crate) async fn apply_movement(
    tx: &mut UnitOfWork<'_>,
    allow_backorder: bool,
    product_id: &str,
    delta: i64,
    reason: MovementReason,
    reference_id: Option<&str>,
    note: Option<&str>,
    actor_id: &str,
) -> CoreResult<StockMovement> {
    if delta == 0 {
        return Err(CoreError::InvalidQuantity {
            quantity: 0,
            reason: "movement delta must be non-zero".to_string(),
        });
    }

    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE products
         SET quantity_cached = quantity_cached + ?1, updated_at = ?2
         WHERE id = ?3 AND (quantity_cached + ?1 >= 0 OR ?4)",
    )
    .bind(delta)
    .bind(now)
    .bind(product_id)
    .bind(allow_backorder)
    .execute(&mut **tx)
    .await
    .map_err(DbError::from)?;

    if result.rows_affected() == 0 {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT sku, quantity_cached FROM products WHERE id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::from)?;
        return match row {
            Some((sku, available)) => Err(CoreError::InsufficientStock {
                sku,
                available,
                requested: delta.abs(),
            }),
            None => Err(CoreError::not_found("product", product_id)),
        };
    }

    let new_quantity =
        sqlx::query_scalar::<_, i64>("SELECT quantity_cached FROM products WHERE id = ?1")
            .bind(product_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(DbError::from)?;

    let flagged = new_quantity < 0;
    if delta > 0 && new_quantity >= 0 {
        // A purchase or return reconciled the backorder; clear the flags.
        sqlx::query("UPDATE stock_movements SET flagged = 0 WHERE product_id = ?1 AND flagged = 1")
            .bind(product_id)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
    }

    let movement = StockMovement {
        id: Uuid::new_v4().to_string(),
        product_id: product_id.to_string(),
        delta,
        reason,
        reference_id: reference_id.map(str::to_string),
        note: note.map(str::to_string),
        flagged,
        actor_id: actor_id.to_string(),
        created_at: now,
    };
    sqlx::query(
        "INSERT INTO stock_movements
            (id, product_id, delta, reason, reference_id, note, flagged, actor_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&movement.id)
    .bind(&movement.product_id)
    .bind(movement.delta)
    .bind(movement.reason)
    .bind(&movement.reference_id)
    .bind(&movement.note)
    .bind(movement.flagged)
    .bind(&movement.actor_id)
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::from)?;

    Ok(movement)
}

/// Fetches a product inside a transaction, rejecting deactivated ones.
pub(crate) async fn fetch_active_product(
    tx: &mut UnitOfWork<'_>,
    product_id: &str,
) -> CoreResult<Product> {
    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CoreError::not_found("product", product_id))?;
    if !product.is_active {
        return Err(CoreError::not_found("product", product_id));
    }
    Ok(product)
}

// ============================================================================
// New product input
// ============================================================================

/// Input for [`StockLedger::create_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category_id: String,
    pub supplier_id: Option<String>,
    pub cost_cents: i64,
    pub price_cents: i64,
    pub reorder_level: i64,
    /// Stock already on the shelf when the product is registered. Recorded
    /// as an `Opening` movement so the log stays complete from day one.
    pub opening_quantity: i64,
}

/// Result of [`StockLedger::reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub product_id: String,
    /// Cache value before reconciliation.
    pub cached: i64,
    /// Quantity derived by summing the movement log.
    pub derived: i64,
    /// True when the cache disagreed and was rewritten.
    pub corrected: bool,
}

/// Partial update for a product; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub cost_cents: Option<i64>,
    pub reorder_level: Option<i64>,
    pub supplier_id: Option<String>,
}

// ============================================================================
// StockLedger
// ============================================================================

/// Manages the product catalog and the stock movement log.
#[derive(Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    config: Arc<LedgerConfig>,
    audit: AuditTrail,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, config: Arc<LedgerConfig>) -> Self {
        let audit = AuditTrail::new(pool.clone());
        Self {
            pool,
            config,
            audit,
        }
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Creates a category. Requires `ManageProducts`.
    pub async fn create_category(&self, name: &str, actor_id: &str) -> CoreResult<Category> {
        validate_name("category name", name)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageProducts)?;

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO categories (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&category.id)
            .bind(&category.name)
            .bind(category.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => CoreError::Validation(ValidationError::Duplicate {
                    field: "category name".into(),
                    value: name.into(),
                }),
                other => other.into(),
            })?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(category)
    }

    /// Creates a supplier. Requires `ManageProducts`.
    pub async fn create_supplier(
        &self,
        name: &str,
        phone: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Supplier> {
        validate_name("supplier name", name)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageProducts)?;

        let supplier = Supplier {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone: phone.map(str::to_string),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO suppliers (id, name, phone, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&supplier.id)
            .bind(&supplier.name)
            .bind(&supplier.phone)
            .bind(supplier.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(supplier)
    }

    /// Registers a customer for invoices and repair tickets.
    /// Requires `CreateInvoice` (the front-counter permission).
    pub async fn create_customer(
        &self,
        name: &str,
        phone: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Customer> {
        validate_name("customer name", name)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::CreateInvoice)?;

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            phone: phone.map(str::to_string),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO customers (id, name, phone, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&customer.id)
            .bind(&customer.name)
            .bind(&customer.phone)
            .bind(customer.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(customer)
    }

    // ------------------------------------------------------------------
    // Products
    // ------------------------------------------------------------------

    /// Registers a product. Requires `ManageProducts`.
    ///
    /// A positive `opening_quantity` is written as an `Opening` movement so
    /// the movement log accounts for every unit the shop has ever held.
    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(&self, input: NewProduct, actor_id: &str) -> CoreResult<Product> {
        let result = self.create_product_tx(&input, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("product", &input.sku, "create_product", actor_id, err)
                .await;
        }
        result
    }

    async fn create_product_tx(&self, input: &NewProduct, actor_id: &str) -> CoreResult<Product> {
        validate_sku(&input.sku)?;
        validate_name("product name", &input.name)?;
        validate_price_cents("price", input.price_cents)?;
        validate_price_cents("cost", input.cost_cents)?;
        if input.opening_quantity < 0 {
            return Err(CoreError::InvalidQuantity {
                quantity: input.opening_quantity,
                reason: "opening stock cannot be negative".to_string(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageProducts)?;

        let exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE sku = ?1")
                .bind(&input.sku)
                .fetch_one(&mut *tx)
                .await
                .map_err(DbError::from)?;
        if exists > 0 {
            return Err(ValidationError::Duplicate {
                field: "sku".into(),
                value: input.sku.clone(),
            }
            .into());
        }

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            category_id: input.category_id.clone(),
            supplier_id: input.supplier_id.clone(),
            cost_cents: input.cost_cents,
            price_cents: input.price_cents,
            reorder_level: input.reorder_level,
            quantity_cached: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO products
                (id, sku, name, description, category_id, supplier_id, cost_cents,
                 price_cents, reorder_level, quantity_cached, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 1, ?10, ?11)",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category_id)
        .bind(&product.supplier_id)
        .bind(product.cost_cents)
        .bind(product.price_cents)
        .bind(product.reorder_level)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        if input.opening_quantity > 0 {
            apply_movement(
                &mut tx,
                self.config.allow_backorder,
                &product.id,
                input.opening_quantity,
                MovementReason::Opening,
                None,
                Some("opening stock"),
                actor_id,
            )
            .await?;
        }

        AuditTrail::append(
            &mut tx,
            "product",
            &product.id,
            "create_product",
            actor_id,
            None,
            Some(serde_json::to_value(&product).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(sku = %product.sku, opening = input.opening_quantity, "product created");

        // Re-read so the returned cache reflects the opening movement.
        self.get_product(&product.id).await
    }

    /// Applies a partial update to a product. Requires `ManageProducts`.
    /// Quantity is deliberately absent from the patch; only movements change
    /// quantity.
    #[instrument(skip(self, patch))]
    pub async fn update_product(
        &self,
        product_id: &str,
        patch: ProductPatch,
        actor_id: &str,
    ) -> CoreResult<Product> {
        let result = self.update_product_tx(product_id, &patch, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("product", product_id, "update_product", actor_id, err)
                .await;
        }
        result
    }

    async fn update_product_tx(
        &self,
        product_id: &str,
        patch: &ProductPatch,
        actor_id: &str,
    ) -> CoreResult<Product> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageProducts)?;

        let before = fetch_active_product(&mut tx, product_id).await?;
        let mut after = before.clone();
        if let Some(name) = &patch.name {
            validate_name("product name", name)?;
            after.name = name.clone();
        }
        if let Some(description) = &patch.description {
            after.description = Some(description.clone());
        }
        if let Some(price) = patch.price_cents {
            validate_price_cents("price", price)?;
            after.price_cents = price;
        }
        if let Some(cost) = patch.cost_cents {
            validate_price_cents("cost", cost)?;
            after.cost_cents = cost;
        }
        if let Some(reorder) = patch.reorder_level {
            after.reorder_level = reorder;
        }
        if let Some(supplier_id) = &patch.supplier_id {
            after.supplier_id = Some(supplier_id.clone());
        }
        after.updated_at = Utc::now();

        sqlx::query(
            "UPDATE products
             SET name = ?1, description = ?2, price_cents = ?3, cost_cents = ?4,
                 reorder_level = ?5, supplier_id = ?6, updated_at = ?7
             WHERE id = ?8",
        )
        .bind(&after.name)
        .bind(&after.description)
        .bind(after.price_cents)
        .bind(after.cost_cents)
        .bind(after.reorder_level)
        .bind(&after.supplier_id)
        .bind(after.updated_at)
        .bind(product_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "product",
            product_id,
            "update_product",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(after)
    }

    /// Soft-deactivates a product. Requires `ManageProducts`.
    ///
    /// The row stays because movements and invoice lines reference it; the
    /// product just stops being sellable or consumable.
    #[instrument(skip(self))]
    pub async fn deactivate_product(&self, product_id: &str, actor_id: &str) -> CoreResult<()> {
        let result = self.deactivate_product_tx(product_id, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("product", product_id, "deactivate_product", actor_id, err)
                .await;
        }
        result
    }

    async fn deactivate_product_tx(&self, product_id: &str, actor_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageProducts)?;

        let before = fetch_active_product(&mut tx, product_id).await?;
        sqlx::query("UPDATE products SET is_active = 0, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(product_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "product",
            product_id,
            "deactivate_product",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            None,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(sku = %before.sku, "product deactivated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Movements
    // ------------------------------------------------------------------

    /// Records a manual stock adjustment (stocktake correction).
    /// Requires `AdjustStock`. The delta is signed; the note should say why.
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        product_id: &str,
        delta: i64,
        note: &str,
        actor_id: &str,
    ) -> CoreResult<StockMovement> {
        let result = self.adjust_tx(product_id, delta, note, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("product", product_id, "adjust", actor_id, err)
                .await;
        }
        result
    }

    async fn adjust_tx(
        &self,
        product_id: &str,
        delta: i64,
        note: &str,
        actor_id: &str,
    ) -> CoreResult<StockMovement> {
        validate_quantity(delta.abs())?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::AdjustStock)?;

        fetch_active_product(&mut tx, product_id).await?;
        let movement = apply_movement(
            &mut tx,
            self.config.allow_backorder,
            product_id,
            delta,
            MovementReason::Adjustment,
            None,
            Some(note),
            actor_id,
        )
        .await?;

        AuditTrail::append(
            &mut tx,
            "product",
            product_id,
            "adjust",
            actor_id,
            None,
            Some(serde_json::to_value(&movement).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(product_id, delta, "stock adjusted");
        Ok(movement)
    }

    /// Records goods received from a supplier. Requires `RecordPurchase`.
    #[instrument(skip(self))]
    pub async fn record_purchase(
        &self,
        product_id: &str,
        quantity: i64,
        note: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<StockMovement> {
        let result = self
            .record_purchase_tx(product_id, quantity, note, actor_id)
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure("product", product_id, "record_purchase", actor_id, err)
                .await;
        }
        result
    }

    async fn record_purchase_tx(
        &self,
        product_id: &str,
        quantity: i64,
        note: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<StockMovement> {
        validate_quantity(quantity)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::RecordPurchase)?;

        fetch_active_product(&mut tx, product_id).await?;
        let movement = apply_movement(
            &mut tx,
            self.config.allow_backorder,
            product_id,
            quantity,
            MovementReason::Purchase,
            None,
            note,
            actor_id,
        )
        .await?;

        AuditTrail::append(
            &mut tx,
            "product",
            product_id,
            "record_purchase",
            actor_id,
            None,
            Some(serde_json::to_value(&movement).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(product_id, quantity, "purchase recorded");
        Ok(movement)
    }

    /// Recomputes on-hand quantity from the movement log and repairs the
    /// cache if the two disagree. Requires `AdjustStock`.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, product_id: &str, actor_id: &str) -> CoreResult<Reconciliation> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::AdjustStock)?;

        let cached =
            sqlx::query_scalar::<_, i64>("SELECT quantity_cached FROM products WHERE id = ?1")
                .bind(product_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::from)?
                .ok_or_else(|| CoreError::not_found("product", product_id))?;

        let derived = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(delta), 0) FROM stock_movements WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let corrected = cached != derived;
        if corrected {
            sqlx::query("UPDATE products SET quantity_cached = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(derived)
                .bind(Utc::now())
                .bind(product_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::from)?;

            AuditTrail::append(
                &mut tx,
                "product",
                product_id,
                "reconcile",
                actor_id,
                Some(serde_json::json!({ "quantity_cached": cached })),
                Some(serde_json::json!({ "quantity_cached": derived })),
            )
            .await?;
        }

        tx.commit().await.map_err(DbError::from)?;
        Ok(Reconciliation {
            product_id: product_id.to_string(),
            cached,
            derived,
            corrected,
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetches a product by id, active or not.
    pub async fn get_product(&self, product_id: &str) -> CoreResult<Product> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("product", product_id))
    }

    /// Fetches an active product by SKU.
    pub async fn find_by_sku(&self, sku: &str) -> CoreResult<Product> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE sku = ?1 AND is_active = 1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("product", sku))
    }

    /// Lists active products, optionally filtered by a name/SKU substring.
    pub async fn search(&self, term: Option<&str>) -> CoreResult<Vec<Product>> {
        let products = match term {
            Some(term) => {
                let pattern = format!("%{term}%");
                sqlx::query_as::<_, Product>(
                    "SELECT * FROM products
                     WHERE is_active = 1 AND (sku LIKE ?1 OR name LIKE ?1)
                     ORDER BY name",
                )
                .bind(pattern)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Product>(
                    "SELECT * FROM products WHERE is_active = 1 ORDER BY name",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::from)?;
        Ok(products)
    }

    /// Active products at or below their reorder level.
    pub async fn low_stock(&self) -> CoreResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products
             WHERE is_active = 1 AND quantity_cached <= reorder_level
             ORDER BY quantity_cached - reorder_level",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(products)
    }

    /// On-hand quantity derived from the movement log (not the cache).
    pub async fn current_quantity(&self, product_id: &str) -> CoreResult<i64> {
        let derived = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(delta), 0) FROM stock_movements WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(derived)
    }

    /// Movement history for a product, newest first.
    pub async fn movements(&self, product_id: &str, limit: i64) -> CoreResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            "SELECT * FROM stock_movements
             WHERE product_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(movements)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_product, shop, shop_with};
    use dukan_core::{LedgerConfig, PermissionSet};

    #[tokio::test]
    async fn opening_stock_is_a_movement() {
        let (db, admin, category) = shop().await;
        let product = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        assert_eq!(product.quantity_cached, 5);
        let movements = db.stock().movements(&product.id, 10).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].reason, MovementReason::Opening);
        assert_eq!(movements[0].delta, 5);
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let (db, admin, category) = shop().await;
        seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        let err = db
            .stock()
            .create_product(
                NewProduct {
                    sku: "SCREEN-A52".into(),
                    name: "Another screen".into(),
                    description: None,
                    category_id: category.clone(),
                    supplier_id: None,
                    cost_cents: 100,
                    price_cents: 200,
                    reorder_level: 1,
                    opening_quantity: 0,
                },
                &admin,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn adjustment_below_zero_is_rejected_atomically() {
        let (db, admin, category) = shop().await;
        let product = seed_product(&db, &admin, &category, "BAT-IP13", 80_00, 2).await;

        let err = db
            .stock()
            .adjust(&product.id, -3, "stocktake", &admin)
            .await
            .unwrap_err();
        match err {
            CoreError::InsufficientStock {
                sku,
                available,
                requested,
            } => {
                assert_eq!(sku, "BAT-IP13");
                assert_eq!(available, 2);
                assert_eq!(requested, 3);
            }
            other => panic!("expected InsufficientStock, got {other}"),
        }

        // Nothing was written.
        assert_eq!(db.stock().current_quantity(&product.id).await.unwrap(), 2);
        let product = db.stock().get_product(&product.id).await.unwrap();
        assert_eq!(product.quantity_cached, 2);
    }

    #[tokio::test]
    async fn backorder_flags_movement_until_purchase_reconciles() {
        let config = LedgerConfig {
            allow_backorder: true,
            ..LedgerConfig::default()
        };
        let (db, admin, category) = shop_with(config).await;
        let product = seed_product(&db, &admin, &category, "CASE-S23", 30_00, 1).await;

        let movement = db
            .stock()
            .adjust(&product.id, -3, "sold ahead of delivery", &admin)
            .await
            .unwrap();
        assert!(movement.flagged);
        assert_eq!(db.stock().current_quantity(&product.id).await.unwrap(), -2);

        db.stock()
            .record_purchase(&product.id, 5, Some("restock"), &admin)
            .await
            .unwrap();
        let movements = db.stock().movements(&product.id, 10).await.unwrap();
        assert!(movements.iter().all(|m| !m.flagged));
        assert_eq!(db.stock().current_quantity(&product.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn short_restock_reports_requested_magnitude() {
        let config = LedgerConfig {
            allow_backorder: true,
            ..LedgerConfig::default()
        };
        let (db, admin, category) = shop_with(config).await;
        let product = seed_product(&db, &admin, &category, "CABLE-USB-C", 10_00, 2).await;
        db.stock()
            .adjust(&product.id, -5, "sold ahead of delivery", &admin)
            .await
            .unwrap();

        // With backorder off again, a restock too small to clear the deficit
        // fails the guard; the error reports the units moved, not a signed
        // delta.
        let mut tx = db.pool().begin().await.unwrap();
        let err = apply_movement(
            &mut tx,
            false,
            &product.id,
            2,
            MovementReason::Purchase,
            None,
            None,
            &admin,
        )
        .await
        .unwrap_err();
        match err {
            CoreError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, -3);
                assert_eq!(requested, 2);
            }
            other => panic!("expected InsufficientStock, got {other}"),
        }
    }

    #[tokio::test]
    async fn cache_always_matches_replayed_log() {
        let (db, admin, category) = shop().await;
        let product = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 10).await;

        db.stock()
            .record_purchase(&product.id, 7, None, &admin)
            .await
            .unwrap();
        db.stock()
            .adjust(&product.id, -4, "damaged units", &admin)
            .await
            .unwrap();
        db.stock()
            .adjust(&product.id, 2, "found in back room", &admin)
            .await
            .unwrap();

        let derived = db.stock().current_quantity(&product.id).await.unwrap();
        let cached = db.stock().get_product(&product.id).await.unwrap().quantity_cached;
        assert_eq!(derived, 15);
        assert_eq!(cached, derived);

        let reconciliation = db.stock().reconcile(&product.id, &admin).await.unwrap();
        assert!(!reconciliation.corrected);
        assert_eq!(reconciliation.derived, 15);
    }

    #[tokio::test]
    async fn purchase_requires_permission() {
        let (db, admin, category) = shop().await;
        let product = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        // Technicians cannot record purchases.
        let role = db
            .users()
            .create_role("technician", PermissionSet::technician(), &admin)
            .await
            .unwrap();
        let tech = db
            .users()
            .create_user("tarek", "Tarek", "p4ssword", &role.id, &admin)
            .await
            .unwrap();

        let err = db
            .stock()
            .record_purchase(&product.id, 5, None, &tech.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(db.stock().current_quantity(&product.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn deactivated_product_rejects_new_movements() {
        let (db, admin, category) = shop().await;
        let product = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;

        db.stock()
            .deactivate_product(&product.id, &admin)
            .await
            .unwrap();

        let err = db
            .stock()
            .record_purchase(&product.id, 1, None, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn low_stock_lists_products_at_reorder_level() {
        let (db, admin, category) = shop().await;
        // reorder_level is 2 in the fixture
        seed_product(&db, &admin, &category, "PLENTY", 10_00, 9).await;
        let low = seed_product(&db, &admin, &category, "SCARCE", 10_00, 2).await;

        let listed = db.stock().low_stock().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, low.id);
    }
}

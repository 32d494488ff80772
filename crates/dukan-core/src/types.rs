//! # Domain Types
//!
//! Core domain types for the Dukan POS business ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Domain Types                                   │
//! │                                                                         │
//! │  Inventory              Sales                 Repairs                   │
//! │  ─────────────────      ─────────────────     ─────────────────         │
//! │  Product                Invoice               RepairTicket              │
//! │  Category               InvoiceLine           RepairStatus              │
//! │  Supplier               InvoiceStatus         RepairStatusChange        │
//! │  StockMovement          PaymentMethod         ConsumedPart              │
//! │  MovementReason                                                         │
//! │                                                                         │
//! │  Transfers              Identity              Audit                     │
//! │  ─────────────────      ─────────────────     ─────────────────         │
//! │  Transfer               User                  AuditEntry                │
//! │  TransferService        Role                                            │
//! │  TransferDirection      Customer                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID where staff need one: sku, invoice_number, ticket_number,
//!   reference_number - human-readable, printed on receipts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::permissions::PermissionSet;

// =============================================================================
// Catalog
// =============================================================================

/// A product category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A parts/goods supplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A customer, shared by the sales engine and the repair ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A product available for sale or repair consumption.
///
/// `quantity_cached` mirrors the sum of this product's stock movement deltas.
/// The movement log is the source of truth; the cache is maintained in the
/// same transaction as every movement insert and can be rebuilt from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier, unique.
    pub sku: String,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    pub description: Option<String>,

    pub category_id: String,

    pub supplier_id: Option<String>,

    /// Purchase cost in cents (for margin reports).
    pub cost_cents: i64,

    /// Sale price in cents.
    pub price_cents: i64,

    /// Reorder threshold: at or below this quantity the product is low stock.
    pub reorder_level: i64,

    /// Cached on-hand quantity (derived from the movement log).
    pub quantity_cached: i64,

    /// Soft-delete flag; referenced products are deactivated, never deleted.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the sale price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Checks whether the cached quantity is at or below the reorder level.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.quantity_cached <= self.reorder_level
    }
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    /// Opening balance recorded when a product is created with stock on hand.
    Opening,
    /// Goods received from a supplier.
    Purchase,
    /// Negative movement issued by invoice finalization.
    Sale,
    /// Compensating positive movement (void, cancelled repair).
    Return,
    /// Part consumed by a repair ticket.
    RepairConsumption,
    /// Manual stocktake correction.
    Adjustment,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Opening => "opening",
            MovementReason::Purchase => "purchase",
            MovementReason::Sale => "sale",
            MovementReason::Return => "return",
            MovementReason::RepairConsumption => "repair_consumption",
            MovementReason::Adjustment => "adjustment",
        }
    }
}

/// One immutable, signed quantity delta in the stock movement log.
///
/// The sum of all deltas for a product IS its on-hand quantity. Nothing in
/// the system writes quantity any other way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    /// Signed quantity change. Negative for sales and repair consumption.
    pub delta: i64,
    pub reason: MovementReason,
    /// Id of the originating transaction (invoice, ticket), if any.
    pub reference_id: Option<String>,
    pub note: Option<String>,
    /// True when this movement drove quantity negative in backorder mode
    /// and still awaits a reconciling purchase.
    pub flagged: bool,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sales
// =============================================================================

/// The status of a sales invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Lines being added; the only mutable state.
    #[default]
    Draft,
    /// Paid and committed; stock has been decremented.
    Finalized,
    /// Reversed; compensating movements restored the stock.
    Voided,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Voided => "voided",
        }
    }
}

/// How an invoice was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    /// Store credit / pay-later for known customers.
    Credit,
}

/// A sales invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Invoice {
    pub id: String,
    /// Business number, format `YYYYMMDD-NNNN`, unique, counts up per day.
    pub invoice_number: String,
    pub customer_id: Option<String>,
    pub status: InvoiceStatus,
    pub payment_method: Option<PaymentMethod>,
    pub subtotal_cents: i64,
    /// Whole-invoice discount in basis points, applied to the subtotal.
    pub discount_bps: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub cashier_id: String,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Invoice {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item on an invoice.
/// Uses the snapshot pattern to freeze product data at sale time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoiceLine {
    pub id: String,
    pub invoice_id: String,
    pub product_id: String,
    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    /// Unit price in cents at time of sale (frozen, decoupled from the
    /// current product price).
    pub unit_price_cents: i64,
    pub quantity: i64,
    /// unit_price × quantity.
    pub line_total_cents: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Repairs
// =============================================================================

/// The status of a repair ticket. Transition rules live in [`crate::repair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    /// Device taken in at the counter.
    #[default]
    Received,
    /// Technician is identifying the fault.
    Diagnosing,
    /// Blocked on parts.
    AwaitingParts,
    /// Actively being worked on.
    InRepair,
    /// Fixed, waiting for the customer.
    Ready,
    /// Picked up; terminal.
    Delivered,
    /// Abandoned or rejected; terminal. Consumed parts are returned.
    Cancelled,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStatus::Received => "received",
            RepairStatus::Diagnosing => "diagnosing",
            RepairStatus::AwaitingParts => "awaiting_parts",
            RepairStatus::InRepair => "in_repair",
            RepairStatus::Ready => "ready",
            RepairStatus::Delivered => "delivered",
            RepairStatus::Cancelled => "cancelled",
        }
    }
}

/// A phone-repair job from intake to delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RepairTicket {
    pub id: String,
    /// Business number, format `R-YYYYMMDD-NNNN`, unique.
    pub ticket_number: String,
    pub customer_id: String,
    pub device_brand: Option<String>,
    pub device_model: String,
    /// Customer-reported problem description.
    pub problem: String,
    pub status: RepairStatus,
    /// Estimate given at intake.
    pub quoted_cost_cents: Option<i64>,
    /// Must be set before the ticket can be delivered.
    pub final_cost_cents: Option<i64>,
    pub technician_id: Option<String>,
    pub received_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// One status transition of a repair ticket, giving per-status timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RepairStatusChange {
    pub id: String,
    pub ticket_id: String,
    pub from_status: RepairStatus,
    pub to_status: RepairStatus,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

/// A part taken from inventory for a repair ticket.
///
/// `movement_id` links to the stock movement that recorded the consumption,
/// so the inventory ledger and the ticket never disagree about what was used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ConsumedPart {
    pub id: String,
    pub ticket_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub movement_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Transfers
// =============================================================================

/// A mobile-money / balance service the shop operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransferService {
    VodafoneCash,
    EtisalatCash,
    OrangeCash,
    CardCharge,
    MoneyTransfer,
}

impl TransferService {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferService::VodafoneCash => "vodafone_cash",
            TransferService::EtisalatCash => "etisalat_cash",
            TransferService::OrangeCash => "orange_cash",
            TransferService::CardCharge => "card_charge",
            TransferService::MoneyTransfer => "money_transfer",
        }
    }

    /// All services, for balance summaries.
    pub const ALL: [TransferService; 5] = [
        TransferService::VodafoneCash,
        TransferService::EtisalatCash,
        TransferService::OrangeCash,
        TransferService::CardCharge,
        TransferService::MoneyTransfer,
    ];
}

/// Direction of a balance transfer, which determines the sign of the amount
/// applied to the service's running balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Customer hands cash in; balance goes up.
    CashIn,
    /// Customer takes cash out; balance goes down.
    CashOut,
}

impl TransferDirection {
    /// +1 for cash-in, -1 for cash-out.
    #[inline]
    pub const fn sign(&self) -> i64 {
        match self {
            TransferDirection::CashIn => 1,
            TransferDirection::CashOut => -1,
        }
    }
}

/// One immutable balance-transfer transaction.
///
/// Corrections are new transfers with the inverse amount and `corrects`
/// pointing at the original; rows are never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transfer {
    pub id: String,
    /// Business number, format `TRF-YYYYMMDD-NNNN`, unique.
    pub reference_number: String,
    pub service: TransferService,
    pub direction: TransferDirection,
    /// Strictly increasing sequence number within the service.
    pub seq: i64,
    /// Always positive; the direction carries the sign.
    pub amount_cents: i64,
    /// Fee the shop keeps for handling the transfer. Revenue tracking only;
    /// it never enters the balance chain.
    pub commission_cents: i64,
    /// Running balance for the service after applying this transfer.
    pub balance_after_cents: i64,
    pub counterparty_phone: Option<String>,
    /// Id of the transfer this one reverses, for corrections.
    pub corrects: Option<String>,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// The signed amount this transfer applied to the running balance.
    #[inline]
    pub fn signed_amount_cents(&self) -> i64 {
        self.amount_cents * self.direction.sign()
    }

    /// What the counterparty actually receives: amount minus commission.
    #[inline]
    pub fn net_amount_cents(&self) -> i64 {
        self.amount_cents - self.commission_cents
    }
}

// =============================================================================
// Identity
// =============================================================================

/// A staff member. Exactly one role per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    /// Argon2 PHC string. Never serialized to collaborators.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: String,
    /// Inactive users fail every permission check.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A role owning a set of capability tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub permissions: PermissionSet,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Audit
// =============================================================================

/// One append-only audit record.
///
/// Success entries commit in the same transaction as the mutation they
/// describe. Denial and failure entries carry the reason in `outcome` and
/// never a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AuditEntry {
    pub id: String,
    /// Entity kind: "product", "invoice", "repair_ticket", "transfer", "user".
    pub entity_type: String,
    pub entity_id: String,
    /// Operation name: "finalize", "void", "record_movement", ...
    pub operation: String,
    pub actor_id: String,
    /// "ok", or "denied: ..." / "failed: ..." with the reason.
    pub outcome: String,
    /// JSON snapshot before the mutation, if the entity existed.
    pub before_state: Option<String>,
    /// JSON snapshot after the mutation, on success.
    pub after_state: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_status_default() {
        assert_eq!(InvoiceStatus::default(), InvoiceStatus::Draft);
    }

    #[test]
    fn test_repair_status_default() {
        assert_eq!(RepairStatus::default(), RepairStatus::Received);
    }

    #[test]
    fn test_transfer_direction_sign() {
        assert_eq!(TransferDirection::CashIn.sign(), 1);
        assert_eq!(TransferDirection::CashOut.sign(), -1);
    }

    #[test]
    fn test_low_stock() {
        let now = Utc::now();
        let product = Product {
            id: "p1".into(),
            sku: "SCREEN-A52".into(),
            name: "Galaxy A52 screen".into(),
            description: None,
            category_id: "c1".into(),
            supplier_id: None,
            cost_cents: 90_00,
            price_cents: 150_00,
            reorder_level: 3,
            quantity_cached: 3,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(product.is_low_stock());
        assert_eq!(product.price().cents(), 150_00);
    }
}

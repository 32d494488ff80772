//! # Repair Ledger
//!
//! Repair tickets from intake to delivery, with parts drawn from inventory.
//!
//! ## Ticket Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  RECEIVED ─▶ DIAGNOSING ─┬─▶ AWAITING_PARTS ─▶ READY ─▶ DELIVERED       │
//! │                          └─▶ IN_REPAIR ───────▶                         │
//! │                                                                         │
//! │  Any non-terminal state ──▶ CANCELLED                                   │
//! │                             (consumed parts return to stock)            │
//! │                                                                         │
//! │  Parts may only be consumed in DIAGNOSING / AWAITING_PARTS / IN_REPAIR. │
//! │  DELIVERED requires a final cost. Terminal states accept nothing.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transition legality is pure logic in `dukan_core::repair`; this module
//! binds it to storage, the status log, and the stock movements that part
//! consumption produces.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use dukan_core::repair::{allows_part_consumption, check_transition, is_terminal};
use dukan_core::validation::{validate_name, validate_price_cents, validate_quantity};
use dukan_core::{
    ConsumedPart, CoreError, CoreResult, LedgerConfig, MovementReason, Permission, RepairStatus,
    RepairStatusChange, RepairTicket,
};

use crate::audit::AuditTrail;
use crate::ledger::next_business_number;
use crate::ledger::stock::{apply_movement, fetch_active_product};
use crate::ledger::users::load_actor;
use crate::{DbError, UnitOfWork};

/// Input for [`RepairLedger::open_ticket`].
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub customer_id: String,
    pub device_brand: Option<String>,
    pub device_model: String,
    pub problem: String,
    pub quoted_cost_cents: Option<i64>,
    pub technician_id: Option<String>,
}

/// Runs the repair workshop.
#[derive(Clone)]
pub struct RepairLedger {
    pool: SqlitePool,
    config: Arc<LedgerConfig>,
    audit: AuditTrail,
}

impl RepairLedger {
    pub fn new(pool: SqlitePool, config: Arc<LedgerConfig>) -> Self {
        let audit = AuditTrail::new(pool.clone());
        Self {
            pool,
            config,
            audit,
        }
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Opens a ticket in `Received`. Requires `ManageRepairs`.
    #[instrument(skip(self, input), fields(model = %input.device_model))]
    pub async fn open_ticket(&self, input: NewTicket, actor_id: &str) -> CoreResult<RepairTicket> {
        let result = self.open_ticket_tx(&input, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("repair_ticket", "(new)", "open_ticket", actor_id, err)
                .await;
        }
        result
    }

    async fn open_ticket_tx(&self, input: &NewTicket, actor_id: &str) -> CoreResult<RepairTicket> {
        validate_name("device model", &input.device_model)?;
        validate_name("problem", &input.problem)?;
        if let Some(quoted) = input.quoted_cost_cents {
            validate_price_cents("quoted cost", quoted)?;
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageRepairs)?;

        let customer_exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers WHERE id = ?1")
                .bind(&input.customer_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DbError::from)?;
        if customer_exists == 0 {
            return Err(CoreError::not_found("customer", &input.customer_id));
        }

        let ticket_number =
            next_business_number(&mut tx, "repair_tickets", "ticket_number", "R-").await?;
        let now = Utc::now();
        let ticket = RepairTicket {
            id: Uuid::new_v4().to_string(),
            ticket_number,
            customer_id: input.customer_id.clone(),
            device_brand: input.device_brand.clone(),
            device_model: input.device_model.clone(),
            problem: input.problem.clone(),
            status: dukan_core::repair::INITIAL_STATUS,
            quoted_cost_cents: input.quoted_cost_cents,
            final_cost_cents: None,
            technician_id: input.technician_id.clone(),
            received_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            delivered_at: None,
        };
        sqlx::query(
            "INSERT INTO repair_tickets
                (id, ticket_number, customer_id, device_brand, device_model, problem, status,
                 quoted_cost_cents, final_cost_cents, technician_id, received_by,
                 created_at, updated_at, delivered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, ?11, ?12, NULL)",
        )
        .bind(&ticket.id)
        .bind(&ticket.ticket_number)
        .bind(&ticket.customer_id)
        .bind(&ticket.device_brand)
        .bind(&ticket.device_model)
        .bind(&ticket.problem)
        .bind(ticket.status)
        .bind(ticket.quoted_cost_cents)
        .bind(&ticket.technician_id)
        .bind(&ticket.received_by)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "repair_ticket",
            &ticket.id,
            "open_ticket",
            actor_id,
            None,
            Some(serde_json::to_value(&ticket).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(number = %ticket.ticket_number, "repair ticket opened");
        Ok(ticket)
    }

    // ------------------------------------------------------------------
    // Status machine
    // ------------------------------------------------------------------

    /// Moves a ticket along one legal edge of the state machine.
    /// Requires `ManageRepairs`.
    ///
    /// Delivery demands a final cost on the ticket. Cancellation returns
    /// every consumed part to stock in the same transaction.
    #[instrument(skip(self))]
    pub async fn advance(
        &self,
        ticket_id: &str,
        to: RepairStatus,
        actor_id: &str,
    ) -> CoreResult<RepairTicket> {
        let result = self.advance_tx(ticket_id, to, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("repair_ticket", ticket_id, "advance", actor_id, err)
                .await;
        }
        result
    }

    async fn advance_tx(
        &self,
        ticket_id: &str,
        to: RepairStatus,
        actor_id: &str,
    ) -> CoreResult<RepairTicket> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageRepairs)?;

        let before = fetch_ticket(&mut tx, ticket_id).await?;
        check_transition(before.status, to)?;

        if to == RepairStatus::Delivered && before.final_cost_cents.is_none() {
            return Err(CoreError::InvalidAmount {
                amount_cents: 0,
                reason: "final cost must be set before delivery".to_string(),
            });
        }

        if to == RepairStatus::Cancelled {
            // Give every drawn part back to the shelf.
            let parts = fetch_consumed_parts(&mut tx, ticket_id).await?;
            for part in &parts {
                apply_movement(
                    &mut tx,
                    self.config.allow_backorder,
                    &part.product_id,
                    part.quantity,
                    MovementReason::Return,
                    Some(ticket_id),
                    Some("repair cancelled"),
                    actor_id,
                )
                .await?;
            }
        }

        let now = Utc::now();
        let delivered_at = if to == RepairStatus::Delivered {
            Some(now)
        } else {
            None
        };
        sqlx::query(
            "UPDATE repair_tickets
             SET status = ?1, updated_at = ?2,
                 delivered_at = COALESCE(?3, delivered_at)
             WHERE id = ?4",
        )
        .bind(to)
        .bind(now)
        .bind(delivered_at)
        .bind(ticket_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        sqlx::query(
            "INSERT INTO repair_status_log (id, ticket_id, from_status, to_status, actor_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(ticket_id)
        .bind(before.status)
        .bind(to)
        .bind(actor_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        let after = fetch_ticket(&mut tx, ticket_id).await?;
        AuditTrail::append(
            &mut tx,
            "repair_ticket",
            ticket_id,
            "advance",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(
            number = %after.ticket_number,
            from = before.status.as_str(),
            to = to.as_str(),
            "ticket advanced"
        );
        Ok(after)
    }

    /// Sets the final cost quoted to the customer. Requires `ManageRepairs`.
    /// Rejected once the ticket is terminal.
    #[instrument(skip(self))]
    pub async fn set_final_cost(
        &self,
        ticket_id: &str,
        final_cost_cents: i64,
        actor_id: &str,
    ) -> CoreResult<RepairTicket> {
        validate_price_cents("final cost", final_cost_cents)?;

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageRepairs)?;

        let before = fetch_ticket(&mut tx, ticket_id).await?;
        if is_terminal(before.status) {
            return Err(CoreError::invalid_transition(
                "repair_ticket",
                before.status.as_str(),
                "set_final_cost",
            ));
        }

        sqlx::query("UPDATE repair_tickets SET final_cost_cents = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(final_cost_cents)
            .bind(Utc::now())
            .bind(ticket_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        let after = fetch_ticket(&mut tx, ticket_id).await?;
        AuditTrail::append(
            &mut tx,
            "repair_ticket",
            ticket_id,
            "set_final_cost",
            actor_id,
            Some(serde_json::to_value(&before).map_err(|e| CoreError::Storage(e.to_string()))?),
            Some(serde_json::to_value(&after).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        Ok(after)
    }

    /// Assigns (or reassigns) the working technician. Requires `ManageRepairs`.
    pub async fn assign_technician(
        &self,
        ticket_id: &str,
        technician_id: &str,
        actor_id: &str,
    ) -> CoreResult<RepairTicket> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ManageRepairs)?;

        let before = fetch_ticket(&mut tx, ticket_id).await?;
        if is_terminal(before.status) {
            return Err(CoreError::invalid_transition(
                "repair_ticket",
                before.status.as_str(),
                "assign_technician",
            ));
        }

        // The technician must be a real, usable account.
        load_actor(&mut tx, technician_id).await?;
        sqlx::query("UPDATE repair_tickets SET technician_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(technician_id)
            .bind(Utc::now())
            .bind(ticket_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from)?;

        let after = fetch_ticket(&mut tx, ticket_id).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(after)
    }

    // ------------------------------------------------------------------
    // Part consumption
    // ------------------------------------------------------------------

    /// Draws a part from inventory for a ticket. Requires `ConsumeParts`.
    ///
    /// Only legal while the ticket is actively being worked
    /// (Diagnosing / AwaitingParts / InRepair). The stock movement and the
    /// consumed-part row commit together; the ticket and the inventory
    /// ledger can never disagree about what was used.
    #[instrument(skip(self))]
    pub async fn consume_part(
        &self,
        ticket_id: &str,
        product_id: &str,
        quantity: i64,
        actor_id: &str,
    ) -> CoreResult<ConsumedPart> {
        let result = self
            .consume_part_tx(ticket_id, product_id, quantity, actor_id)
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure("repair_ticket", ticket_id, "consume_part", actor_id, err)
                .await;
        }
        result
    }

    async fn consume_part_tx(
        &self,
        ticket_id: &str,
        product_id: &str,
        quantity: i64,
        actor_id: &str,
    ) -> CoreResult<ConsumedPart> {
        validate_quantity(quantity)?;
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        actor.require(Permission::ConsumeParts)?;

        let ticket = fetch_ticket(&mut tx, ticket_id).await?;
        if !allows_part_consumption(ticket.status) {
            return Err(CoreError::invalid_transition(
                "repair_ticket",
                ticket.status.as_str(),
                "consume_part",
            ));
        }

        fetch_active_product(&mut tx, product_id).await?;
        let movement = apply_movement(
            &mut tx,
            self.config.allow_backorder,
            product_id,
            -quantity,
            MovementReason::RepairConsumption,
            Some(ticket_id),
            None,
            actor_id,
        )
        .await?;

        let part = ConsumedPart {
            id: Uuid::new_v4().to_string(),
            ticket_id: ticket_id.to_string(),
            product_id: product_id.to_string(),
            quantity,
            movement_id: movement.id.clone(),
            created_at: movement.created_at,
        };
        sqlx::query(
            "INSERT INTO consumed_parts (id, ticket_id, product_id, quantity, movement_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&part.id)
        .bind(&part.ticket_id)
        .bind(&part.product_id)
        .bind(part.quantity)
        .bind(&part.movement_id)
        .bind(part.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from)?;

        AuditTrail::append(
            &mut tx,
            "repair_ticket",
            ticket_id,
            "consume_part",
            actor_id,
            None,
            Some(serde_json::to_value(&part).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(ticket_id, product_id, quantity, "part consumed");
        Ok(part)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetches a ticket by id.
    pub async fn get(&self, ticket_id: &str) -> CoreResult<RepairTicket> {
        sqlx::query_as::<_, RepairTicket>("SELECT * FROM repair_tickets WHERE id = ?1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("repair_ticket", ticket_id))
    }

    /// Fetches a ticket by its printed business number.
    pub async fn get_by_number(&self, ticket_number: &str) -> CoreResult<RepairTicket> {
        sqlx::query_as::<_, RepairTicket>(
            "SELECT * FROM repair_tickets WHERE ticket_number = ?1",
        )
        .bind(ticket_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CoreError::not_found("repair_ticket", ticket_number))
    }

    /// Open workload: tickets in the given status, oldest first.
    pub async fn by_status(&self, status: RepairStatus) -> CoreResult<Vec<RepairTicket>> {
        let tickets = sqlx::query_as::<_, RepairTicket>(
            "SELECT * FROM repair_tickets WHERE status = ?1 ORDER BY created_at",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(tickets)
    }

    /// A ticket's transition history in order, for per-status timing.
    pub async fn status_history(&self, ticket_id: &str) -> CoreResult<Vec<RepairStatusChange>> {
        let changes = sqlx::query_as::<_, RepairStatusChange>(
            "SELECT * FROM repair_status_log WHERE ticket_id = ?1 ORDER BY created_at, id",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(changes)
    }

    /// Parts consumed by a ticket.
    pub async fn consumed_parts(&self, ticket_id: &str) -> CoreResult<Vec<ConsumedPart>> {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let parts = fetch_consumed_parts(&mut tx, ticket_id).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(parts)
    }
}

async fn fetch_ticket(tx: &mut UnitOfWork<'_>, ticket_id: &str) -> CoreResult<RepairTicket> {
    sqlx::query_as::<_, RepairTicket>("SELECT * FROM repair_tickets WHERE id = ?1")
        .bind(ticket_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CoreError::not_found("repair_ticket", ticket_id))
}

async fn fetch_consumed_parts(
    tx: &mut UnitOfWork<'_>,
    ticket_id: &str,
) -> CoreResult<Vec<ConsumedPart>> {
    let parts = sqlx::query_as::<_, ConsumedPart>(
        "SELECT * FROM consumed_parts WHERE ticket_id = ?1 ORDER BY created_at, id",
    )
    .bind(ticket_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(DbError::from)?;
    Ok(parts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use crate::testutil::{seed_product, shop};

    async fn ticket_fixture(db: &Database, admin: &str) -> RepairTicket {
        let customer = db
            .stock()
            .create_customer("Mona", Some("01000000000"), admin)
            .await
            .unwrap();
        db.repairs()
            .open_ticket(
                NewTicket {
                    customer_id: customer.id,
                    device_brand: Some("Samsung".into()),
                    device_model: "Galaxy A52".into(),
                    problem: "cracked screen".into(),
                    quoted_cost_cents: Some(250_00),
                    technician_id: None,
                },
                admin,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn ticket_opens_in_received_with_number() {
        let (db, admin, _) = shop().await;
        let ticket = ticket_fixture(&db, &admin).await;
        assert_eq!(ticket.status, RepairStatus::Received);
        assert!(ticket.ticket_number.starts_with("R-"));
        assert!(ticket.ticket_number.ends_with("-0001"));
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let (db, admin, _) = shop().await;
        let ticket = ticket_fixture(&db, &admin).await;

        // Received -> Ready skips the workshop.
        let err = db
            .repairs()
            .advance(&ticket.id, RepairStatus::Ready, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        // No transition log row was written.
        let history = db.repairs().status_history(&ticket.id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn full_lifecycle_is_logged() {
        let (db, admin, _) = shop().await;
        let ticket = ticket_fixture(&db, &admin).await;

        for to in [
            RepairStatus::Diagnosing,
            RepairStatus::InRepair,
            RepairStatus::Ready,
        ] {
            db.repairs().advance(&ticket.id, to, &admin).await.unwrap();
        }
        db.repairs()
            .set_final_cost(&ticket.id, 275_00, &admin)
            .await
            .unwrap();
        let delivered = db
            .repairs()
            .advance(&ticket.id, RepairStatus::Delivered, &admin)
            .await
            .unwrap();
        assert!(delivered.delivered_at.is_some());

        let history = db.repairs().status_history(&ticket.id).await.unwrap();
        let path: Vec<_> = history.iter().map(|c| c.to_status).collect();
        assert_eq!(
            path,
            vec![
                RepairStatus::Diagnosing,
                RepairStatus::InRepair,
                RepairStatus::Ready,
                RepairStatus::Delivered,
            ]
        );
    }

    #[tokio::test]
    async fn delivery_requires_final_cost() {
        let (db, admin, _) = shop().await;
        let ticket = ticket_fixture(&db, &admin).await;
        for to in [
            RepairStatus::Diagnosing,
            RepairStatus::InRepair,
            RepairStatus::Ready,
        ] {
            db.repairs().advance(&ticket.id, to, &admin).await.unwrap();
        }

        let err = db
            .repairs()
            .advance(&ticket.id, RepairStatus::Delivered, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAmount { .. }));
        assert_eq!(
            db.repairs().get(&ticket.id).await.unwrap().status,
            RepairStatus::Ready
        );
    }

    #[tokio::test]
    async fn terminal_tickets_accept_nothing() {
        let (db, admin, _) = shop().await;
        let ticket = ticket_fixture(&db, &admin).await;
        db.repairs()
            .advance(&ticket.id, RepairStatus::Cancelled, &admin)
            .await
            .unwrap();

        for to in [
            RepairStatus::Diagnosing,
            RepairStatus::Ready,
            RepairStatus::Delivered,
            RepairStatus::Cancelled,
        ] {
            let err = db
                .repairs()
                .advance(&ticket.id, to, &admin)
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidTransition { .. }));
        }

        let err = db
            .repairs()
            .set_final_cost(&ticket.id, 100_00, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn consume_part_moves_stock_and_links_movement() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;
        let ticket = ticket_fixture(&db, &admin).await;

        // Not consumable at intake.
        let err = db
            .repairs()
            .consume_part(&ticket.id, &screen.id, 1, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        db.repairs()
            .advance(&ticket.id, RepairStatus::Diagnosing, &admin)
            .await
            .unwrap();
        let part = db
            .repairs()
            .consume_part(&ticket.id, &screen.id, 1, &admin)
            .await
            .unwrap();

        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 4);
        let movements = db.stock().movements(&screen.id, 10).await.unwrap();
        let consumption = movements
            .iter()
            .find(|m| m.reason == MovementReason::RepairConsumption)
            .unwrap();
        assert_eq!(consumption.id, part.movement_id);
        assert_eq!(consumption.reference_id.as_deref(), Some(ticket.id.as_str()));
    }

    #[tokio::test]
    async fn consume_part_fails_atomically_on_short_stock() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 1).await;
        let ticket = ticket_fixture(&db, &admin).await;
        db.repairs()
            .advance(&ticket.id, RepairStatus::Diagnosing, &admin)
            .await
            .unwrap();

        let err = db
            .repairs()
            .consume_part(&ticket.id, &screen.id, 2, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { .. }));
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 1);
        assert!(db.repairs().consumed_parts(&ticket.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_returns_consumed_parts() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;
        let battery = seed_product(&db, &admin, &category, "BAT-A52", 80_00, 5).await;
        let ticket = ticket_fixture(&db, &admin).await;

        db.repairs()
            .advance(&ticket.id, RepairStatus::Diagnosing, &admin)
            .await
            .unwrap();
        db.repairs()
            .consume_part(&ticket.id, &screen.id, 1, &admin)
            .await
            .unwrap();
        db.repairs()
            .consume_part(&ticket.id, &battery.id, 2, &admin)
            .await
            .unwrap();
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 4);
        assert_eq!(db.stock().current_quantity(&battery.id).await.unwrap(), 3);

        db.repairs()
            .advance(&ticket.id, RepairStatus::Cancelled, &admin)
            .await
            .unwrap();
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 5);
        assert_eq!(db.stock().current_quantity(&battery.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn consume_part_requires_permission() {
        let (db, admin, category) = shop().await;
        let screen = seed_product(&db, &admin, &category, "SCREEN-A52", 150_00, 5).await;
        let ticket = ticket_fixture(&db, &admin).await;
        db.repairs()
            .advance(&ticket.id, RepairStatus::Diagnosing, &admin)
            .await
            .unwrap();

        let role = db
            .users()
            .create_role("cashier", dukan_core::PermissionSet::cashier(), &admin)
            .await
            .unwrap();
        let cashier = db
            .users()
            .create_user("sara", "Sara", "p4ssword", &role.id, &admin)
            .await
            .unwrap();

        let err = db
            .repairs()
            .consume_part(&ticket.id, &screen.id, 1, &cashier.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
        assert_eq!(db.stock().current_quantity(&screen.id).await.unwrap(), 5);
    }
}

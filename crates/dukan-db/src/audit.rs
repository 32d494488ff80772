//! # Audit Trail
//!
//! Append-only record of every mutating operation across the ledgers.
//!
//! ## Atomicity Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SUCCESS:  business mutation ──┬── audit entry                          │
//! │            (same transaction ──┘   commit together or not at all;       │
//! │             if the audit write fails, the whole operation fails)        │
//! │                                                                         │
//! │  DENIAL /  transaction rolled back first, then a denial/failure entry   │
//! │  FAILURE:  is appended on its own - it records a reason, never a        │
//! │            state change, so it cannot ride inside the dead transaction  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are never updated or deleted.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use dukan_core::{AuditEntry, CoreError, CoreResult, Permission};

use crate::error::DbError;
use crate::ledger::users::load_actor;
use crate::UnitOfWork;

/// Read/write surface for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pool: SqlitePool,
}

impl AuditTrail {
    /// Creates a new AuditTrail.
    pub fn new(pool: SqlitePool) -> Self {
        AuditTrail { pool }
    }

    /// Appends a success entry inside the caller's open transaction.
    ///
    /// The entry commits (or rolls back) together with the business
    /// mutation it describes. A failed insert fails the whole operation.
    pub(crate) async fn append(
        tx: &mut UnitOfWork<'_>,
        entity_type: &str,
        entity_id: &str,
        operation: &str,
        actor_id: &str,
        before_state: Option<serde_json::Value>,
        after_state: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let before = before_state.map(|v| v.to_string());
        let after = after_state.map(|v| v.to_string());

        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, entity_type, entity_id, operation, actor_id,
                outcome, before_state, after_state, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'ok', ?6, ?7, ?8)
            "#,
        )
        .bind(&id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(operation)
        .bind(actor_id)
        .bind(&before)
        .bind(&after)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;

        Ok(())
    }

    /// Appends a denial/failure entry after the operation's transaction has
    /// rolled back. The entry carries the reason and no state snapshots.
    ///
    /// Best-effort by construction: the business operation has already
    /// failed, so a write error here is logged, not propagated.
    pub(crate) async fn record_failure(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: &str,
        actor_id: &str,
        err: &CoreError,
    ) {
        let outcome = if matches!(err, CoreError::PermissionDenied { .. }) {
            format!("denied: {err}")
        } else {
            format!("failed: {err}")
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, entity_type, entity_id, operation, actor_id,
                outcome, before_state, after_state, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, ?7)
            "#,
        )
        .bind(&id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(operation)
        .bind(actor_id)
        .bind(&outcome)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(write_err) = result {
            warn!(
                entity_type,
                entity_id,
                operation,
                error = %write_err,
                "Could not append failure audit entry"
            );
        }
    }

    // =========================================================================
    // Query surface
    // =========================================================================

    /// Entries for one entity, newest first.
    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
        actor_id: &str,
    ) -> CoreResult<Vec<AuditEntry>> {
        self.require_viewer(actor_id).await?;

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, entity_type, entity_id, operation, actor_id,
                   outcome, before_state, after_state, created_at
            FROM audit_entries
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY created_at DESC
            LIMIT ?3
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(entries)
    }

    /// Entries recorded by one actor, newest first.
    pub async fn for_actor(
        &self,
        subject_actor_id: &str,
        limit: i64,
        actor_id: &str,
    ) -> CoreResult<Vec<AuditEntry>> {
        self.require_viewer(actor_id).await?;

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, entity_type, entity_id, operation, actor_id,
                   outcome, before_state, after_state, created_at
            FROM audit_entries
            WHERE actor_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(subject_actor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(entries)
    }

    /// Entries in a date range, oldest first.
    pub async fn in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
        actor_id: &str,
    ) -> CoreResult<Vec<AuditEntry>> {
        self.require_viewer(actor_id).await?;

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, entity_type, entity_id, operation, actor_id,
                   outcome, before_state, after_state, created_at
            FROM audit_entries
            WHERE created_at >= ?1 AND created_at <= ?2
            ORDER BY created_at
            LIMIT ?3
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(entries)
    }

    async fn require_viewer(&self, actor_id: &str) -> CoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let actor = load_actor(&mut conn, actor_id).await?;
        actor.require(Permission::ViewAudit)
    }
}

// =============================================================================
// Tests
// =============================================================================

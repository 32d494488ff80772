//! # Transfer Ledger
//!
//! Mobile-money and balance services: Vodafone Cash, Etisalat Cash, Orange
//! Cash, card charging, and generic money transfer.
//!
//! ## Running Balance Chain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Per service, transfers form an append-only chain:                      │
//! │                                                                         │
//! │  seq 1: cash_in  500.00  balance_after  500.00                          │
//! │  seq 2: cash_out 200.00  balance_after  300.00                          │
//! │  seq 3: cash_out 300.00  balance_after    0.00                          │
//! │  seq 4: cash_out  50.00  ── rejected: InsufficientBalance ──            │
//! │                                                                         │
//! │  balance_after[n] = balance_after[n-1] + sign(direction) × amount       │
//! │  UNIQUE(service, seq) makes a racing writer fail instead of forking     │
//! │  the chain.                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never edited or deleted. A mistake is fixed by a correction:
//! a new transfer with the inverse direction and `corrects` pointing at the
//! original. Corrections skip the overdraft check, since undoing a mistaken
//! cash-in must succeed even on a drained balance.
//!
//! Transfers may carry a commission the shop keeps. Commission is revenue
//! tracking only and never enters the balance chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use dukan_core::{
    CoreError, CoreResult, LedgerConfig, Permission, Transfer, TransferDirection, TransferService,
};

use crate::audit::AuditTrail;
use crate::ledger::next_business_number;
use crate::ledger::users::load_actor;
use crate::{DbError, UnitOfWork};

/// Runs the balance-transfer side counter.
#[derive(Clone)]
pub struct TransferLedger {
    pool: SqlitePool,
    config: Arc<LedgerConfig>,
    audit: AuditTrail,
}

impl TransferLedger {
    pub fn new(pool: SqlitePool, config: Arc<LedgerConfig>) -> Self {
        let audit = AuditTrail::new(pool.clone());
        Self {
            pool,
            config,
            audit,
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Appends a transfer to a service's chain. Requires `RecordTransfer`.
    #[instrument(skip(self))]
    pub async fn record_transfer(
        &self,
        service: TransferService,
        direction: TransferDirection,
        amount_cents: i64,
        commission_cents: i64,
        counterparty_phone: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Transfer> {
        let result = self
            .append_transfer(
                service,
                direction,
                amount_cents,
                commission_cents,
                counterparty_phone,
                None,
                actor_id,
            )
            .await;
        if let Err(err) = &result {
            self.audit
                .record_failure(
                    "transfer",
                    service.as_str(),
                    "record_transfer",
                    actor_id,
                    err,
                )
                .await;
        }
        result
    }

    /// Reverses a transfer with an inverse entry. Requires `CorrectTransfer`.
    ///
    /// A transfer may be corrected once, and a correction can never itself
    /// be corrected; fixing a wrong correction means recording the intended
    /// transfer anew.
    #[instrument(skip(self))]
    pub async fn correct_transfer(
        &self,
        original_id: &str,
        actor_id: &str,
    ) -> CoreResult<Transfer> {
        let result = self.correct_transfer_tx(original_id, actor_id).await;
        if let Err(err) = &result {
            self.audit
                .record_failure("transfer", original_id, "correct_transfer", actor_id, err)
                .await;
        }
        result
    }

    async fn correct_transfer_tx(&self, original_id: &str, actor_id: &str) -> CoreResult<Transfer> {
        // This read only shapes the inverse entry. The once-only rule is
        // enforced by append_transfer inside the transaction it writes in.
        let original = self.get(original_id).await?;

        let inverse = match original.direction {
            TransferDirection::CashIn => TransferDirection::CashOut,
            TransferDirection::CashOut => TransferDirection::CashIn,
        };
        // The balance reverses; commission the shop collected stays earned.
        self.append_transfer(
            original.service,
            inverse,
            original.amount_cents,
            0,
            original.counterparty_phone.as_deref(),
            Some(original_id),
            actor_id,
        )
        .await
    }

    /// The single append path for both recording and correcting.
    async fn append_transfer(
        &self,
        service: TransferService,
        direction: TransferDirection,
        amount_cents: i64,
        commission_cents: i64,
        counterparty_phone: Option<&str>,
        corrects: Option<&str>,
        actor_id: &str,
    ) -> CoreResult<Transfer> {
        if amount_cents <= 0 {
            return Err(CoreError::InvalidAmount {
                amount_cents,
                reason: "transfer amount must be positive".to_string(),
            });
        }
        if commission_cents < 0 {
            return Err(CoreError::InvalidAmount {
                amount_cents: commission_cents,
                reason: "commission cannot be negative".to_string(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(DbError::from)?;
        let actor = load_actor(&mut tx, actor_id).await?;
        let required = if corrects.is_some() {
            Permission::CorrectTransfer
        } else {
            Permission::RecordTransfer
        };
        actor.require(required)?;

        // Once-only rule, checked under the transaction the correction
        // writes in. Writers racing on separate connections collide on the
        // unique index over `corrects` instead.
        if let Some(original_id) = corrects {
            let original_corrects = sqlx::query_scalar::<_, Option<String>>(
                "SELECT corrects FROM transfers WHERE id = ?1",
            )
            .bind(original_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("transfer", original_id))?;
            if original_corrects.is_some() {
                return Err(CoreError::invalid_transition(
                    "transfer",
                    "correction",
                    "corrected",
                ));
            }
            let already = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM transfers WHERE corrects = ?1",
            )
            .bind(original_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DbError::from)?;
            if already > 0 {
                return Err(CoreError::invalid_transition(
                    "transfer",
                    "corrected",
                    "corrected",
                ));
            }
        }

        let (prev_seq, prev_balance) = chain_head(&mut tx, service).await?;
        let balance_after = prev_balance + direction.sign() * amount_cents;

        // Corrections bypass the overdraft check: reversing a mistaken
        // cash-in must go through even if the balance was spent since.
        if balance_after < 0 && corrects.is_none() && !self.config.overdraft_allowed(service) {
            return Err(CoreError::InsufficientBalance {
                service: service.as_str().to_string(),
                balance_cents: prev_balance,
                requested_cents: amount_cents,
            });
        }

        let reference_number =
            next_business_number(&mut tx, "transfers", "reference_number", "TRF-").await?;
        let transfer = Transfer {
            id: Uuid::new_v4().to_string(),
            reference_number,
            service,
            direction,
            seq: prev_seq + 1,
            amount_cents,
            commission_cents,
            balance_after_cents: balance_after,
            counterparty_phone: counterparty_phone.map(str::to_string),
            corrects: corrects.map(str::to_string),
            actor_id: actor_id.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO transfers
                (id, reference_number, service, direction, seq, amount_cents,
                 commission_cents, balance_after_cents, counterparty_phone,
                 corrects, actor_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&transfer.id)
        .bind(&transfer.reference_number)
        .bind(transfer.service)
        .bind(transfer.direction)
        .bind(transfer.seq)
        .bind(transfer.amount_cents)
        .bind(transfer.commission_cents)
        .bind(transfer.balance_after_cents)
        .bind(&transfer.counterparty_phone)
        .bind(&transfer.corrects)
        .bind(&transfer.actor_id)
        .bind(transfer.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { ref field } if field.ends_with("corrects") => {
                CoreError::invalid_transition("transfer", "corrected", "corrected")
            }
            other => other.into(),
        })?;

        let operation = if corrects.is_some() {
            "correct_transfer"
        } else {
            "record_transfer"
        };
        AuditTrail::append(
            &mut tx,
            "transfer",
            &transfer.id,
            operation,
            actor_id,
            None,
            Some(serde_json::to_value(&transfer).map_err(|e| CoreError::Storage(e.to_string()))?),
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;
        info!(
            service = service.as_str(),
            seq = transfer.seq,
            amount_cents,
            balance_after,
            "transfer recorded"
        );
        Ok(transfer)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetches a transfer by id.
    pub async fn get(&self, transfer_id: &str) -> CoreResult<Transfer> {
        sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = ?1")
            .bind(transfer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| CoreError::not_found("transfer", transfer_id))
    }

    /// Current balance of one service.
    pub async fn balance(&self, service: TransferService) -> CoreResult<i64> {
        let balance = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT balance_after_cents FROM transfers
             WHERE service = ?1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(service)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .flatten()
        .unwrap_or(0);
        Ok(balance)
    }

    /// Balances of every service, including those with no transfers yet.
    pub async fn balances(&self) -> CoreResult<BTreeMap<TransferService, i64>> {
        let mut balances = BTreeMap::new();
        for service in TransferService::ALL {
            balances.insert(service, self.balance(service).await?);
        }
        Ok(balances)
    }

    /// A service's chain, newest first.
    pub async fn history(
        &self,
        service: TransferService,
        limit: i64,
    ) -> CoreResult<Vec<Transfer>> {
        let transfers = sqlx::query_as::<_, Transfer>(
            "SELECT * FROM transfers WHERE service = ?1 ORDER BY seq DESC LIMIT ?2",
        )
        .bind(service)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(transfers)
    }
}

/// Last (seq, balance) of a service's chain, `(0, 0)` for an empty chain.
async fn chain_head(
    tx: &mut UnitOfWork<'_>,
    service: TransferService,
) -> CoreResult<(i64, i64)> {
    let head = sqlx::query_as::<_, (i64, i64)>(
        "SELECT seq, balance_after_cents FROM transfers
         WHERE service = ?1 ORDER BY seq DESC LIMIT 1",
    )
    .bind(service)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DbError::from)?;
    Ok(head.unwrap_or((0, 0)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{shop, shop_with};
    use dukan_core::PermissionSet;
    use TransferDirection::{CashIn, CashOut};
    use TransferService::{CardCharge, VodafoneCash};

    #[tokio::test]
    async fn balance_chain_telescopes() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();

        transfers
            .record_transfer(VodafoneCash, CashIn, 500_00, 0, None, &admin)
            .await
            .unwrap();
        transfers
            .record_transfer(VodafoneCash, CashOut, 200_00, 0, Some("01011111111"), &admin)
            .await
            .unwrap();
        transfers
            .record_transfer(VodafoneCash, CashIn, 50_00, 0, None, &admin)
            .await
            .unwrap();

        assert_eq!(transfers.balance(VodafoneCash).await.unwrap(), 350_00);

        // Every row's balance equals its predecessor plus its signed amount.
        let chain = transfers.history(VodafoneCash, 100).await.unwrap();
        let mut prev_balance = 0;
        for row in chain.iter().rev() {
            assert_eq!(
                row.balance_after_cents,
                prev_balance + row.signed_amount_cents()
            );
            prev_balance = row.balance_after_cents;
        }
        // And the chain's sum of signed amounts is the balance.
        let signed_sum: i64 = chain.iter().map(Transfer::signed_amount_cents).sum();
        assert_eq!(signed_sum, 350_00);
    }

    #[tokio::test]
    async fn sequences_are_dense_and_per_service() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();

        for _ in 0..3 {
            transfers
                .record_transfer(VodafoneCash, CashIn, 10_00, 0, None, &admin)
                .await
                .unwrap();
        }
        let card = transfers
            .record_transfer(CardCharge, CashIn, 10_00, 0, None, &admin)
            .await
            .unwrap();

        let chain = transfers.history(VodafoneCash, 100).await.unwrap();
        let seqs: Vec<_> = chain.iter().rev().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(card.seq, 1, "services number independently");
    }

    #[tokio::test]
    async fn cash_out_beyond_balance_is_rejected() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();
        transfers
            .record_transfer(VodafoneCash, CashIn, 100_00, 0, None, &admin)
            .await
            .unwrap();

        let err = transfers
            .record_transfer(VodafoneCash, CashOut, 150_00, 0, None, &admin)
            .await
            .unwrap_err();
        match err {
            CoreError::InsufficientBalance {
                balance_cents,
                requested_cents,
                ..
            } => {
                assert_eq!(balance_cents, 100_00);
                assert_eq!(requested_cents, 150_00);
            }
            other => panic!("expected InsufficientBalance, got {other}"),
        }
        assert_eq!(transfers.balance(VodafoneCash).await.unwrap(), 100_00);
    }

    #[tokio::test]
    async fn overdraft_service_may_go_negative() {
        let mut config = LedgerConfig::default();
        config.overdraft.insert(VodafoneCash, true);
        let (db, admin, _) = shop_with(config).await;

        let transfer = db
            .transfers()
            .record_transfer(VodafoneCash, CashOut, 75_00, 0, None, &admin)
            .await
            .unwrap();
        assert_eq!(transfer.balance_after_cents, -75_00);
        assert_eq!(db.transfers().balance(VodafoneCash).await.unwrap(), -75_00);
    }

    #[tokio::test]
    async fn zero_and_negative_amounts_are_rejected() {
        let (db, admin, _) = shop().await;
        for amount in [0, -50_00] {
            let err = db
                .transfers()
                .record_transfer(VodafoneCash, CashIn, amount, 0, None, &admin)
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidAmount { .. }));
        }
    }

    #[tokio::test]
    async fn correction_reverses_exactly_once() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();
        let original = transfers
            .record_transfer(VodafoneCash, CashIn, 300_00, 0, None, &admin)
            .await
            .unwrap();

        let correction = transfers
            .correct_transfer(&original.id, &admin)
            .await
            .unwrap();
        assert_eq!(correction.direction, CashOut);
        assert_eq!(correction.amount_cents, 300_00);
        assert_eq!(correction.corrects.as_deref(), Some(original.id.as_str()));
        assert_eq!(transfers.balance(VodafoneCash).await.unwrap(), 0);

        // Second correction of the same transfer is rejected.
        let err = transfers
            .correct_transfer(&original.id, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        // A correction cannot itself be corrected.
        let err = transfers
            .correct_transfer(&correction.id, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn correction_of_cash_in_ignores_overdraft() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();
        let mistaken = transfers
            .record_transfer(VodafoneCash, CashIn, 500_00, 0, None, &admin)
            .await
            .unwrap();
        // The balance is spent before the mistake is noticed.
        transfers
            .record_transfer(VodafoneCash, CashOut, 400_00, 0, None, &admin)
            .await
            .unwrap();

        let correction = transfers
            .correct_transfer(&mistaken.id, &admin)
            .await
            .unwrap();
        assert_eq!(correction.balance_after_cents, -400_00);
    }

    #[tokio::test]
    async fn racing_corrections_cannot_both_reverse() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();
        let original = transfers
            .record_transfer(VodafoneCash, CashIn, 500_00, 0, None, &admin)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            transfers.correct_transfer(&original.id, &admin),
            transfers.correct_transfer(&original.id, &admin),
        );
        assert!(
            a.is_ok() != b.is_ok(),
            "exactly one correction may land: {a:?} {b:?}"
        );

        let corrections = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transfers WHERE corrects = ?1",
        )
        .bind(&original.id)
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(corrections, 1);
        assert_eq!(transfers.balance(VodafoneCash).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commission_is_recorded_outside_the_balance_chain() {
        let (db, admin, _) = shop().await;
        let transfers = db.transfers();

        let transfer = transfers
            .record_transfer(VodafoneCash, CashIn, 200_00, 5_00, Some("01011111111"), &admin)
            .await
            .unwrap();
        assert_eq!(transfer.commission_cents, 5_00);
        assert_eq!(transfer.net_amount_cents(), 195_00);
        // The full amount moves on the chain; commission is kept aside.
        assert_eq!(transfer.balance_after_cents, 200_00);
        assert_eq!(transfers.balance(VodafoneCash).await.unwrap(), 200_00);

        let err = transfers
            .record_transfer(VodafoneCash, CashIn, 100_00, -1_00, None, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn recording_requires_permission() {
        let (db, admin, _) = shop().await;
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
            .transfers()
            .record_transfer(VodafoneCash, CashIn, 100_00, 0, None, &tech.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));

        // Cashiers may record but not correct.
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
        let transfer = db
            .transfers()
            .record_transfer(VodafoneCash, CashIn, 100_00, 0, None, &cashier.id)
            .await
            .unwrap();
        let err = db
            .transfers()
            .correct_transfer(&transfer.id, &cashier.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }
}

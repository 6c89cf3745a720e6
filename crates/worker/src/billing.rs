//! Exactly-once usage billing.
//!
//! A task is charged at most once. The `(usage_billing, task_id)` ledger row
//! is the idempotence guard: the existence check, the ledger insert, and the
//! balance debit share one transaction with the owner's row locked, and the
//! partial unique index turns a lost race into [`ChargeResult::AlreadyCharged`].

use std::path::Path;

use plangen_core::billing::{
    compute_charge, read_usage_cost, usage_billing_enabled, BillingRates, USAGE_BILLING_SOURCE,
};
use plangen_core::types::DbId;
use plangen_db::models::credit_ledger::NewLedgerEntry;
use plangen_db::repositories::{CreditLedgerRepo, TaskRepo, UserRepo};
use plangen_db::transient::is_unique_violation;
use sqlx::{PgConnection, PgPool};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TaskNotFound,
    OwnerNotFound,
    OptedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeResult {
    Charged {
        credits: i64,
        usd_micros: i64,
        new_balance: i64,
    },
    AlreadyCharged,
    NothingToCharge,
    Skipped(SkipReason),
}

#[derive(Clone)]
pub struct BillingLedger {
    pool: PgPool,
    rates: BillingRates,
}

impl BillingLedger {
    pub fn new(pool: PgPool, rates: BillingRates) -> Self {
        Self { pool, rates }
    }

    /// Charge a task's usage, plus the success fee when `success`, against
    /// its owner's balance. Safe to call any number of times.
    pub async fn charge_once(
        &self,
        task_id: DbId,
        work_dir: &Path,
        success: bool,
    ) -> Result<ChargeResult, BillingError> {
        let usage_usd = read_usage_cost(work_dir);

        let mut tx = self.pool.begin().await?;
        let result = match self.charge_in(&mut tx, task_id, usage_usd, success).await {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                tracing::info!(task_id, "Concurrent charge won the race");
                return Ok(ChargeResult::AlreadyCharged);
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(task_id, error = %rollback_err, "Billing rollback failed");
                }
                return Err(e.into());
            }
        };

        if let ChargeResult::Charged {
            credits,
            usd_micros,
            new_balance,
        } = result
        {
            tx.commit().await?;
            tracing::info!(task_id, credits, usd_micros, new_balance, success, "Task charged");
        } else {
            tx.rollback().await?;
            tracing::info!(task_id, result = ?result, "No charge recorded");
        }
        Ok(result)
    }

    async fn charge_in(
        &self,
        conn: &mut PgConnection,
        task_id: DbId,
        usage_usd: f64,
        success: bool,
    ) -> Result<ChargeResult, sqlx::Error> {
        let Some((owner_id, parameters)) = TaskRepo::billing_subject(conn, task_id).await? else {
            return Ok(ChargeResult::Skipped(SkipReason::TaskNotFound));
        };
        if !usage_billing_enabled(&parameters) {
            return Ok(ChargeResult::Skipped(SkipReason::OptedOut));
        }

        let charge = compute_charge(usage_usd, success, self.rates);
        if charge.credits == 0 {
            return Ok(ChargeResult::NothingToCharge);
        }

        if UserRepo::lock_balance(conn, owner_id).await?.is_none() {
            return Ok(ChargeResult::Skipped(SkipReason::OwnerNotFound));
        }

        let external_id = task_id.to_string();
        if CreditLedgerRepo::exists(conn, USAGE_BILLING_SOURCE, &external_id).await? {
            return Ok(ChargeResult::AlreadyCharged);
        }

        let reason = format!("Plan generation usage for task {task_id}");
        CreditLedgerRepo::insert(
            conn,
            &NewLedgerEntry {
                user_id: owner_id,
                delta: -charge.credits,
                reason: &reason,
                source: USAGE_BILLING_SOURCE,
                external_id: Some(&external_id),
            },
        )
        .await?;
        let new_balance = UserRepo::debit(conn, owner_id, charge.credits).await?;

        Ok(ChargeResult::Charged {
            credits: charge.credits,
            usd_micros: charge.usd_micros,
            new_balance,
        })
    }
}

//! Balance Store
//!
//! Authoritative per-user credit balance, maintained as a cached projection
//! over the append-only ledger. Every mutation goes through `apply_delta`,
//! which commits the guarded balance update and the ledger row in one
//! transaction. The idempotency key on each ledger row makes retries from
//! the confirmation processor and the renewal sweep safe: a replayed key
//! returns the previously computed result without touching the balance.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use vitrine_shared::{LedgerCategory, LedgerEntry};

/// Result of an `apply_delta` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaOutcome {
    /// False when the idempotency key had already been applied
    pub applied: bool,
    /// Balance after the delta (the stored result on replay)
    pub balance: i64,
    pub entry_id: Uuid,
}

/// Cached balance vs. ledger sum for one owner
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub owner_id: Uuid,
    pub cached_amount: i64,
    pub ledger_sum: i64,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.cached_amount == self.ledger_sum
    }
}

/// Service owning all balance mutations
#[derive(Clone)]
pub struct BalanceStore {
    pool: PgPool,
}

impl BalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance for an owner. An owner with no balance row reads as 0.
    pub async fn get_balance(&self, owner_id: Uuid) -> LedgerResult<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT amount FROM balances WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(amount,)| amount).unwrap_or(0))
    }

    /// Apply a signed delta atomically with its ledger entry.
    ///
    /// The idempotency key is mandatory and unique per logical event:
    /// reapplying the same key is a no-op that returns the previously
    /// computed balance. A delta that would drive the balance negative
    /// fails with `InsufficientBalance` and writes nothing.
    pub async fn apply_delta(
        &self,
        owner_id: Uuid,
        delta: i64,
        category: LedgerCategory,
        reason: &str,
        external_ref: Option<&str>,
        idempotency_key: &str,
    ) -> LedgerResult<DeltaOutcome> {
        let mut tx = self.pool.begin().await?;

        // Replayed key: return the stored result, no side effects.
        let prior: Option<(Uuid, i64)> = sqlx::query_as(
            "SELECT id, balance_after FROM ledger_entries WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((entry_id, balance_after)) = prior {
            return Ok(DeltaOutcome {
                applied: false,
                balance: balance_after,
                entry_id,
            });
        }

        sqlx::query(
            "INSERT INTO balances (owner_id) VALUES ($1) ON CONFLICT (owner_id) DO NOTHING",
        )
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        // Guarded update: the WHERE clause rejects any delta that would
        // drive the balance negative.
        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE balances
            SET amount = amount + $2,
                lifetime_earned = lifetime_earned + GREATEST($2, 0),
                lifetime_spent = lifetime_spent + GREATEST(-$2, 0),
                updated_at = NOW()
            WHERE owner_id = $1 AND amount + $2 >= 0
            RETURNING amount
            "#,
        )
        .bind(owner_id)
        .bind(delta)
        .fetch_optional(&mut *tx)
        .await?;

        let balance = match updated {
            Some((amount,)) => amount,
            None => {
                let available: Option<(i64,)> =
                    sqlx::query_as("SELECT amount FROM balances WHERE owner_id = $1")
                        .bind(owner_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                tx.rollback().await?;
                return Err(LedgerError::InsufficientBalance {
                    required: -delta,
                    available: available.map(|(a,)| a).unwrap_or(0),
                });
            }
        };

        let inserted: Result<(Uuid,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO ledger_entries
                (owner_id, delta, category, reason, external_ref, idempotency_key, balance_after)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(owner_id)
        .bind(delta)
        .bind(category)
        .bind(reason)
        .bind(external_ref)
        .bind(idempotency_key)
        .bind(balance)
        .fetch_one(&mut *tx)
        .await;

        let entry_id = match inserted {
            Ok((id,)) => id,
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                // Lost the unique-key race to a concurrent apply. Roll back
                // our balance update and hand back the winner's result.
                tx.rollback().await?;
                let winner: Option<(Uuid, i64)> = sqlx::query_as(
                    "SELECT id, balance_after FROM ledger_entries WHERE idempotency_key = $1",
                )
                .bind(idempotency_key)
                .fetch_optional(&self.pool)
                .await?;
                return match winner {
                    Some((entry_id, balance_after)) => Ok(DeltaOutcome {
                        applied: false,
                        balance: balance_after,
                        entry_id,
                    }),
                    // Winner hasn't committed yet; the caller retries.
                    None => Err(LedgerError::ConcurrentModification(format!(
                        "ledger key {} is being applied concurrently",
                        idempotency_key
                    ))),
                };
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        tracing::info!(
            owner_id = %owner_id,
            delta = delta,
            category = %category,
            balance = balance,
            idempotency_key = %idempotency_key,
            "Applied balance delta"
        );

        Ok(DeltaOutcome {
            applied: true,
            balance,
            entry_id,
        })
    }

    /// Recent ledger entries for an owner, newest first
    pub async fn entries(&self, owner_id: Uuid, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let entries: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, owner_id, delta, category, reason, external_ref,
                   idempotency_key, balance_after, created_at
            FROM ledger_entries
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Validate the cached balance against the ledger sum for one owner.
    /// A mismatch is an invariant violation and must never be swallowed.
    pub async fn reconcile(&self, owner_id: Uuid) -> LedgerResult<ReconcileReport> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE((SELECT amount FROM balances WHERE owner_id = $1), 0),
                COALESCE((SELECT SUM(delta) FROM ledger_entries WHERE owner_id = $1), 0)
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        let report = ReconcileReport {
            owner_id,
            cached_amount: row.0,
            ledger_sum: row.1,
        };

        if !report.is_consistent() {
            tracing::error!(
                owner_id = %owner_id,
                cached_amount = report.cached_amount,
                ledger_sum = report.ledger_sum,
                "Balance does not reconcile with ledger sum"
            );
            return Err(LedgerError::InvariantViolation(format!(
                "balance for {} is {} but ledger sums to {}",
                owner_id, report.cached_amount, report.ledger_sum
            )));
        }

        Ok(report)
    }

    /// Find every owner whose cached balance has drifted from the ledger.
    /// Used by the worker's daily reconciliation pass.
    pub async fn find_drifted(&self) -> LedgerResult<Vec<ReconcileReport>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT b.owner_id, b.amount, COALESCE(l.total, 0)
            FROM balances b
            LEFT JOIN (
                SELECT owner_id, SUM(delta) AS total
                FROM ledger_entries
                GROUP BY owner_id
            ) l ON l.owner_id = b.owner_id
            WHERE b.amount <> COALESCE(l.total, 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(owner_id, cached_amount, ledger_sum)| ReconcileReport {
                owner_id,
                cached_amount,
                ledger_sum,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_report_consistency() {
        let report = ReconcileReport {
            owner_id: Uuid::new_v4(),
            cached_amount: 100,
            ledger_sum: 100,
        };
        assert!(report.is_consistent());

        let drifted = ReconcileReport {
            owner_id: Uuid::new_v4(),
            cached_amount: 100,
            ledger_sum: 90,
        };
        assert!(!drifted.is_consistent());
    }
}

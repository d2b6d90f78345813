//! Idempotency Guard
//!
//! Deduplicates external payment events and internal renewal attempts so
//! each is applied at most once. A claim is one atomic insert with a
//! uniqueness constraint: exactly one concurrent caller wins the insert and
//! proceeds, the rest observe the claim. The first claimant stores its
//! result under the key on completion; replays receive the stored result
//! without re-executing side effects.
//!
//! If a claimant crashes before recording a result, the key stays claimed
//! but unresolved. Once the claim is older than the staleness window it may
//! be re-claimed exactly once (the `reclaimed` latch); a key whose re-claim
//! also dies surfaces `ClaimStale` for operator attention instead of
//! looping.

use sqlx::PgPool;
use time::Duration;

use crate::error::{LedgerError, LedgerResult};

/// Outcome of a claim attempt
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller owns the key and must record a result when done
    Claimed {
        /// True when this claim recovered a stale, unresolved key
        recovered: bool,
    },
    /// A previous claimant already recorded a result
    Resolved(serde_json::Value),
    /// Another claimant holds the key and is within the staleness window
    InFlight,
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
    stale_after: Duration,
}

impl IdempotencyGuard {
    /// Default window after which an unresolved claim is considered dead
    pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(15);

    pub fn new(pool: PgPool) -> Self {
        Self::with_stale_after(pool, Self::DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(pool: PgPool, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    /// Atomically claim a key for exclusive processing.
    ///
    /// The INSERT...ON CONFLICT...RETURNING statement ensures only one
    /// concurrent caller can claim. The conflict arm re-claims a stale,
    /// unresolved key exactly once.
    pub async fn claim_once(&self, key: &str) -> LedgerResult<ClaimOutcome> {
        let claimed: Option<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_claims (key, claimed_at)
            VALUES ($1, NOW())
            ON CONFLICT (key) DO UPDATE SET
                claimed_at = NOW(),
                reclaimed = TRUE
            WHERE idempotency_claims.resolved_at IS NULL
              AND idempotency_claims.reclaimed = FALSE
              AND idempotency_claims.claimed_at < NOW() - ($2 || ' seconds')::INTERVAL
            RETURNING reclaimed
            "#,
        )
        .bind(key)
        .bind(self.stale_after.whole_seconds())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((recovered,)) = claimed {
            if recovered {
                tracing::warn!(key = %key, "Recovered stale idempotency claim");
            }
            return Ok(ClaimOutcome::Claimed { recovered });
        }

        // Did not win the claim: either resolved, in flight, or dead twice.
        let existing: Option<(Option<serde_json::Value>, bool, bool)> = sqlx::query_as(
            r#"
            SELECT result,
                   resolved_at IS NOT NULL,
                   reclaimed AND resolved_at IS NULL
                       AND claimed_at < NOW() - ($2 || ' seconds')::INTERVAL
            FROM idempotency_claims
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(self.stale_after.whole_seconds())
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((result, true, _)) => Ok(ClaimOutcome::Resolved(
                result.unwrap_or(serde_json::Value::Null),
            )),
            Some((_, false, true)) => {
                tracing::error!(
                    key = %key,
                    "Idempotency claim died twice without resolving"
                );
                Err(LedgerError::ClaimStale(key.to_string()))
            }
            Some((_, false, false)) => Ok(ClaimOutcome::InFlight),
            // Row vanished between statements; treat as in flight and let
            // the gateway redeliver.
            None => Ok(ClaimOutcome::InFlight),
        }
    }

    /// Record the result for a claimed key so replays short-circuit
    pub async fn resolve(&self, key: &str, result: &serde_json::Value) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE idempotency_claims SET resolved_at = NOW(), result = $2 WHERE key = $1",
        )
        .bind(key)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete resolved claims older than the retention window
    /// (maintenance job)
    pub async fn purge_resolved(&self, retention_days: i32) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_claims
            WHERE resolved_at IS NOT NULL
              AND resolved_at < NOW() - ($1 || ' days')::INTERVAL
            "#,
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(
                deleted = result.rows_affected(),
                retention_days = retention_days,
                "Purged resolved idempotency claims"
            );
        }

        Ok(result.rows_affected())
    }
}

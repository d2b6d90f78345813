//! Renewal Scheduler
//!
//! The periodic sweep that keeps auto-renewing entitlements alive: find
//! entitlements expiring within the lookahead window, debit the renewal
//! cost, and extend, or record the failure and let the entitlement lapse.
//!
//! Every attempt is keyed by `(entitlement, current end)`, so two
//! concurrent ticks cannot both extend the same period and a failed period
//! never retries: the next attempt happens only for the next expiry cycle
//! after a fresh grant or renewal moves the end forward.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::balance::BalanceStore;
use crate::entitlement::EntitlementStore;
use crate::error::{LedgerError, LedgerResult};
use crate::idempotency::{ClaimOutcome, IdempotencyGuard};
use crate::notify::Notifier;
use crate::packages::PackageStore;
use vitrine_shared::{Entitlement, LedgerCategory};

/// How far ahead of expiry the sweep attempts renewal
const DEFAULT_LOOKAHEAD: Duration = Duration::hours(24);

/// Counters from one sweep run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenewalSweepSummary {
    pub examined: usize,
    pub renewed: usize,
    pub insufficient: usize,
    /// Periods already attempted (claimed or resolved by an earlier tick)
    pub skipped: usize,
    pub failed: usize,
}

pub struct RenewalScheduler {
    guard: IdempotencyGuard,
    balances: BalanceStore,
    entitlements: EntitlementStore,
    packages: PackageStore,
    notifier: Notifier,
    lookahead: Duration,
}

impl RenewalScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self::with_lookahead(pool, DEFAULT_LOOKAHEAD)
    }

    pub fn with_lookahead(pool: PgPool, lookahead: Duration) -> Self {
        Self {
            guard: IdempotencyGuard::new(pool.clone()),
            balances: BalanceStore::new(pool.clone()),
            entitlements: EntitlementStore::new(pool.clone()),
            packages: PackageStore::new(pool.clone()),
            notifier: Notifier::new(pool),
            lookahead,
        }
    }

    /// The idempotency key serializing renewal attempts for one period
    fn period_key(entitlement: &Entitlement) -> String {
        format!(
            "renewal:{}:{}",
            entitlement.id,
            entitlement.ends_at.unix_timestamp()
        )
    }

    /// One sweep tick. Per-entitlement failures are contained: a broken
    /// row is counted and logged, the sweep moves on.
    pub async fn run_sweep(&self) -> LedgerResult<RenewalSweepSummary> {
        let cutoff = OffsetDateTime::now_utc() + self.lookahead;
        let expiring = self.entitlements.list_expiring_before(cutoff).await?;

        let mut summary = RenewalSweepSummary {
            examined: expiring.len(),
            ..Default::default()
        };

        for entitlement in expiring {
            match self.renew_one(&entitlement).await {
                Ok(RenewalOutcome::Renewed) => summary.renewed += 1,
                Ok(RenewalOutcome::Insufficient) => summary.insufficient += 1,
                Ok(RenewalOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        entitlement_id = %entitlement.id,
                        error = %e,
                        "Renewal attempt failed"
                    );
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            renewed = summary.renewed,
            insufficient = summary.insufficient,
            skipped = summary.skipped,
            failed = summary.failed,
            "Renewal sweep finished"
        );

        Ok(summary)
    }

    async fn renew_one(&self, entitlement: &Entitlement) -> LedgerResult<RenewalOutcome> {
        let key = Self::period_key(entitlement);

        match self.guard.claim_once(&key).await? {
            ClaimOutcome::Claimed { .. } => {}
            // Another tick already owns or finished this period.
            ClaimOutcome::Resolved(_) | ClaimOutcome::InFlight => {
                return Ok(RenewalOutcome::Skipped);
            }
        }

        let package_id = match entitlement.renewal_package {
            Some(id) => id,
            None => {
                // Auto-renew without a package is a data bug; record it as
                // terminal for this period so the sweep does not relitigate
                // it every tick.
                self.guard
                    .resolve(&key, &serde_json::json!({ "outcome": "no_package" }))
                    .await?;
                return Err(LedgerError::InvalidState(format!(
                    "entitlement {} has auto_renew but no renewal package",
                    entitlement.id
                )));
            }
        };
        let package = self.packages.get(package_id).await?;

        let debit = self
            .balances
            .apply_delta(
                entitlement.owner_id,
                -package.credit_cost,
                LedgerCategory::Renewal,
                &format!("Renovação: {}", package.name),
                None,
                &key,
            )
            .await;

        match debit {
            Ok(_) => {}
            Err(LedgerError::InsufficientBalance {
                required,
                available,
            }) => {
                // Graceful degradation: the entitlement lapses naturally,
                // the user is told why, and this period never retries.
                self.notifier
                    .renewal_failed(entitlement.owner_id, entitlement.id, required, available)
                    .await;
                self.guard
                    .resolve(
                        &key,
                        &serde_json::json!({
                            "outcome": "insufficient_balance",
                            "required": required,
                            "available": available,
                        }),
                    )
                    .await?;
                tracing::info!(
                    entitlement_id = %entitlement.id,
                    owner_id = %entitlement.owner_id,
                    required = required,
                    available = available,
                    "Renewal skipped for insufficient balance, entitlement will lapse"
                );
                return Ok(RenewalOutcome::Insufficient);
            }
            Err(e) => return Err(e),
        }

        let renewed = self
            .entitlements
            .renew(entitlement.id, package.duration())
            .await?;

        self.notifier
            .renewal_succeeded(entitlement.owner_id, entitlement.id, package.credit_cost)
            .await;

        self.guard
            .resolve(
                &key,
                &serde_json::json!({
                    "outcome": "renewed",
                    "new_end": renewed.ends_at.unix_timestamp(),
                    "cost": package.credit_cost,
                }),
            )
            .await?;

        tracing::info!(
            entitlement_id = %entitlement.id,
            owner_id = %entitlement.owner_id,
            new_end = %renewed.ends_at,
            renewal_count = renewed.renewal_count,
            cost = package.credit_cost,
            "Renewed entitlement"
        );

        Ok(RenewalOutcome::Renewed)
    }

    /// Flip overdue entitlements to expired and notify their owners.
    /// Returns the number of entitlements expired.
    pub async fn run_expiry_sweep(&self) -> LedgerResult<usize> {
        let expired = self.entitlements.expire_due().await?;
        let count = expired.len();

        for entitlement in expired {
            self.notifier
                .entitlement_expired(
                    entitlement.owner_id,
                    entitlement.id,
                    &entitlement.kind.to_string(),
                )
                .await;
        }

        Ok(count)
    }
}

enum RenewalOutcome {
    Renewed,
    Insufficient,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use vitrine_shared::{EntitlementKind, EntitlementStatus};

    fn sample_entitlement(ends_at: OffsetDateTime) -> Entitlement {
        Entitlement {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            kind: EntitlementKind::Boost,
            target: Some(Uuid::new_v4()),
            starts_at: ends_at - Duration::hours(24),
            ends_at,
            status: EntitlementStatus::Active,
            auto_renew: true,
            renewal_package: Some(Uuid::new_v4()),
            renewal_count: 0,
            source_ref: None,
            created_at: ends_at - Duration::hours(24),
            updated_at: ends_at - Duration::hours(24),
        }
    }

    #[test]
    fn test_period_key_is_stable_for_same_period() {
        let entitlement = sample_entitlement(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap());
        assert_eq!(
            RenewalScheduler::period_key(&entitlement),
            RenewalScheduler::period_key(&entitlement)
        );
        assert_eq!(
            RenewalScheduler::period_key(&entitlement),
            format!("renewal:{}:1700000000", entitlement.id)
        );
    }

    #[test]
    fn test_period_key_changes_after_extension() {
        let mut entitlement =
            sample_entitlement(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap());
        let before = RenewalScheduler::period_key(&entitlement);
        entitlement.ends_at += Duration::hours(24);
        assert_ne!(before, RenewalScheduler::period_key(&entitlement));
    }
}

//! Periodic sweep jobs
//!
//! Each job is self-contained and idempotent: a tick that overlaps or
//! repeats work is harmless because every mutation underneath is keyed.
//! Failures are logged and the next tick tries again; the worker never
//! crashes over a failed sweep.

use sqlx::PgPool;
use time::Duration;
use tracing::{error, info};

use vitrine_ledger::{BalanceStore, IdempotencyGuard, IntentRegistry, RenewalScheduler};

/// TTL after which a pending intent can no longer be resolved
const INTENT_TTL: Duration = Duration::hours(24);

/// How long resolved idempotency claims are kept for audit
const CLAIM_RETENTION_DAYS: i32 = 30;

/// Attempt renewal for entitlements expiring within the lookahead window
pub async fn run_renewal_sweep(pool: &PgPool) {
    let scheduler = RenewalScheduler::new(pool.clone());
    match scheduler.run_sweep().await {
        Ok(summary) => {
            if summary.examined > 0 {
                info!(
                    renewed = summary.renewed,
                    insufficient = summary.insufficient,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Renewal sweep completed"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Renewal sweep failed");
        }
    }
}

/// Flip overdue entitlements to expired (the read-side downgrade trigger)
pub async fn run_expiry_sweep(pool: &PgPool) {
    let scheduler = RenewalScheduler::new(pool.clone());
    match scheduler.run_expiry_sweep().await {
        Ok(expired) => {
            if expired > 0 {
                info!(expired = expired, "Expiry sweep completed");
            }
        }
        Err(e) => {
            error!(error = %e, "Expiry sweep failed");
        }
    }
}

/// Expire order intents left pending past the TTL
pub async fn run_intent_ttl_sweep(pool: &PgPool) {
    let intents = IntentRegistry::new(pool.clone());
    if let Err(e) = intents.expire_pending(INTENT_TTL).await {
        error!(error = %e, "Intent TTL sweep failed");
    }
}

/// Drop resolved idempotency claims past the retention window
pub async fn run_claim_maintenance(pool: &PgPool) {
    let guard = IdempotencyGuard::new(pool.clone());
    if let Err(e) = guard.purge_resolved(CLAIM_RETENTION_DAYS).await {
        error!(error = %e, "Claim maintenance failed");
    }
}

/// Validate every cached balance against its ledger sum.
/// Drift means a writer bypassed the ledger; it needs a human.
pub async fn run_reconciliation(pool: &PgPool) {
    let balances = BalanceStore::new(pool.clone());
    match balances.find_drifted().await {
        Ok(drifted) if drifted.is_empty() => {
            info!("Balance reconciliation passed, no drift");
        }
        Ok(drifted) => {
            for report in &drifted {
                error!(
                    owner_id = %report.owner_id,
                    cached_amount = report.cached_amount,
                    ledger_sum = report.ledger_sum,
                    "RECONCILIATION NEEDED: cached balance diverges from ledger sum. \
                     Manual intervention required."
                );
            }
            error!(count = drifted.len(), "Balance reconciliation found drift");
        }
        Err(e) => {
            error!(error = %e, "Balance reconciliation failed");
        }
    }
}

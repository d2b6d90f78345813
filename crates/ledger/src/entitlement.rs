//! Entitlement Store
//!
//! Tracks time-boxed grants: boost placements, premium plans, content
//! subscriptions and PPV unlocks. Grants activate immediately once payment
//! is confirmed; extension always adds to the stored end time (never
//! re-anchors to now) so renewing before expiry keeps the remaining time.
//! The expiry sweep flipping active rows to expired is the trigger for the
//! read side's featured-listing downgrade.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use vitrine_shared::{Entitlement, EntitlementKind, EntitlementStatus};

const ENTITLEMENT_COLUMNS: &str = r#"id, owner_id, kind, target, starts_at, ends_at, status,
       auto_renew, renewal_package, renewal_count, source_ref, created_at, updated_at"#;

/// Parameters for a new grant
#[derive(Debug, Clone)]
pub struct GrantParams {
    pub owner_id: Uuid,
    pub kind: EntitlementKind,
    pub target: Option<Uuid>,
    pub duration: Duration,
    pub auto_renew: bool,
    pub renewal_package: Option<Uuid>,
    /// External payment id or ledger entry that funded this grant
    pub source_ref: Option<String>,
}

#[derive(Clone)]
pub struct EntitlementStore {
    pool: PgPool,
}

impl EntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Grant a new entitlement, active immediately with
    /// `ends_at = now + duration`
    pub async fn grant(&self, params: GrantParams) -> LedgerResult<Entitlement> {
        let entitlement: Entitlement = sqlx::query_as(&format!(
            r#"
            INSERT INTO entitlements
                (owner_id, kind, target, starts_at, ends_at, status,
                 auto_renew, renewal_package, source_ref)
            VALUES ($1, $2, $3, NOW(), NOW() + ($4 || ' seconds')::INTERVAL, 'active',
                    $5, $6, $7)
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(params.owner_id)
        .bind(params.kind)
        .bind(params.target)
        .bind(params.duration.whole_seconds())
        .bind(params.auto_renew)
        .bind(params.renewal_package)
        .bind(&params.source_ref)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            entitlement_id = %entitlement.id,
            owner_id = %entitlement.owner_id,
            kind = %entitlement.kind,
            ends_at = %entitlement.ends_at,
            auto_renew = entitlement.auto_renew,
            "Granted entitlement"
        );

        Ok(entitlement)
    }

    /// Extend an active entitlement by adding to its existing end time.
    /// Never computed from `now`: extending shortly before (or after) the
    /// stored end keeps the full remaining or grace time.
    pub async fn extend(
        &self,
        entitlement_id: Uuid,
        additional: Duration,
    ) -> LedgerResult<Entitlement> {
        let updated: Option<Entitlement> = sqlx::query_as(&format!(
            r#"
            UPDATE entitlements
            SET ends_at = ends_at + ($2 || ' seconds')::INTERVAL, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(entitlement_id)
        .bind(additional.whole_seconds())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(entitlement) => Ok(entitlement),
            None => Err(self.not_extendable(entitlement_id).await?),
        }
    }

    /// Scheduler path: extend and count the renewal in one update
    pub async fn renew(
        &self,
        entitlement_id: Uuid,
        additional: Duration,
    ) -> LedgerResult<Entitlement> {
        let updated: Option<Entitlement> = sqlx::query_as(&format!(
            r#"
            UPDATE entitlements
            SET ends_at = ends_at + ($2 || ' seconds')::INTERVAL,
                renewal_count = renewal_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(entitlement_id)
        .bind(additional.whole_seconds())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(entitlement) => Ok(entitlement),
            None => Err(self.not_extendable(entitlement_id).await?),
        }
    }

    /// Explain why an extend/renew found no row
    async fn not_extendable(&self, entitlement_id: Uuid) -> LedgerResult<LedgerError> {
        let status: Option<(EntitlementStatus,)> =
            sqlx::query_as("SELECT status FROM entitlements WHERE id = $1")
                .bind(entitlement_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status {
            Some((status,)) => LedgerError::InvalidState(format!(
                "entitlement {} is {}, only active entitlements extend",
                entitlement_id, status
            )),
            None => LedgerError::NotFound(format!("entitlement {}", entitlement_id)),
        })
    }

    /// User-initiated cancellation: forward-only, turns auto-renew off.
    /// Never retroactive: a renewal already committed stays committed.
    pub async fn cancel(&self, entitlement_id: Uuid) -> LedgerResult<Entitlement> {
        let updated: Option<Entitlement> = sqlx::query_as(&format!(
            r#"
            UPDATE entitlements
            SET status = 'cancelled', auto_renew = FALSE, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'active')
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(entitlement_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(entitlement) => {
                tracing::info!(entitlement_id = %entitlement.id, "Cancelled entitlement");
                Ok(entitlement)
            }
            None => Err(self.not_extendable(entitlement_id).await?),
        }
    }

    /// Flip the auto-renew flag without touching the entitlement itself
    pub async fn set_auto_renew(
        &self,
        entitlement_id: Uuid,
        enabled: bool,
    ) -> LedgerResult<Entitlement> {
        let updated: Option<Entitlement> = sqlx::query_as(&format!(
            r#"
            UPDATE entitlements
            SET auto_renew = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'active')
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(entitlement_id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(entitlement) => Ok(entitlement),
            None => Err(self.not_extendable(entitlement_id).await?),
        }
    }

    /// Active auto-renew entitlements ending before the given instant
    /// (the renewal sweep's work list)
    pub async fn list_expiring_before(
        &self,
        instant: OffsetDateTime,
    ) -> LedgerResult<Vec<Entitlement>> {
        let entitlements: Vec<Entitlement> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM entitlements
            WHERE status = 'active' AND auto_renew = TRUE AND ends_at <= $1
            ORDER BY ends_at ASC
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(instant)
        .fetch_all(&self.pool)
        .await?;

        Ok(entitlements)
    }

    /// Flip active entitlements past their end to expired and return them.
    /// This transition is the featured-listing downgrade trigger on the
    /// read side.
    pub async fn expire_due(&self) -> LedgerResult<Vec<Entitlement>> {
        let expired: Vec<Entitlement> = sqlx::query_as(&format!(
            r#"
            UPDATE entitlements
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND ends_at <= NOW()
            RETURNING {}
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired entitlements");
        }

        Ok(expired)
    }

    /// Find the entitlement funded by a given payment or ledger reference.
    /// Lets a recovered confirmation re-execute without granting twice.
    pub async fn find_by_source_ref(
        &self,
        source_ref: &str,
    ) -> LedgerResult<Option<Entitlement>> {
        let entitlement: Option<Entitlement> = sqlx::query_as(&format!(
            "SELECT {} FROM entitlements WHERE source_ref = $1 LIMIT 1",
            ENTITLEMENT_COLUMNS
        ))
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entitlement)
    }

    pub async fn get(&self, entitlement_id: Uuid) -> LedgerResult<Entitlement> {
        let entitlement: Option<Entitlement> = sqlx::query_as(&format!(
            "SELECT {} FROM entitlements WHERE id = $1",
            ENTITLEMENT_COLUMNS
        ))
        .bind(entitlement_id)
        .fetch_optional(&self.pool)
        .await?;

        entitlement.ok_or_else(|| LedgerError::NotFound(format!("entitlement {}", entitlement_id)))
    }

    pub async fn list_for_owner(&self, owner_id: Uuid) -> LedgerResult<Vec<Entitlement>> {
        let entitlements: Vec<Entitlement> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM entitlements
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
            ENTITLEMENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entitlements)
    }

    /// Does the owner hold a live grant of this kind for this target?
    pub async fn has_active(
        &self,
        owner_id: Uuid,
        kind: EntitlementKind,
        target: Option<Uuid>,
    ) -> LedgerResult<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM entitlements
                WHERE owner_id = $1 AND kind = $2
                  AND ($3::uuid IS NULL OR target = $3)
                  AND status = 'active' AND ends_at > NOW()
            )
            "#,
        )
        .bind(owner_id)
        .bind(kind)
        .bind(target)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Read-side listing query: is this profile currently boosted?
    pub async fn is_featured(&self, profile_id: Uuid) -> LedgerResult<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM entitlements
                WHERE target = $1 AND kind = 'boost'
                  AND status = 'active' AND ends_at > NOW()
            )
            "#,
        )
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }
}

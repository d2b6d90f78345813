//! Commission Calculator
//!
//! On a completed monetized transaction, looks up an optional referral
//! relationship and credits a commission to the affiliate's balance. The
//! applied rate is base-by-kind plus a tier bonus from the affiliate's
//! cumulative referred revenue, snapshotted into the commission row and
//! never recomputed. Idempotency is keyed by the originating transaction
//! id, so a replayed confirmation never double-pays.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::balance::BalanceStore;
use crate::error::LedgerResult;
use crate::notify::Notifier;
use vitrine_shared::{AffiliateReferral, Commission, LedgerCategory, PurchaseKind};

/// Centavos per credit for commission payouts (1 credit = R$1)
const CENTS_PER_CREDIT: i64 = 100;

/// Base commission rate (percent) by transaction kind
pub fn base_rate_pct(kind: PurchaseKind) -> i32 {
    match kind {
        PurchaseKind::CreditPack => 10,
        PurchaseKind::Boost => 15,
        PurchaseKind::PremiumPlan => 20,
        PurchaseKind::ContentSubscription => 15,
        PurchaseKind::PpvUnlock => 20,
    }
}

/// Affiliate tier, derived from cumulative referred revenue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateTier {
    Standard,
    Silver,
    Gold,
}

impl AffiliateTier {
    /// Tier thresholds on cumulative referred revenue:
    /// silver from R$1.000, gold from R$5.000
    pub fn for_revenue_cents(total_revenue_cents: i64) -> Self {
        if total_revenue_cents >= 500_000 {
            Self::Gold
        } else if total_revenue_cents >= 100_000 {
            Self::Silver
        } else {
            Self::Standard
        }
    }

    /// Bonus percentage points added to the base rate
    pub fn bonus_pct(&self) -> i32 {
        match self {
            Self::Standard => 0,
            Self::Silver => 2,
            Self::Gold => 5,
        }
    }
}

/// Commission amount in centavos for a transaction at the given rate
pub fn commission_cents(amount_cents: i64, rate_pct: i32) -> i64 {
    amount_cents * rate_pct as i64 / 100
}

#[derive(Clone)]
pub struct CommissionService {
    pool: PgPool,
    balances: BalanceStore,
    notifier: Notifier,
}

impl CommissionService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            balances: BalanceStore::new(pool.clone()),
            notifier: Notifier::new(pool.clone()),
            pool,
        }
    }

    /// Record a referral relationship. First attribution wins; a repeat
    /// attribution for the same referred user is a no-op returning false.
    pub async fn attribute(&self, affiliate_id: Uuid, referred_user_id: Uuid) -> LedgerResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO affiliate_referrals (affiliate_id, referred_user_id)
            VALUES ($1, $2)
            ON CONFLICT (referred_user_id) DO NOTHING
            "#,
        )
        .bind(affiliate_id)
        .bind(referred_user_id)
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() > 0;
        if created {
            tracing::info!(
                affiliate_id = %affiliate_id,
                referred_user_id = %referred_user_id,
                "Attributed referral"
            );
        }

        Ok(created)
    }

    /// Apply a commission for a completed transaction.
    ///
    /// Returns `None` (not an error) when the owner has no referrer. The
    /// commission row's unique source_ref plus the ledger idempotency key
    /// make replays harmless: the second application returns the stored
    /// row and credits nothing.
    pub async fn apply(
        &self,
        owner_id: Uuid,
        kind: PurchaseKind,
        amount_cents: i64,
        source_ref: &str,
    ) -> LedgerResult<Option<Commission>> {
        let referral: Option<AffiliateReferral> = sqlx::query_as(
            r#"
            SELECT id, affiliate_id, referred_user_id, transaction_count,
                   total_revenue_cents, total_commission_cents, created_at, updated_at
            FROM affiliate_referrals
            WHERE referred_user_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(referral) = referral else {
            return Ok(None);
        };

        // Tier from the affiliate's cumulative revenue across all referrals,
        // evaluated once and snapshotted into the row.
        let affiliate_revenue: (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_revenue_cents), 0) FROM affiliate_referrals WHERE affiliate_id = $1",
        )
        .bind(referral.affiliate_id)
        .fetch_one(&self.pool)
        .await?;

        let tier = AffiliateTier::for_revenue_cents(affiliate_revenue.0);
        let rate_pct = base_rate_pct(kind) + tier.bonus_pct();
        let payout_cents = commission_cents(amount_cents, rate_pct);

        let inserted: Option<Commission> = sqlx::query_as(
            r#"
            INSERT INTO commissions
                (affiliate_id, referral_id, transaction_kind, amount_cents,
                 rate_pct, commission_cents, source_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_ref) DO NOTHING
            RETURNING id, affiliate_id, referral_id, transaction_kind, amount_cents,
                      rate_pct, commission_cents, status, source_ref, created_at
            "#,
        )
        .bind(referral.affiliate_id)
        .bind(referral.id)
        .bind(kind)
        .bind(amount_cents)
        .bind(rate_pct)
        .bind(payout_cents)
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await?;

        let commission = match inserted {
            Some(c) => c,
            None => {
                // Replayed transaction: hand back the stored row unchanged.
                let existing: Option<Commission> = sqlx::query_as(
                    r#"
                    SELECT id, affiliate_id, referral_id, transaction_kind, amount_cents,
                           rate_pct, commission_cents, status, source_ref, created_at
                    FROM commissions
                    WHERE source_ref = $1
                    "#,
                )
                .bind(source_ref)
                .fetch_optional(&self.pool)
                .await?;
                tracing::info!(
                    source_ref = %source_ref,
                    "Commission already recorded for transaction"
                );
                return Ok(existing);
            }
        };

        // Credit the affiliate. The ledger key mirrors source_ref, so even
        // a crash between the insert above and this credit replays safely.
        let credits = payout_cents / CENTS_PER_CREDIT;
        self.balances
            .apply_delta(
                referral.affiliate_id,
                credits,
                LedgerCategory::Commission,
                &format!("Comissão de indicação ({} @ {}%)", kind, rate_pct),
                Some(source_ref),
                &format!("commission:{}", source_ref),
            )
            .await?;

        sqlx::query("UPDATE commissions SET status = 'paid' WHERE id = $1")
            .bind(commission.id)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            UPDATE affiliate_referrals
            SET transaction_count = transaction_count + 1,
                total_revenue_cents = total_revenue_cents + $2,
                total_commission_cents = total_commission_cents + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(referral.id)
        .bind(amount_cents)
        .bind(payout_cents)
        .execute(&self.pool)
        .await?;

        self.notifier
            .commission_earned(referral.affiliate_id, payout_cents)
            .await;

        tracing::info!(
            affiliate_id = %referral.affiliate_id,
            source_ref = %source_ref,
            rate_pct = rate_pct,
            commission_cents = payout_cents,
            "Paid commission"
        );

        Ok(Some(commission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_rates() {
        assert_eq!(base_rate_pct(PurchaseKind::CreditPack), 10);
        assert_eq!(base_rate_pct(PurchaseKind::Boost), 15);
        assert_eq!(base_rate_pct(PurchaseKind::PremiumPlan), 20);
        assert_eq!(base_rate_pct(PurchaseKind::ContentSubscription), 15);
        assert_eq!(base_rate_pct(PurchaseKind::PpvUnlock), 20);
    }

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(AffiliateTier::for_revenue_cents(0), AffiliateTier::Standard);
        assert_eq!(
            AffiliateTier::for_revenue_cents(99_999),
            AffiliateTier::Standard
        );
        assert_eq!(
            AffiliateTier::for_revenue_cents(100_000),
            AffiliateTier::Silver
        );
        assert_eq!(
            AffiliateTier::for_revenue_cents(499_999),
            AffiliateTier::Silver
        );
        assert_eq!(AffiliateTier::for_revenue_cents(500_000), AffiliateTier::Gold);
    }

    #[test]
    fn test_tier_bonuses() {
        assert_eq!(AffiliateTier::Standard.bonus_pct(), 0);
        assert_eq!(AffiliateTier::Silver.bonus_pct(), 2);
        assert_eq!(AffiliateTier::Gold.bonus_pct(), 5);
    }

    #[test]
    fn test_commission_for_boost_at_gold_tier() {
        // R$100 boost purchase, base 15% + gold bonus 5% = R$20
        let rate = base_rate_pct(PurchaseKind::Boost) + AffiliateTier::Gold.bonus_pct();
        assert_eq!(rate, 20);
        assert_eq!(commission_cents(10_000, rate), 2_000);
        // Paid out as 20 credits
        assert_eq!(commission_cents(10_000, rate) / CENTS_PER_CREDIT, 20);
    }

    #[test]
    fn test_commission_rounds_down() {
        // R$0,99 at 15% is 14.85 centavos, truncated to 14
        assert_eq!(commission_cents(99, 15), 14);
    }
}

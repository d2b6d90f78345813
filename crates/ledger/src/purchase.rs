//! Credit-funded purchases
//!
//! Buying a boost, plan, subscription or PPV unlock directly with credits,
//! without a gateway round trip: debit, grant, commission, notify. Unlike
//! a renewal, a manual purchase blocks loudly on insufficient balance.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::balance::BalanceStore;
use crate::commission::CommissionService;
use crate::entitlement::{EntitlementStore, GrantParams};
use crate::error::{LedgerError, LedgerResult};
use crate::notify::Notifier;
use crate::packages::PackageStore;
use vitrine_shared::{Entitlement, LedgerCategory};

/// Result of a credit-funded purchase
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub entitlement: Entitlement,
    pub cost: i64,
    pub balance: i64,
}

pub struct PurchaseService {
    balances: BalanceStore,
    entitlements: EntitlementStore,
    packages: PackageStore,
    commissions: CommissionService,
    notifier: Notifier,
}

impl PurchaseService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            balances: BalanceStore::new(pool.clone()),
            entitlements: EntitlementStore::new(pool.clone()),
            packages: PackageStore::new(pool.clone()),
            commissions: CommissionService::new(pool.clone()),
            notifier: Notifier::new(pool),
        }
    }

    /// Purchase an entitlement with credits.
    ///
    /// The caller supplies a request id; retries with the same id debit and
    /// grant once. `InsufficientBalance` surfaces to the caller with an
    /// explicit message: a blocked purchase, not a silent lapse.
    pub async fn purchase_with_credits(
        &self,
        owner_id: Uuid,
        package_id: Uuid,
        target: Option<Uuid>,
        request_id: Uuid,
    ) -> LedgerResult<PurchaseReceipt> {
        let package = self.packages.get_active(package_id).await?;

        let kind = package.kind.entitlement_kind().ok_or_else(|| {
            LedgerError::InvalidState(format!(
                "package {} delivers credits and cannot be bought with credits",
                package_id
            ))
        })?;
        if package.credit_cost <= 0 {
            return Err(LedgerError::InvalidState(format!(
                "package {} is not credit-purchasable",
                package_id
            )));
        }

        let spend_ref = format!("spend:{}", request_id.simple());

        // Retried request: reuse the grant made by the first attempt.
        if let Some(existing) = self.entitlements.find_by_source_ref(&spend_ref).await? {
            let balance = self.balances.get_balance(owner_id).await?;
            return Ok(PurchaseReceipt {
                entitlement: existing,
                cost: package.credit_cost,
                balance,
            });
        }

        let debit = self
            .balances
            .apply_delta(
                owner_id,
                -package.credit_cost,
                LedgerCategory::Spend,
                &format!("Compra: {}", package.name),
                None,
                &spend_ref,
            )
            .await?;

        let entitlement = self
            .entitlements
            .grant(GrantParams {
                owner_id,
                kind,
                target,
                duration: package.duration(),
                auto_renew: false,
                renewal_package: Some(package.id),
                source_ref: Some(spend_ref.clone()),
            })
            .await?;

        self.commissions
            .apply(owner_id, package.kind, package.price_cents, &spend_ref)
            .await?;

        self.notifier
            .entitlement_activated(owner_id, entitlement.id, &kind.to_string())
            .await;

        tracing::info!(
            owner_id = %owner_id,
            entitlement_id = %entitlement.id,
            package_id = %package_id,
            cost = package.credit_cost,
            balance = debit.balance,
            "Purchased entitlement with credits"
        );

        Ok(PurchaseReceipt {
            entitlement,
            cost: package.credit_cost,
            balance: debit.balance,
        })
    }
}

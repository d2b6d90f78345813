//! Purchasable package catalog
//!
//! Read-side lookups over the seeded catalog: credit packs, boost
//! placements, premium plans, content subscriptions and PPV unlocks. The
//! renewal sweep resolves renewal costs and durations here.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use vitrine_shared::{CreditPackage, PurchaseKind};

const PACKAGE_COLUMNS: &str =
    "id, kind, name, price_cents, credit_cost, credit_amount, duration_hours, active, created_at";

#[derive(Clone)]
pub struct PackageStore {
    pool: PgPool,
}

impl PackageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, package_id: Uuid) -> LedgerResult<CreditPackage> {
        let package: Option<CreditPackage> = sqlx::query_as(&format!(
            "SELECT {} FROM credit_packages WHERE id = $1",
            PACKAGE_COLUMNS
        ))
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;

        package.ok_or_else(|| LedgerError::NotFound(format!("package {}", package_id)))
    }

    /// An inactive package cannot be newly purchased, but existing
    /// entitlements may still renew against it.
    pub async fn get_active(&self, package_id: Uuid) -> LedgerResult<CreditPackage> {
        let package = self.get(package_id).await?;
        if !package.active {
            return Err(LedgerError::InvalidState(format!(
                "package {} is no longer sold",
                package_id
            )));
        }
        Ok(package)
    }

    pub async fn list_active(&self, kind: PurchaseKind) -> LedgerResult<Vec<CreditPackage>> {
        let packages: Vec<CreditPackage> = sqlx::query_as(&format!(
            "SELECT {} FROM credit_packages WHERE kind = $1 AND active ORDER BY price_cents ASC",
            PACKAGE_COLUMNS
        ))
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(packages)
    }
}

//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use vitrine_ledger::{
    BalanceStore, CommissionService, ConfirmationProcessor, EntitlementStore, GatewayClient,
    IntentRegistry, PackageStore, PurchaseService,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub processor: Arc<ConfirmationProcessor>,
    pub purchases: Arc<PurchaseService>,
    pub balances: BalanceStore,
    pub intents: IntentRegistry,
    pub entitlements: EntitlementStore,
    pub packages: PackageStore,
    pub commissions: CommissionService,
}

impl AppState {
    pub fn new(pool: PgPool, gateway: GatewayClient) -> Self {
        Self {
            processor: Arc::new(ConfirmationProcessor::new(pool.clone(), gateway)),
            purchases: Arc::new(PurchaseService::new(pool.clone())),
            balances: BalanceStore::new(pool.clone()),
            intents: IntentRegistry::new(pool.clone()),
            entitlements: EntitlementStore::new(pool.clone()),
            packages: PackageStore::new(pool.clone()),
            commissions: CommissionService::new(pool.clone()),
            pool,
        }
    }
}

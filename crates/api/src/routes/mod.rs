//! API route modules

pub mod affiliates;
pub mod balances;
pub mod callbacks;
pub mod entitlements;
pub mod health;
pub mod intents;
pub mod packages;

use axum::Router;

use crate::state::AppState;

/// Compose all route modules into one router
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(callbacks::router())
        .merge(intents::router())
        .merge(balances::router())
        .merge(entitlements::router())
        .merge(packages::router())
        .merge(affiliates::router())
}

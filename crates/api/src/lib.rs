//! Vitrine API
//!
//! Thin HTTP boundary over the monetization engine: the payment-gateway
//! callback endpoint, order-intent creation, credit purchases, and the
//! read-side balance/entitlement queries consumed by the listing service.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

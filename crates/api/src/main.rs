//! Vitrine API server

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vitrine_api::{build_router, AppState, Config};
use vitrine_ledger::GatewayClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = vitrine_shared::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;

    vitrine_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let gateway = GatewayClient::from_env().context("failed to configure payment gateway")?;

    let app = build_router(AppState::new(pool, gateway));

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;

    tracing::info!(address = %config.bind_address, "Vitrine API listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;

    Ok(())
}

//! Vitrine worker
//!
//! Long-running sweep process: renewal and expiry sweeps, intent TTL
//! enforcement, idempotency-claim maintenance, and the daily balance
//! reconciliation pass.

mod sweeps;

use anyhow::Context;
use sqlx::PgPool;
use std::future::Future;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = vitrine_shared::create_pool(&database_url)
        .await
        .context("failed to connect to database")?;

    vitrine_shared::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let scheduler = JobScheduler::new()
        .await
        .context("failed to create job scheduler")?;

    // Renewals hourly; the 24h lookahead makes a missed tick harmless
    add_job(&scheduler, &pool, "0 7 * * * *", |pool| async move {
        sweeps::run_renewal_sweep(&pool).await;
    })
    .await?;

    // Expiry every 5 minutes keeps the featured read side fresh
    add_job(&scheduler, &pool, "0 */5 * * * *", |pool| async move {
        sweeps::run_expiry_sweep(&pool).await;
    })
    .await?;

    // Intent TTL hourly
    add_job(&scheduler, &pool, "0 23 * * * *", |pool| async move {
        sweeps::run_intent_ttl_sweep(&pool).await;
    })
    .await?;

    // Claim maintenance daily
    add_job(&scheduler, &pool, "0 41 3 * * *", |pool| async move {
        sweeps::run_claim_maintenance(&pool).await;
    })
    .await?;

    // Balance reconciliation daily
    add_job(&scheduler, &pool, "0 11 4 * * *", |pool| async move {
        sweeps::run_reconciliation(&pool).await;
    })
    .await?;

    scheduler.start().await.context("failed to start scheduler")?;

    tracing::info!("Vitrine worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Vitrine worker shutting down");

    Ok(())
}

/// Register an async job running against a pool clone on a cron schedule
async fn add_job<F, Fut>(
    scheduler: &JobScheduler,
    pool: &PgPool,
    schedule: &str,
    run: F,
) -> anyhow::Result<()>
where
    F: Fn(PgPool) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let pool = pool.clone();
    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let pool = pool.clone();
        let run = run.clone();
        Box::pin(async move {
            run(pool).await;
        })
    })
    .with_context(|| format!("invalid cron schedule: {}", schedule))?;

    scheduler.add(job).await.context("failed to add job")?;

    Ok(())
}

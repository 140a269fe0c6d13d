//! OpsDash billing worker
//!
//! Runs the daily billing sweep on a cron schedule. The API server owns
//! migrations; this binary only needs a pool and the billing services.

use chrono::Utc;
use opsdash_billing::{BillingService, SweepOutcome};
use opsdash_shared::create_pool;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

/// 06:00 UTC daily, after most gateways have settled overnight activity
const SWEEP_SCHEDULE: &str = "0 0 6 * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdash_worker=info,opsdash_billing=info".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;

    // The worker often starts alongside the database in deploys; retry
    // with backoff instead of crash-looping
    let pool = connect_with_retry(&database_url).await?;
    tracing::info!("Worker connected to database");

    let billing = BillingService::from_env(pool)?;

    let scheduler = JobScheduler::new().await?;
    let sweep_billing = billing.clone();
    let sweep_job = Job::new_async(SWEEP_SCHEDULE, move |_id, _lock| {
        let billing = sweep_billing.clone();
        Box::pin(async move {
            run_sweep(&billing).await;
        })
    })?;
    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!(schedule = SWEEP_SCHEDULE, "Billing sweep scheduled");

    // Park the main task; the scheduler runs on its own tasks
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    }
}

async fn connect_with_retry(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let strategy = ExponentialBackoff::from_millis(500)
        .factor(2)
        .map(jitter)
        .take(6);

    Retry::spawn(strategy, || async {
        match create_pool(database_url).await {
            Ok(pool) => Ok(pool),
            Err(e) => {
                tracing::warn!(error = %e, "Database not ready, retrying");
                Err(e)
            }
        }
    })
    .await
}

async fn run_sweep(billing: &BillingService) {
    let today = Utc::now().date_naive();

    match billing.sweep.run_sweep(today).await {
        Ok(report) => {
            tracing::info!(
                sweep_date = %report.sweep_date,
                candidates = report.candidates,
                invoiced = report.invoiced,
                skipped = report.skipped,
                failed = report.failed,
                "Scheduled sweep completed"
            );
            for outcome in &report.outcomes {
                if let SweepOutcome::Failed { project_id, error } = outcome {
                    tracing::error!(
                        project_id = %project_id,
                        error = %error,
                        "Sweep failure for project"
                    );
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduled sweep failed to run");
        }
    }
}

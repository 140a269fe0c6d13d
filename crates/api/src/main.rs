//! OpsDash billing API server

use opsdash_api::{config::Config, routes::create_router, state::AppState};
use opsdash_billing::{BillingService, StripeClient, StripeConfig};
use opsdash_shared::{create_migration_pool, create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opsdash_api=info,opsdash_billing=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Migrations run on a dedicated single-connection pool
    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;
    tracing::info!("Database migrations applied");

    let pool = create_pool(&config.database_url).await?;

    let stripe = StripeClient::new(StripeConfig {
        secret_key: config.stripe_secret_key.clone(),
        webhook_secret: config.stripe_webhook_secret.clone(),
        app_base_url: config.app_base_url.clone(),
    });
    let billing = BillingService::new(stripe, pool.clone());

    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config, billing);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

//! Shared application state

use opsdash_billing::BillingService;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub billing: BillingService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: BillingService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            billing,
        }
    }
}

//! OpsDash Billing API
//!
//! HTTP surface over the billing engine: billing periods, usage import,
//! invoice composition and lifecycle, subscription settings, the sweep
//! trigger, and the payment-gateway webhook endpoint.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

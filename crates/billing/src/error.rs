//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// Validation/NotFound/Conflict are caller errors (4xx, never retried);
/// Gateway wraps payment-gateway failures and triggers compensating
/// rollback of any partially created gateway-side draft invoice;
/// Database is a persistence failure, possibly after a gateway side-effect
/// succeeded, and is logged with enough context to reconcile manually.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

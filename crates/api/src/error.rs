//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use opsdash_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string())
            }

            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            ApiError::Gateway(msg) => {
                (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR", msg.clone())
            }

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": redact_secrets(&message),
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::Gateway(msg) => {
                tracing::error!(error = %msg, "Payment gateway error");
                ApiError::Gateway(msg)
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Billing database error");
                ApiError::Database(msg)
            }
            BillingError::WebhookSignatureInvalid | BillingError::Unauthorized(_) => {
                ApiError::Unauthorized
            }
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing error");
                ApiError::Internal
            }
        }
    }
}

/// Strip secret-looking tokens from a message before it reaches a response
/// body. Gateway error strings sometimes echo the API key back.
pub fn redact_secrets(message: &str) -> String {
    const PREFIXES: [&str; 3] = ["sk_", "whsec_", "rk_"];

    message
        .split_whitespace()
        .map(|word| {
            let trimmed = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
            if PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
                word.replace(trimmed, "[REDACTED]")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_secret_key() {
        let msg = "request failed for key sk_live_abc123 (invoice in_1)";
        let redacted = redact_secrets(msg);
        assert!(!redacted.contains("sk_live_abc123"));
        assert!(redacted.contains("[REDACTED]"));
        assert!(redacted.contains("in_1"));
    }

    #[test]
    fn test_redact_webhook_secret_in_punctuation() {
        let redacted = redact_secrets("bad secret: \"whsec_deadbeef\".");
        assert!(!redacted.contains("whsec_deadbeef"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn test_redact_leaves_plain_messages_alone() {
        let msg = "Pending item 5a0c already billed or missing";
        assert_eq!(redact_secrets(msg), msg);
    }

    #[test]
    fn test_billing_error_mapping() {
        let api: ApiError = BillingError::Validation("bad".into()).into();
        assert!(matches!(api, ApiError::Validation(_)));

        let api: ApiError = BillingError::NotFound("x".into()).into();
        assert!(matches!(api, ApiError::NotFound));

        let api: ApiError = BillingError::Conflict("x".into()).into();
        assert!(matches!(api, ApiError::Conflict(_)));

        let api: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert!(matches!(api, ApiError::Unauthorized));

        let api: ApiError = BillingError::Gateway("boom".into()).into();
        assert!(matches!(api, ApiError::Gateway(_)));
    }
}

//! Payment-gateway webhook route
//!
//! The raw body is needed for signature verification, so this handler takes
//! the payload as a String rather than a typed extractor. Only a bad
//! signature rejects; handler failures are acknowledged with 200 so the
//! gateway stops retrying events that can never succeed.

use axum::{extract::State, http::HeaderMap, Json};
use opsdash_billing::WebhookOutcome;

use crate::error::{redact_secrets, ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/webhooks/billing
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let outcome = state.billing.webhooks.process(&payload, signature).await?;

    Ok(Json(outcome_body(outcome)))
}

fn outcome_body(outcome: WebhookOutcome) -> serde_json::Value {
    match outcome {
        WebhookOutcome::Processed { event_type } => {
            serde_json::json!({ "received": true, "event_type": event_type })
        }
        WebhookOutcome::Ignored { event_type } => {
            serde_json::json!({ "received": true, "event_type": event_type, "ignored": true })
        }
        WebhookOutcome::Failed { event_type, error } => {
            // Gateway error strings can echo credentials; scrub like ApiError does
            serde_json::json!({
                "received": true,
                "event_type": event_type,
                "error": redact_secrets(&error),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_body_redacts_secrets() {
        let body = outcome_body(WebhookOutcome::Failed {
            event_type: "invoice.paid".to_string(),
            error: "charge lookup failed with key sk_live_abc123".to_string(),
        });
        let error = body["error"].as_str().unwrap();
        assert!(!error.contains("sk_live_abc123"));
        assert!(error.contains("[REDACTED]"));
        assert_eq!(body["received"], true);
    }

    #[test]
    fn test_processed_outcome_body() {
        let body = outcome_body(WebhookOutcome::Processed {
            event_type: "invoice.finalized".to_string(),
        });
        assert_eq!(body["event_type"], "invoice.finalized");
        assert!(body.get("error").is_none());
    }
}

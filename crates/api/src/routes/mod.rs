//! API routes

pub mod billing_periods;
pub mod health;
pub mod invoices;
pub mod subscription;
pub mod sweep;
pub mod webhooks;

use axum::{
    http::HeaderMap,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Resolve the calling operator from the x-user-id header. Auth proper
/// (sessions, tokens) lives in the dashboard gateway in front of this
/// service; here the id is trusted input that scopes every query.
pub fn caller_id(headers: &HeaderMap) -> ApiResult<Uuid> {
    headers
        .get("x-user-id")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or(ApiError::Unauthorized)
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/billing-periods",
            post(billing_periods::create).get(billing_periods::list),
        )
        .route("/billing-periods/:id", get(billing_periods::get))
        .route(
            "/billing-periods/:id/usage-import",
            post(billing_periods::import_usage),
        )
        .route("/invoices", get(invoices::list))
        .route("/invoices/compose", post(invoices::compose))
        .route("/invoices/:id", get(invoices::get))
        .route("/invoices/:id/finalize", post(invoices::finalize))
        .route("/invoices/:id/mark-paid", post(invoices::mark_paid))
        .route(
            "/projects/:id/subscription-settings",
            put(subscription::update_settings),
        )
        .route("/billing/sweep", post(sweep::trigger))
        .route("/webhooks/billing", post(webhooks::handle));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_id_parses_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(caller_id(&headers).unwrap(), id);
    }

    #[test]
    fn test_caller_id_rejects_missing_or_malformed() {
        let headers = HeaderMap::new();
        assert!(matches!(caller_id(&headers), Err(ApiError::Unauthorized)));

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(caller_id(&headers), Err(ApiError::Unauthorized)));
    }
}

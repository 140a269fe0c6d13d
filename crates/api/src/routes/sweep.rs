//! Sweep trigger route
//!
//! The worker's cron job calls SweepService directly; this endpoint exists
//! for manual runs and external schedulers. It is guarded by a shared
//! secret rather than operator identity because the sweep spans tenants.

use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use opsdash_billing::SweepReport;
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/billing/sweep
pub async fn trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SweepReport>> {
    let presented = headers
        .get("x-sweep-secret")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let expected = state.config.sweep_shared_secret.as_bytes();
    if presented.as_bytes().ct_eq(expected).unwrap_u8() != 1 {
        return Err(ApiError::Unauthorized);
    }

    let today = Utc::now().date_naive();
    let report = state.billing.sweep.run_sweep(today).await?;
    Ok(Json(report))
}

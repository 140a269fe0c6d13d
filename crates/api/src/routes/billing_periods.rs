//! Billing period routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use opsdash_billing::{CreateBillingPeriod, PendingInvoiceItem, UsageImportRow};
use opsdash_shared::BillingPeriod;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::caller_id;
use crate::state::AppState;

/// POST /api/billing-periods
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateBillingPeriod>,
) -> ApiResult<(StatusCode, Json<BillingPeriod>)> {
    let caller = caller_id(&headers)?;
    let period = state.billing.periods.create(caller, input).await?;
    Ok((StatusCode::CREATED, Json(period)))
}

#[derive(Deserialize)]
pub struct ListPeriodsQuery {
    pub project_id: Option<Uuid>,
}

/// GET /api/billing-periods
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListPeriodsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = caller_id(&headers)?;
    let periods = state.billing.periods.list(caller, query.project_id).await?;
    Ok(Json(serde_json::json!({ "billing_periods": periods })))
}

/// GET /api/billing-periods/:id
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(period_id): Path<Uuid>,
) -> ApiResult<Json<BillingPeriod>> {
    let caller = caller_id(&headers)?;
    let period = state.billing.periods.get(caller, period_id).await?;
    Ok(Json(period))
}

#[derive(Deserialize)]
pub struct UsageImportRequest {
    pub rows: Vec<UsageImportRow>,
}

/// POST /api/billing-periods/:id/usage-import
///
/// Accepts normalized usage rows (parsing of provider CSVs happens in the
/// dashboard frontend) and enqueues one aggregate pending item.
pub async fn import_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(period_id): Path<Uuid>,
    Json(request): Json<UsageImportRequest>,
) -> ApiResult<(StatusCode, Json<PendingInvoiceItem>)> {
    let caller = caller_id(&headers)?;
    let item = state
        .billing
        .ledger
        .import_usage(caller, period_id, request.rows)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

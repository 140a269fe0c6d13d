//! Invoice routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use opsdash_billing::{ComposeInvoiceInput, Invoice, InvoiceWithLines};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::caller_id;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListInvoicesQuery {
    pub project_id: Option<Uuid>,
}

/// GET /api/invoices
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListInvoicesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let caller = caller_id(&headers)?;
    let invoices: Vec<Invoice> = state.billing.invoices.list(caller, query.project_id).await?;
    Ok(Json(serde_json::json!({ "invoices": invoices })))
}

/// GET /api/invoices/:id
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceWithLines>> {
    let caller = caller_id(&headers)?;
    let invoice = state.billing.invoices.get_with_lines(caller, invoice_id).await?;
    Ok(Json(invoice))
}

/// POST /api/invoices/compose
///
/// The heart of the API: turns a billing period plus pending items into a
/// gateway draft invoice and its local mirror.
pub async fn compose(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ComposeInvoiceInput>,
) -> ApiResult<(StatusCode, Json<InvoiceWithLines>)> {
    let caller = caller_id(&headers)?;
    let invoice = state.billing.composer.compose_draft_invoice(caller, input).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// POST /api/invoices/:id/finalize
pub async fn finalize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceWithLines>> {
    let caller = caller_id(&headers)?;
    let invoice = state.billing.composer.finalize_invoice(caller, invoice_id).await?;
    Ok(Json(invoice))
}

/// POST /api/invoices/:id/mark-paid
///
/// Records payment collected outside the gateway (check, wire, cash).
pub async fn mark_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceWithLines>> {
    let caller = caller_id(&headers)?;
    let invoice = state.billing.composer.mark_paid_offline(caller, invoice_id).await?;
    Ok(Json(invoice))
}

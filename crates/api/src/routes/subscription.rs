//! Per-project subscription-settings routes

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use opsdash_billing::SubscriptionSettingsUpdate;
use opsdash_shared::Project;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::routes::caller_id;
use crate::state::AppState;

/// PUT /api/projects/:id/subscription-settings
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project_id): Path<Uuid>,
    Json(update): Json<SubscriptionSettingsUpdate>,
) -> ApiResult<Json<Project>> {
    let caller = caller_id(&headers)?;
    let project = state
        .billing
        .profile
        .update_subscription_settings(caller, project_id, update)
        .await?;
    Ok(Json(project))
}

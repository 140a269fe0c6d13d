//! Per-project billing profile updates
//!
//! The billing profile drives the calculator (payment method, discount),
//! the sweep (anchor day, auto-finalize), and the composer's default
//! collection method. Partial updates: absent fields leave the stored
//! value alone.

use opsdash_shared::{CollectionMethod, PaymentMethodType, Project};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Partial update to a project's billing profile
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionSettingsUpdate {
    pub payment_method_type: Option<PaymentMethodType>,
    pub auto_pay_enabled: Option<bool>,
    pub base_retainer_cents: Option<i64>,
    pub ach_discount_cents: Option<i64>,
    /// Day-of-month the sweep bills this project; clamped to 1..=28 so the
    /// anchor exists in every month. Some(None) is not expressible here;
    /// send 0 to clear the anchor.
    pub billing_anchor_day: Option<i32>,
    pub billing_auto_finalize: Option<bool>,
    pub billing_default_collection_method: Option<CollectionMethod>,
}

/// Billing profile service
#[derive(Clone)]
pub struct ProfileService {
    pool: PgPool,
}

impl ProfileService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a partial billing-profile update to a project the caller owns
    pub async fn update_subscription_settings(
        &self,
        created_by: Uuid,
        project_id: Uuid,
        update: SubscriptionSettingsUpdate,
    ) -> BillingResult<Project> {
        if let Some(retainer) = update.base_retainer_cents {
            if retainer < 0 {
                return Err(BillingError::Validation(
                    "base_retainer_cents must be >= 0".to_string(),
                ));
            }
        }
        if let Some(discount) = update.ach_discount_cents {
            if discount < 0 {
                return Err(BillingError::Validation(
                    "ach_discount_cents must be >= 0".to_string(),
                ));
            }
        }
        let anchor_day = match update.billing_anchor_day {
            Some(0) => Some(None), // explicit clear
            Some(day) if (1..=28).contains(&day) => Some(Some(day)),
            Some(day) => {
                return Err(BillingError::Validation(format!(
                    "billing_anchor_day must be between 1 and 28, got {}",
                    day
                )));
            }
            None => None,
        };

        let project: Option<Project> = sqlx::query_as(
            r#"
            UPDATE projects SET
                payment_method_type = COALESCE($3, payment_method_type),
                auto_pay_enabled = COALESCE($4, auto_pay_enabled),
                base_retainer_cents = COALESCE($5, base_retainer_cents),
                ach_discount_cents = COALESCE($6, ach_discount_cents),
                billing_anchor_day = CASE WHEN $7 THEN $8 ELSE billing_anchor_day END,
                billing_auto_finalize = COALESCE($9, billing_auto_finalize),
                billing_default_collection_method = COALESCE($10, billing_default_collection_method)
            WHERE id = $1 AND created_by = $2
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(created_by)
        .bind(update.payment_method_type)
        .bind(update.auto_pay_enabled)
        .bind(update.base_retainer_cents)
        .bind(update.ach_discount_cents)
        .bind(anchor_day.is_some())
        .bind(anchor_day.flatten())
        .bind(update.billing_auto_finalize)
        .bind(update.billing_default_collection_method)
        .fetch_optional(&self.pool)
        .await?;

        let project = project.ok_or_else(|| {
            BillingError::NotFound(format!("Project not found: {}", project_id))
        })?;

        tracing::info!(
            project_id = %project.id,
            payment_method = %project.payment_method_type,
            auto_pay = project.auto_pay_enabled,
            anchor_day = ?project.billing_anchor_day,
            "Subscription settings updated"
        );

        Ok(project)
    }
}

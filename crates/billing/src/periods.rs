//! Billing period management
//!
//! A billing period is an operator-defined date range that scopes usage
//! imports and invoice generation. Periods are never deleted once an
//! invoice references them.

use chrono::{Datelike, NaiveDate};
use opsdash_shared::BillingPeriod;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Input for creating a billing period
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateBillingPeriod {
    pub project_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub notes: Option<String>,
}

/// Service for billing period CRUD
#[derive(Clone)]
pub struct PeriodService {
    pool: PgPool,
}

impl PeriodService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a billing period for a project the caller owns
    pub async fn create(
        &self,
        created_by: Uuid,
        input: CreateBillingPeriod,
    ) -> BillingResult<BillingPeriod> {
        if input.period_start > input.period_end {
            return Err(BillingError::Validation(
                "period_start must not be after period_end".to_string(),
            ));
        }

        let project: Option<(Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, client_id FROM projects WHERE id = $1 AND created_by = $2")
                .bind(input.project_id)
                .bind(created_by)
                .fetch_optional(&self.pool)
                .await?;

        let (project_id, client_id) = project.ok_or_else(|| {
            BillingError::NotFound(format!("Project not found: {}", input.project_id))
        })?;

        let period: BillingPeriod = sqlx::query_as(
            r#"
            INSERT INTO billing_periods (project_id, client_id, created_by, period_start, period_end, status, notes)
            VALUES ($1, $2, $3, $4, $5, 'draft', $6)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(client_id)
        .bind(created_by)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            period_id = %period.id,
            project_id = %project_id,
            start = %period.period_start,
            end = %period.period_end,
            "Billing period created"
        );

        Ok(period)
    }

    /// Fetch a period the caller owns
    pub async fn get(&self, created_by: Uuid, period_id: Uuid) -> BillingResult<BillingPeriod> {
        let period: Option<BillingPeriod> =
            sqlx::query_as("SELECT * FROM billing_periods WHERE id = $1 AND created_by = $2")
                .bind(period_id)
                .bind(created_by)
                .fetch_optional(&self.pool)
                .await?;

        period.ok_or_else(|| BillingError::NotFound(format!("Billing period not found: {}", period_id)))
    }

    /// List periods, optionally scoped to one project
    pub async fn list(
        &self,
        created_by: Uuid,
        project_id: Option<Uuid>,
    ) -> BillingResult<Vec<BillingPeriod>> {
        let periods: Vec<BillingPeriod> = sqlx::query_as(
            r#"
            SELECT * FROM billing_periods
            WHERE created_by = $1
              AND ($2::uuid IS NULL OR project_id = $2)
            ORDER BY period_start DESC
            "#,
        )
        .bind(created_by)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(periods)
    }

    /// Find the period covering `day` for a project, or create one spanning
    /// the current calendar month. Used by the unattended sweep, which has
    /// no operator around to create a period first.
    pub async fn find_or_create_for_day(
        &self,
        created_by: Uuid,
        project_id: Uuid,
        day: NaiveDate,
    ) -> BillingResult<BillingPeriod> {
        let existing: Option<BillingPeriod> = sqlx::query_as(
            r#"
            SELECT * FROM billing_periods
            WHERE project_id = $1 AND created_by = $2
              AND period_start <= $3 AND period_end >= $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(created_by)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(period) = existing {
            return Ok(period);
        }

        let start = day
            .with_day(1)
            .ok_or_else(|| BillingError::Internal("invalid sweep date".to_string()))?;
        let end = month_end(start);

        self.create(
            created_by,
            CreateBillingPeriod {
                project_id,
                period_start: start,
                period_end: end,
                notes: Some("Auto-created by billing sweep".to_string()),
            },
        )
        .await
    }
}

/// Last day of the month containing `first_of_month`
fn month_end(first_of_month: NaiveDate) -> NaiveDate {
    let (year, month) = (first_of_month.year(), first_of_month.month());
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next_month_first
        .and_then(|d| d.pred_opt())
        .unwrap_or(first_of_month)
}

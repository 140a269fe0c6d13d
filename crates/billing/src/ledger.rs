//! Pending-item ledger
//!
//! A queue of billable facts (usage, task, manual) accumulated per project.
//! Each item is in exactly one of {pending, billed, voided}. An item moves
//! pending -> billed exactly once, at the moment it is attached to a
//! persisted invoice line item, and billed -> pending only through the
//! reconciler's void-rollback path. Both transitions run against a
//! `status = 'pending'` / `status = 'billed'` predicate so concurrent
//! claimants cannot double-bill.

use opsdash_shared::{PendingItemSource, PendingItemStatus};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::calculator::line_amount_cents;
use crate::error::{BillingError, BillingResult};

/// An atomic unit of billable work not yet attached to an invoice line item
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingInvoiceItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub created_by: Uuid,
    pub source_type: PendingItemSource,
    pub source_ref_id: Option<Uuid>,
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub status: PendingItemStatus,
    pub billed_invoice_id: Option<Uuid>,
    pub billed_invoice_line_item_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

/// Input for enqueuing a manual or task-sourced pending item
#[derive(Debug, Clone, Deserialize)]
pub struct NewPendingItem {
    pub project_id: Uuid,
    pub source_type: PendingItemSource,
    pub source_ref_id: Option<Uuid>,
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One normalized row from a usage import (CSV/PDF parsing happens upstream)
#[derive(Debug, Clone, Deserialize)]
pub struct UsageImportRow {
    pub occurred_at: chrono::NaiveDate,
    pub description: String,
    pub quantity: f64,
    pub unit_cost_cents: i64,
}

/// Pending-item ledger service
#[derive(Clone)]
pub struct LedgerService {
    pool: PgPool,
}

impl LedgerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a billable fact
    pub async fn enqueue(
        &self,
        created_by: Uuid,
        item: NewPendingItem,
    ) -> BillingResult<PendingInvoiceItem> {
        if item.quantity < 0.0 {
            return Err(BillingError::Validation("quantity must be >= 0".to_string()));
        }
        if item.unit_price_cents < 0 {
            return Err(BillingError::Validation(
                "unit_price_cents must be >= 0".to_string(),
            ));
        }
        if item.description.trim().is_empty() {
            return Err(BillingError::Validation("description is required".to_string()));
        }

        let project: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT client_id FROM projects WHERE id = $1 AND created_by = $2")
                .bind(item.project_id)
                .bind(created_by)
                .fetch_optional(&self.pool)
                .await?;

        let (client_id,) = project.ok_or_else(|| {
            BillingError::NotFound(format!("Project not found: {}", item.project_id))
        })?;

        let row: PendingInvoiceItem = sqlx::query_as(
            r#"
            INSERT INTO pending_invoice_items (
                project_id, client_id, created_by, source_type, source_ref_id,
                description, quantity, unit_price_cents, status, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
            RETURNING *
            "#,
        )
        .bind(item.project_id)
        .bind(client_id)
        .bind(created_by)
        .bind(item.source_type)
        .bind(item.source_ref_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(&item.metadata)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            item_id = %row.id,
            project_id = %row.project_id,
            source_type = %row.source_type,
            amount_cents = row.amount_cents,
            "Pending item enqueued"
        );

        Ok(row)
    }

    /// List a project's pending items, oldest first
    ///
    /// When a billing period is given, items tagged with another period are
    /// excluded, but items with no period tag remain eligible: ad-hoc
    /// manual/task items must not be stranded just because nobody tagged
    /// them to a period.
    pub async fn list_pending(
        &self,
        created_by: Uuid,
        project_id: Uuid,
        billing_period_id: Option<Uuid>,
    ) -> BillingResult<Vec<PendingInvoiceItem>> {
        let items: Vec<PendingInvoiceItem> = sqlx::query_as(
            r#"
            SELECT * FROM pending_invoice_items
            WHERE created_by = $1
              AND project_id = $2
              AND status = 'pending'
              AND (
                  $3::uuid IS NULL
                  OR metadata->>'billing_period_id' IS NULL
                  OR metadata->>'billing_period_id' = $3::text
              )
            ORDER BY created_at ASC
            "#,
        )
        .bind(created_by)
        .bind(project_id)
        .bind(billing_period_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Claim a set of pending items for billing inside the caller's
    /// transaction. Rows already billed or voided are not returned, which
    /// is what stops two concurrent composer runs from claiming the same
    /// item: the second claimant sees a short result set.
    pub async fn claim_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        created_by: Uuid,
        project_id: Uuid,
        ids: &[Uuid],
    ) -> BillingResult<Vec<PendingInvoiceItem>> {
        let items: Vec<PendingInvoiceItem> = sqlx::query_as(
            r#"
            SELECT * FROM pending_invoice_items
            WHERE id = ANY($1)
              AND created_by = $2
              AND project_id = $3
              AND status = 'pending'
            ORDER BY created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .bind(created_by)
        .bind(project_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(items)
    }

    /// Mark claimed items billed, linking each to its invoice line item.
    /// Must run in the same transaction that inserted the line items; any
    /// row that is no longer pending fails the whole composition.
    pub async fn mark_billed(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        line_item_id_by_pending_id: &HashMap<Uuid, Uuid>,
    ) -> BillingResult<()> {
        for (pending_id, line_item_id) in line_item_id_by_pending_id {
            let result = sqlx::query(
                r#"
                UPDATE pending_invoice_items
                SET status = 'billed', billed_invoice_id = $1, billed_invoice_line_item_id = $2
                WHERE id = $3 AND status = 'pending'
                "#,
            )
            .bind(invoice_id)
            .bind(line_item_id)
            .bind(pending_id)
            .execute(&mut **tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(BillingError::Conflict(format!(
                    "Pending item {} already billed or missing",
                    pending_id
                )));
            }
        }

        Ok(())
    }

    /// Void pending items (operator action, not invoice-driven)
    pub async fn mark_voided(&self, created_by: Uuid, ids: &[Uuid]) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pending_invoice_items
            SET status = 'voided'
            WHERE id = ANY($1) AND created_by = $2 AND status = 'pending'
            "#,
        )
        .bind(ids)
        .bind(created_by)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Void-rollback path: return billed items to the pending queue and
    /// clear their invoice back-references so the work is billable again
    pub async fn revert_to_pending(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE pending_invoice_items
            SET status = 'pending', billed_invoice_id = NULL, billed_invoice_line_item_id = NULL
            WHERE id = ANY($1) AND status = 'billed'
            "#,
        )
        .bind(ids)
        .execute(&mut **tx)
        .await?;

        tracing::info!(
            reverted = result.rows_affected(),
            "Billed items reverted to pending"
        );

        Ok(result.rows_affected())
    }

    /// Import normalized usage rows for a billing period.
    ///
    /// Inserts the raw rows for audit, then enqueues ONE aggregate pending
    /// item for the whole batch (quantity = 1, unit price = batch total) so
    /// invoice line counts stay bounded regardless of import size.
    pub async fn import_usage(
        &self,
        created_by: Uuid,
        period_id: Uuid,
        rows: Vec<UsageImportRow>,
    ) -> BillingResult<PendingInvoiceItem> {
        if rows.is_empty() {
            return Err(BillingError::Validation(
                "usage import requires at least one row".to_string(),
            ));
        }
        for row in &rows {
            if row.quantity < 0.0 || row.unit_cost_cents < 0 {
                return Err(BillingError::Validation(
                    "usage rows must have non-negative quantity and cost".to_string(),
                ));
            }
        }

        let period: Option<(Uuid, Option<Uuid>, chrono::NaiveDate, chrono::NaiveDate)> =
            sqlx::query_as(
                r#"
                SELECT project_id, client_id, period_start, period_end
                FROM billing_periods WHERE id = $1 AND created_by = $2
                "#,
            )
            .bind(period_id)
            .bind(created_by)
            .fetch_optional(&self.pool)
            .await?;

        let (project_id, client_id, period_start, period_end) = period.ok_or_else(|| {
            BillingError::NotFound(format!("Billing period not found: {}", period_id))
        })?;

        if let Some(out_of_range) = rows
            .iter()
            .find(|r| r.occurred_at < period_start || r.occurred_at > period_end)
        {
            return Err(BillingError::Validation(format!(
                "usage row dated {} falls outside the billing period",
                out_of_range.occurred_at
            )));
        }

        let mut tx = self.pool.begin().await?;

        let total_cents: i64 = rows
            .iter()
            .map(|r| line_amount_cents(r.quantity, r.unit_cost_cents))
            .sum();
        let row_count = rows.len();

        let item: PendingInvoiceItem = sqlx::query_as(
            r#"
            INSERT INTO pending_invoice_items (
                project_id, client_id, created_by, source_type, description,
                quantity, unit_price_cents, status, metadata
            )
            VALUES ($1, $2, $3, 'usage', $4, 1, $5, 'pending', $6)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(client_id)
        .bind(created_by)
        .bind(format!("Metered usage ({} events)", row_count))
        .bind(total_cents)
        .bind(serde_json::json!({
            "billing_period_id": period_id.to_string(),
            "usage_event_count": row_count,
        }))
        .fetch_one(&mut *tx)
        .await?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO usage_events (
                    project_id, billing_period_id, created_by, occurred_at,
                    description, quantity, unit_cost_cents, pending_item_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(project_id)
            .bind(period_id)
            .bind(created_by)
            .bind(row.occurred_at)
            .bind(&row.description)
            .bind(row.quantity)
            .bind(row.unit_cost_cents)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            item_id = %item.id,
            period_id = %period_id,
            rows = row_count,
            total_cents = total_cents,
            "Usage batch imported and aggregated"
        );

        Ok(item)
    }

    /// Roll any usage rows for the period that were imported but never
    /// aggregated into one pending item. Composer fallback for gateway-free
    /// imports done directly against the usage_events table.
    pub async fn aggregate_unbilled_usage(
        &self,
        created_by: Uuid,
        period_id: Uuid,
        project_id: Uuid,
        client_id: Option<Uuid>,
    ) -> BillingResult<Option<PendingInvoiceItem>> {
        let mut tx = self.pool.begin().await?;

        let orphans: Vec<(Uuid, f64, i64)> = sqlx::query_as(
            r#"
            SELECT id, quantity, unit_cost_cents FROM usage_events
            WHERE billing_period_id = $1 AND created_by = $2 AND pending_item_id IS NULL
            FOR UPDATE
            "#,
        )
        .bind(period_id)
        .bind(created_by)
        .fetch_all(&mut *tx)
        .await?;

        if orphans.is_empty() {
            return Ok(None);
        }

        let total_cents: i64 = orphans
            .iter()
            .map(|(_, q, c)| line_amount_cents(*q, *c))
            .sum();
        let ids: Vec<Uuid> = orphans.iter().map(|(id, _, _)| *id).collect();

        let item: PendingInvoiceItem = sqlx::query_as(
            r#"
            INSERT INTO pending_invoice_items (
                project_id, client_id, created_by, source_type, description,
                quantity, unit_price_cents, status, metadata
            )
            VALUES ($1, $2, $3, 'usage', $4, 1, $5, 'pending', $6)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(client_id)
        .bind(created_by)
        .bind(format!("Metered usage ({} events)", orphans.len()))
        .bind(total_cents)
        .bind(serde_json::json!({
            "billing_period_id": period_id.to_string(),
            "usage_event_count": orphans.len(),
        }))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE usage_events SET pending_item_id = $1 WHERE id = ANY($2)")
            .bind(item.id)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            item_id = %item.id,
            period_id = %period_id,
            rows = ids.len(),
            "Unaggregated usage rolled into pending item"
        );

        Ok(Some(item))
    }
}

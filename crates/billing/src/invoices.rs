//! Local invoice mirror
//!
//! The datastore's view of gateway invoices. Writes come from two sides:
//! the composer inserts draft rows inside its billing transaction, and the
//! reconciler upserts rows keyed by gateway_invoice_id as webhook events
//! arrive, in whatever order the gateway delivers them.

use chrono::NaiveDate;
use opsdash_shared::{CollectionMethod, InvoiceStatus, PaymentMethodType};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::calculator::FinalLine;
use crate::error::{BillingError, BillingResult};

/// A mirrored invoice row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub billing_period_id: Option<Uuid>,
    pub gateway_invoice_id: String,
    pub gateway_customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub processing_fee_cents: i64,
    pub total_cents: i64,
    pub net_amount_cents: i64,
    pub payment_method_type: PaymentMethodType,
    pub collection_method: CollectionMethod,
    pub due_date: Option<NaiveDate>,
    pub status: InvoiceStatus,
    pub hosted_url: Option<String>,
    pub pdf_url: Option<String>,
    pub payment_method_used: Option<String>,
    pub payment_brand: Option<String>,
    pub payment_last4: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: OffsetDateTime,
}

/// An invoice line item, owned by exactly one invoice
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InvoiceLineItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub line_type: opsdash_shared::LineType,
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub sort_order: i32,
    pub metadata: serde_json::Value,
    pub pending_source_item_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// An invoice hydrated with its line items
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithLines {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub line_items: Vec<InvoiceLineItem>,
}

/// Composer-side insert payload
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub billing_period_id: Option<Uuid>,
    pub gateway_invoice_id: String,
    pub gateway_customer_id: String,
    pub subtotal_cents: i64,
    pub processing_fee_cents: i64,
    pub total_cents: i64,
    pub payment_method_type: PaymentMethodType,
    pub collection_method: CollectionMethod,
    pub due_date: Option<NaiveDate>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
}

/// Reconciler-side upsert payload; None fields leave existing values alone
#[derive(Debug, Clone, Default)]
pub struct GatewayInvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub subtotal_cents: Option<i64>,
    pub total_cents: Option<i64>,
    pub processing_fee_cents: Option<i64>,
    pub net_amount_cents: Option<i64>,
    pub hosted_url: Option<String>,
    pub pdf_url: Option<String>,
    pub payment_method_used: Option<String>,
    pub payment_brand: Option<String>,
    pub payment_last4: Option<String>,
    /// Merged into the existing metadata object, never replacing it
    pub metadata_patch: Option<serde_json::Value>,
}

/// Context for defensively creating a row the datastore has not seen yet
/// (the webhook arrived before, or without, a local compose)
#[derive(Debug, Clone)]
pub struct UpsertContext {
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub created_by: Uuid,
    pub gateway_customer_id: Option<String>,
}

/// Invoice repository
#[derive(Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a draft invoice inside the composer's transaction
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new: NewInvoice,
    ) -> BillingResult<Invoice> {
        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                invoice_number, project_id, client_id, billing_period_id,
                gateway_invoice_id, gateway_customer_id, subtotal_cents,
                processing_fee_cents, total_cents, net_amount_cents,
                payment_method_type, collection_method, due_date, status,
                metadata, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, $11, $12, 'draft', $13, $14)
            RETURNING *
            "#,
        )
        .bind(generate_invoice_number())
        .bind(new.project_id)
        .bind(new.client_id)
        .bind(new.billing_period_id)
        .bind(&new.gateway_invoice_id)
        .bind(&new.gateway_customer_id)
        .bind(new.subtotal_cents)
        .bind(new.processing_fee_cents)
        .bind(new.total_cents)
        .bind(new.payment_method_type)
        .bind(new.collection_method)
        .bind(new.due_date)
        .bind(&new.metadata)
        .bind(new.created_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(invoice)
    }

    /// Insert one line item, returning its id for pending-item linkage
    pub async fn insert_line(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invoice_id: Uuid,
        sort_order: i32,
        line: &FinalLine,
    ) -> BillingResult<InvoiceLineItem> {
        let row: InvoiceLineItem = sqlx::query_as(
            r#"
            INSERT INTO invoice_line_items (
                invoice_id, line_type, description, quantity, unit_price_cents,
                amount_cents, sort_order, metadata, pending_source_item_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(line.line_type)
        .bind(&line.description)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.amount_cents)
        .bind(sort_order)
        .bind(line.metadata.clone().unwrap_or_else(|| serde_json::json!({})))
        .bind(line.pending_source_item_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Fetch an invoice the caller owns
    pub async fn get(&self, created_by: Uuid, invoice_id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> =
            sqlx::query_as("SELECT * FROM invoices WHERE id = $1 AND created_by = $2")
                .bind(invoice_id)
                .bind(created_by)
                .fetch_optional(&self.pool)
                .await?;

        invoice.ok_or_else(|| BillingError::NotFound(format!("Invoice not found: {}", invoice_id)))
    }

    /// Fetch an invoice with its line items
    pub async fn get_with_lines(
        &self,
        created_by: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<InvoiceWithLines> {
        let invoice = self.get(created_by, invoice_id).await?;
        let line_items = self.lines_for(invoice_id).await?;
        Ok(InvoiceWithLines { invoice, line_items })
    }

    pub async fn lines_for(&self, invoice_id: Uuid) -> BillingResult<Vec<InvoiceLineItem>> {
        let lines: Vec<InvoiceLineItem> = sqlx::query_as(
            "SELECT * FROM invoice_line_items WHERE invoice_id = $1 ORDER BY sort_order ASC",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// List invoices, optionally scoped to one project
    pub async fn list(
        &self,
        created_by: Uuid,
        project_id: Option<Uuid>,
    ) -> BillingResult<Vec<Invoice>> {
        let invoices: Vec<Invoice> = sqlx::query_as(
            r#"
            SELECT * FROM invoices
            WHERE created_by = $1
              AND ($2::uuid IS NULL OR project_id = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(created_by)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    pub async fn find_by_gateway_id(
        &self,
        gateway_invoice_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let invoice: Option<Invoice> =
            sqlx::query_as("SELECT * FROM invoices WHERE gateway_invoice_id = $1")
                .bind(gateway_invoice_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(invoice)
    }

    /// Idempotent upsert keyed by gateway_invoice_id.
    ///
    /// Select-then-insert-or-update inside one transaction; two concurrent
    /// webhook deliveries for the same invoice serialize on the row lock
    /// (or on the unique constraint for the insert race) instead of
    /// creating duplicates. Replays converge to the same row state.
    pub async fn upsert_from_gateway(
        &self,
        gateway_invoice_id: &str,
        patch: GatewayInvoicePatch,
        context: UpsertContext,
    ) -> BillingResult<Invoice> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Invoice> = sqlx::query_as(
            "SELECT * FROM invoices WHERE gateway_invoice_id = $1 FOR UPDATE",
        )
        .bind(gateway_invoice_id)
        .fetch_optional(&mut *tx)
        .await?;

        let invoice: Invoice = if existing.is_some() {
            sqlx::query_as(
                r#"
                UPDATE invoices SET
                    status = COALESCE($2, status),
                    subtotal_cents = COALESCE($3, subtotal_cents),
                    total_cents = COALESCE($4, total_cents),
                    processing_fee_cents = COALESCE($5, processing_fee_cents),
                    net_amount_cents = COALESCE($6, net_amount_cents),
                    hosted_url = COALESCE($7, hosted_url),
                    pdf_url = COALESCE($8, pdf_url),
                    payment_method_used = COALESCE($9, payment_method_used),
                    payment_brand = COALESCE($10, payment_brand),
                    payment_last4 = COALESCE($11, payment_last4),
                    metadata = metadata || COALESCE($12, '{}'::jsonb)
                WHERE gateway_invoice_id = $1
                RETURNING *
                "#,
            )
            .bind(gateway_invoice_id)
            .bind(patch.status)
            .bind(patch.subtotal_cents)
            .bind(patch.total_cents)
            .bind(patch.processing_fee_cents)
            .bind(patch.net_amount_cents)
            .bind(&patch.hosted_url)
            .bind(&patch.pdf_url)
            .bind(&patch.payment_method_used)
            .bind(&patch.payment_brand)
            .bind(&patch.payment_last4)
            .bind(&patch.metadata_patch)
            .fetch_one(&mut *tx)
            .await?
        } else {
            // Defensive insert: the gateway saw this invoice before we did
            sqlx::query_as(
                r#"
                INSERT INTO invoices (
                    invoice_number, project_id, client_id, gateway_invoice_id,
                    gateway_customer_id, subtotal_cents, total_cents,
                    processing_fee_cents, net_amount_cents, status,
                    hosted_url, pdf_url, payment_method_used, payment_brand,
                    payment_last4, metadata, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (gateway_invoice_id) DO UPDATE SET
                    status = EXCLUDED.status,
                    subtotal_cents = EXCLUDED.subtotal_cents,
                    total_cents = EXCLUDED.total_cents,
                    processing_fee_cents = EXCLUDED.processing_fee_cents,
                    net_amount_cents = EXCLUDED.net_amount_cents,
                    hosted_url = COALESCE(EXCLUDED.hosted_url, invoices.hosted_url),
                    pdf_url = COALESCE(EXCLUDED.pdf_url, invoices.pdf_url),
                    metadata = invoices.metadata || EXCLUDED.metadata
                RETURNING *
                "#,
            )
            .bind(generate_invoice_number())
            .bind(context.project_id)
            .bind(context.client_id)
            .bind(gateway_invoice_id)
            .bind(&context.gateway_customer_id)
            .bind(patch.subtotal_cents.unwrap_or(0))
            .bind(patch.total_cents.unwrap_or(0))
            .bind(patch.processing_fee_cents.unwrap_or(0))
            .bind(patch.net_amount_cents.unwrap_or(0))
            .bind(patch.status.unwrap_or(InvoiceStatus::Open))
            .bind(&patch.hosted_url)
            .bind(&patch.pdf_url)
            .bind(&patch.payment_method_used)
            .bind(&patch.payment_brand)
            .bind(&patch.payment_last4)
            .bind(patch.metadata_patch.unwrap_or_else(|| serde_json::json!({})))
            .bind(context.created_by)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(invoice)
    }

    /// Update status and hosted/pdf urls after a local finalize call
    pub async fn mark_finalized(
        &self,
        invoice_id: Uuid,
        hosted_url: Option<String>,
        pdf_url: Option<String>,
    ) -> BillingResult<Invoice> {
        let invoice: Invoice = sqlx::query_as(
            r#"
            UPDATE invoices SET
                status = 'open',
                hosted_url = COALESCE($2, hosted_url),
                pdf_url = COALESCE($3, pdf_url)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(hosted_url)
        .bind(pdf_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Record an offline payment collected outside the gateway
    pub async fn mark_paid_offline(&self, created_by: Uuid, invoice_id: Uuid) -> BillingResult<Invoice> {
        let invoice: Option<Invoice> = sqlx::query_as(
            r#"
            UPDATE invoices SET
                status = 'paid',
                net_amount_cents = total_cents,
                payment_method_used = 'offline',
                metadata = metadata || '{"paid_offline": true}'::jsonb
            WHERE id = $1 AND created_by = $2 AND status IN ('draft', 'open')
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(created_by)
        .fetch_optional(&self.pool)
        .await?;

        invoice.ok_or_else(|| {
            BillingError::Conflict(format!(
                "Invoice {} not found or not in a payable state",
                invoice_id
            ))
        })
    }
}

/// Human-facing invoice number; uniqueness comes from gateway_invoice_id,
/// this is display-only
fn generate_invoice_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("INV-{}", &suffix[..8].to_uppercase())
}

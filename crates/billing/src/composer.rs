//! Invoice composer
//!
//! Merges a billing period, the project's billing profile, selected pending
//! items, and optional manual lines into calculator input, then drives
//! creation of the draft invoice at the gateway and its mirror row in the
//! datastore. All caller-input validation happens before the first gateway
//! call; once the gateway draft exists, any local failure triggers a
//! best-effort compensating delete of the gateway-side draft.

use chrono::NaiveDate;
use opsdash_shared::{Client, CollectionMethod, InvoiceStatus, LineType, PaymentMethodType, Project};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use stripe::{
    CollectionMethod as StripeCollectionMethod, CreateCustomer, CreateInvoice, CreateInvoiceItem,
    Currency, Customer, CustomerId, Invoice as StripeInvoice, InvoiceId, InvoiceItem,
};
use uuid::Uuid;

use crate::calculator::{apply_payment_method_adjustments, DraftLine, PaymentPolicy};
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::invoices::{InvoiceRepository, InvoiceWithLines, NewInvoice};
use crate::ledger::{LedgerService, PendingInvoiceItem};
use crate::periods::PeriodService;

/// Caller input for composing a draft invoice
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeInvoiceInput {
    pub billing_period_id: Uuid,
    /// Explicit pending items to bill. None auto-resolves everything
    /// currently pending for the period; an empty list bills no ledger
    /// items (retainer/manual-only invoice).
    pub pending_item_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub include_retainer: bool,
    #[serde(default)]
    pub manual_lines: Vec<ManualLine>,
    pub collection_method: CollectionMethod,
    /// Calendar date, YYYY-MM-DD. Required for send_invoice.
    pub due_date: Option<String>,
    pub memo: Option<String>,
}

/// A caller-supplied ad-hoc line; negative unit price allowed for credits
#[derive(Debug, Clone, Deserialize)]
pub struct ManualLine {
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
}

/// Invoice composer service
#[derive(Clone)]
pub struct InvoiceComposer {
    stripe: StripeClient,
    pool: PgPool,
    periods: PeriodService,
    ledger: LedgerService,
    invoices: InvoiceRepository,
}

impl InvoiceComposer {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            periods: PeriodService::new(pool.clone()),
            ledger: LedgerService::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            stripe,
            pool,
        }
    }

    /// Compose a draft invoice for a billing period
    pub async fn compose_draft_invoice(
        &self,
        created_by: Uuid,
        input: ComposeInvoiceInput,
    ) -> BillingResult<InvoiceWithLines> {
        // Resolve period -> project -> billing profile
        let period = self.periods.get(created_by, input.billing_period_id).await?;
        let project: Option<Project> =
            sqlx::query_as("SELECT * FROM projects WHERE id = $1 AND created_by = $2")
                .bind(period.project_id)
                .bind(created_by)
                .fetch_optional(&self.pool)
                .await?;
        let project = project.ok_or_else(|| {
            BillingError::NotFound(format!("Project not found: {}", period.project_id))
        })?;

        // A send_invoice draft must carry a parseable calendar due date;
        // this is checked before any gateway call is made
        let due_date = match input.collection_method {
            CollectionMethod::SendInvoice => Some(parse_due_date(input.due_date.as_deref())?),
            CollectionMethod::ChargeAutomatically => None,
        };

        // Resolve the pending items to bill
        let pending = self
            .resolve_pending_items(created_by, &project, period.id, &input.pending_item_ids)
            .await?;

        // Build draft lines: retainer, ledger items, caller manual lines
        let mut draft_lines: Vec<DraftLine> = Vec::new();

        if input.include_retainer && project.base_retainer_cents > 0 {
            draft_lines.push(DraftLine {
                line_type: LineType::BaseSubscription,
                description: "Monthly retainer".to_string(),
                quantity: 1.0,
                unit_price_cents: project.base_retainer_cents,
                metadata: None,
                pending_source_item_id: None,
            });
        }

        for item in &pending {
            draft_lines.push(DraftLine {
                line_type: line_type_for_source(item),
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                metadata: Some(serde_json::json!({ "source_type": item.source_type })),
                pending_source_item_id: Some(item.id),
            });
        }

        for manual in &input.manual_lines {
            if manual.description.trim().is_empty() {
                return Err(BillingError::Validation(
                    "manual lines require a description".to_string(),
                ));
            }
            draft_lines.push(DraftLine {
                line_type: LineType::InvoiceItem,
                description: manual.description.clone(),
                quantity: manual.quantity,
                unit_price_cents: manual.unit_price_cents,
                metadata: None,
                pending_source_item_id: None,
            });
        }

        if draft_lines.is_empty() {
            return Err(BillingError::Validation(
                "invoice would have no line items".to_string(),
            ));
        }

        // A sent invoice is not auto-charged, so card/ACH fee-or-discount
        // pricing does not apply regardless of the stored preference
        let effective_method = match input.collection_method {
            CollectionMethod::SendInvoice => PaymentMethodType::Offline,
            CollectionMethod::ChargeAutomatically => project.payment_method_type,
        };
        let policy = PaymentPolicy {
            payment_method_type: effective_method,
            auto_pay_enabled: project.auto_pay_enabled,
            ach_discount_cents: project.ach_discount_cents,
            show_processing_fee_line: effective_method == PaymentMethodType::Card,
        };

        let adjusted = apply_payment_method_adjustments(&draft_lines, &policy);

        // Gateway side: customer (lazily created), draft invoice, line items
        let customer_id = self.ensure_gateway_customer(&project).await?;

        let pending_ids: Vec<Uuid> = pending.iter().map(|p| p.id).collect();
        let joined_pending_ids = pending_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut invoice_metadata = HashMap::from([
            ("project_id".to_string(), project.id.to_string()),
            ("billing_period_id".to_string(), period.id.to_string()),
            ("pending_item_ids".to_string(), joined_pending_ids.clone()),
        ]);
        if let Some(client_id) = project.client_id {
            invoice_metadata.insert("client_id".to_string(), client_id.to_string());
        }

        let mut invoice_params = CreateInvoice::new();
        invoice_params.customer = Some(customer_id.clone());
        invoice_params.auto_advance = Some(false);
        invoice_params.collection_method = Some(match input.collection_method {
            CollectionMethod::ChargeAutomatically => StripeCollectionMethod::ChargeAutomatically,
            CollectionMethod::SendInvoice => StripeCollectionMethod::SendInvoice,
        });
        invoice_params.description = input.memo.as_deref();
        invoice_params.due_date = due_date.map(date_to_unix);
        invoice_params.metadata = Some(invoice_metadata);

        let gateway_invoice = StripeInvoice::create(self.stripe.inner(), invoice_params).await?;
        let gateway_invoice_id = gateway_invoice.id.to_string();

        tracing::info!(
            gateway_invoice_id = %gateway_invoice_id,
            project_id = %project.id,
            period_id = %period.id,
            total_cents = adjusted.total_cents,
            "Gateway draft invoice created"
        );

        // Everything past this point compensates by deleting the gateway
        // draft on failure
        if let Err(e) = self
            .push_gateway_lines(&customer_id, &gateway_invoice_id, &adjusted.lines)
            .await
        {
            self.delete_gateway_draft(&gateway_invoice_id).await;
            return Err(e);
        }

        match self
            .persist_invoice(created_by, &project, &period.id, &input, due_date, &adjusted, &gateway_invoice_id, &customer_id, &pending_ids)
            .await
        {
            Ok(hydrated) => Ok(hydrated),
            Err(e) => {
                tracing::error!(
                    gateway_invoice_id = %gateway_invoice_id,
                    error = %e,
                    "Local persistence failed after gateway draft was created; rolling back gateway draft"
                );
                self.delete_gateway_draft(&gateway_invoice_id).await;
                Err(e)
            }
        }
    }

    /// Finalize a draft invoice at the gateway and mirror the result
    pub async fn finalize_invoice(
        &self,
        created_by: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<InvoiceWithLines> {
        let invoice = self.invoices.get(created_by, invoice_id).await?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(BillingError::Conflict(format!(
                "Invoice {} is {} and cannot be finalized",
                invoice_id, invoice.status
            )));
        }

        let gateway_id = invoice
            .gateway_invoice_id
            .parse::<InvoiceId>()
            .map_err(|e| BillingError::Gateway(format!("Invalid invoice ID: {}", e)))?;

        let finalized =
            StripeInvoice::finalize(self.stripe.inner(), &gateway_id, Default::default()).await?;

        tracing::info!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %invoice.gateway_invoice_id,
            "Invoice finalized at gateway"
        );

        let updated = self
            .invoices
            .mark_finalized(
                invoice.id,
                finalized.hosted_invoice_url.clone(),
                finalized.invoice_pdf.clone(),
            )
            .await?;
        let line_items = self.invoices.lines_for(updated.id).await?;

        Ok(InvoiceWithLines { invoice: updated, line_items })
    }

    /// Record payment collected outside the gateway (check, wire, cash)
    pub async fn mark_paid_offline(
        &self,
        created_by: Uuid,
        invoice_id: Uuid,
    ) -> BillingResult<InvoiceWithLines> {
        let invoice = self.invoices.mark_paid_offline(created_by, invoice_id).await?;
        let line_items = self.invoices.lines_for(invoice.id).await?;

        tracing::info!(invoice_id = %invoice.id, "Invoice marked paid offline");

        Ok(InvoiceWithLines { invoice, line_items })
    }

    /// Validate explicit item ids, or auto-resolve the period's pending
    /// items (aggregating any stray usage rows first)
    async fn resolve_pending_items(
        &self,
        created_by: Uuid,
        project: &Project,
        period_id: Uuid,
        explicit_ids: &Option<Vec<Uuid>>,
    ) -> BillingResult<Vec<PendingInvoiceItem>> {
        match explicit_ids {
            Some(ids) if ids.is_empty() => Ok(Vec::new()),
            Some(ids) => {
                let items: Vec<PendingInvoiceItem> = sqlx::query_as(
                    r#"
                    SELECT * FROM pending_invoice_items
                    WHERE id = ANY($1) AND created_by = $2
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(ids)
                .bind(created_by)
                .fetch_all(&self.pool)
                .await?;

                if items.len() != ids.len() {
                    return Err(BillingError::Validation(
                        "one or more pending items are already billed or missing".to_string(),
                    ));
                }
                for item in &items {
                    if item.status != opsdash_shared::PendingItemStatus::Pending {
                        return Err(BillingError::Validation(format!(
                            "pending item {} is {}, not pending",
                            item.id, item.status
                        )));
                    }
                    if item.project_id != project.id {
                        return Err(BillingError::Validation(format!(
                            "pending item {} does not belong to this period's project",
                            item.id
                        )));
                    }
                }
                Ok(items)
            }
            None => {
                self.ledger
                    .aggregate_unbilled_usage(created_by, period_id, project.id, project.client_id)
                    .await?;
                self.ledger
                    .list_pending(created_by, project.id, Some(period_id))
                    .await
            }
        }
    }

    /// Resolve the project's gateway customer, creating one from the
    /// client record when missing
    async fn ensure_gateway_customer(&self, project: &Project) -> BillingResult<CustomerId> {
        if let Some(existing) = &project.gateway_customer_id {
            return existing
                .parse::<CustomerId>()
                .map_err(|e| BillingError::Gateway(format!("Invalid customer ID: {}", e)));
        }

        let client: Option<Client> = match project.client_id {
            Some(client_id) => {
                sqlx::query_as("SELECT * FROM clients WHERE id = $1 AND created_by = $2")
                    .bind(client_id)
                    .bind(project.created_by)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => None,
        };
        let client = client.ok_or_else(|| {
            BillingError::Conflict(format!(
                "Project {} has no gateway customer and no client to create one from",
                project.id
            ))
        })?;

        if let Some(existing) = &client.gateway_customer_id {
            let customer_id = existing
                .parse::<CustomerId>()
                .map_err(|e| BillingError::Gateway(format!("Invalid customer ID: {}", e)))?;
            sqlx::query("UPDATE projects SET gateway_customer_id = $1 WHERE id = $2")
                .bind(existing)
                .bind(project.id)
                .execute(&self.pool)
                .await?;
            return Ok(customer_id);
        }

        let mut metadata = HashMap::new();
        metadata.insert("project_id".to_string(), project.id.to_string());
        metadata.insert("client_id".to_string(), client.id.to_string());

        let params = CreateCustomer {
            name: Some(&client.name),
            email: client.email.as_deref(),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        sqlx::query("UPDATE projects SET gateway_customer_id = $1 WHERE id = $2")
            .bind(customer.id.as_str())
            .bind(project.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE clients SET gateway_customer_id = $1 WHERE id = $2")
            .bind(customer.id.as_str())
            .bind(client.id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            project_id = %project.id,
            client_id = %client.id,
            gateway_customer_id = %customer.id,
            "Gateway customer lazily created"
        );

        Ok(customer.id)
    }

    /// Add each final line to the gateway draft invoice
    async fn push_gateway_lines(
        &self,
        customer_id: &CustomerId,
        gateway_invoice_id: &str,
        lines: &[crate::calculator::FinalLine],
    ) -> BillingResult<()> {
        let invoice_id = gateway_invoice_id
            .parse::<InvoiceId>()
            .map_err(|e| BillingError::Gateway(format!("Invalid invoice ID: {}", e)))?;

        for line in lines {
            let mut item_metadata = HashMap::from([(
                "line_type".to_string(),
                line.line_type.as_str().to_string(),
            )]);
            if let Some(pending_id) = line.pending_source_item_id {
                item_metadata.insert(
                    "pending_source_item_id".to_string(),
                    pending_id.to_string(),
                );
            }

            let mut item_params = CreateInvoiceItem::new(customer_id.clone());
            item_params.invoice = Some(invoice_id.clone());
            item_params.amount = Some(line.amount_cents);
            item_params.currency = Some(Currency::USD);
            item_params.description = Some(&line.description);
            item_params.metadata = Some(item_metadata);

            InvoiceItem::create(self.stripe.inner(), item_params).await?;
        }

        Ok(())
    }

    /// Persist the invoice row, its lines, and the billed-marking of the
    /// consumed pending items in one transaction
    #[allow(clippy::too_many_arguments)]
    async fn persist_invoice(
        &self,
        created_by: Uuid,
        project: &Project,
        period_id: &Uuid,
        input: &ComposeInvoiceInput,
        due_date: Option<NaiveDate>,
        adjusted: &crate::calculator::AdjustedInvoice,
        gateway_invoice_id: &str,
        customer_id: &CustomerId,
        pending_ids: &[Uuid],
    ) -> BillingResult<InvoiceWithLines> {
        let processing_fee_cents: i64 = adjusted
            .lines
            .iter()
            .filter(|l| l.line_type == LineType::ProcessingFee)
            .map(|l| l.amount_cents)
            .sum();

        let mut tx = self.pool.begin().await?;

        let invoice = self
            .invoices
            .insert(
                &mut tx,
                NewInvoice {
                    project_id: project.id,
                    client_id: project.client_id,
                    billing_period_id: Some(*period_id),
                    gateway_invoice_id: gateway_invoice_id.to_string(),
                    gateway_customer_id: customer_id.to_string(),
                    subtotal_cents: adjusted.subtotal_cents,
                    processing_fee_cents,
                    total_cents: adjusted.total_cents,
                    payment_method_type: project.payment_method_type,
                    collection_method: input.collection_method,
                    due_date,
                    metadata: serde_json::json!({
                        "billing_period_id": period_id.to_string(),
                        "memo": input.memo.clone(),
                    }),
                    created_by,
                },
            )
            .await?;

        // Claim inside the transaction; a concurrent composer that already
        // claimed any of these rows makes the count come up short
        let claimed = self
            .ledger
            .claim_pending(&mut tx, created_by, project.id, pending_ids)
            .await?;
        if claimed.len() != pending_ids.len() {
            return Err(BillingError::Conflict(
                "one or more pending items were claimed by another invoice".to_string(),
            ));
        }

        let mut line_items = Vec::with_capacity(adjusted.lines.len());
        let mut line_item_id_by_pending_id: HashMap<Uuid, Uuid> = HashMap::new();
        for (idx, line) in adjusted.lines.iter().enumerate() {
            let row = self
                .invoices
                .insert_line(&mut tx, invoice.id, idx as i32, line)
                .await?;
            if let Some(pending_id) = row.pending_source_item_id {
                line_item_id_by_pending_id.insert(pending_id, row.id);
            }
            line_items.push(row);
        }

        self.ledger
            .mark_billed(&mut tx, invoice.id, &line_item_id_by_pending_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %gateway_invoice_id,
            lines = line_items.len(),
            billed_items = line_item_id_by_pending_id.len(),
            total_cents = invoice.total_cents,
            "Draft invoice persisted"
        );

        Ok(InvoiceWithLines { invoice, line_items })
    }

    /// Best-effort compensating delete of an orphaned gateway draft
    async fn delete_gateway_draft(&self, gateway_invoice_id: &str) {
        let parsed = match gateway_invoice_id.parse::<InvoiceId>() {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    gateway_invoice_id = %gateway_invoice_id,
                    error = %e,
                    "Cannot parse gateway invoice id for compensating delete"
                );
                return;
            }
        };

        match StripeInvoice::delete(self.stripe.inner(), &parsed).await {
            Ok(_) => {
                tracing::warn!(
                    gateway_invoice_id = %gateway_invoice_id,
                    "Orphaned gateway draft invoice deleted"
                );
            }
            Err(e) => {
                tracing::error!(
                    gateway_invoice_id = %gateway_invoice_id,
                    error = %e,
                    "Failed to delete orphaned gateway draft; manual reconciliation required"
                );
            }
        }
    }
}

/// Map a pending item's source to its invoice line type
fn line_type_for_source(item: &PendingInvoiceItem) -> LineType {
    match item.source_type {
        opsdash_shared::PendingItemSource::Usage => LineType::Usage,
        opsdash_shared::PendingItemSource::Task => LineType::Project,
        opsdash_shared::PendingItemSource::Manual => LineType::Project,
    }
}

/// Parse a due date as a plain calendar date; no timezone is applied so
/// "2026-03-01" means March 1 wherever the operator is
fn parse_due_date(raw: Option<&str>) -> BillingResult<NaiveDate> {
    let raw = raw.ok_or_else(|| {
        BillingError::Validation(
            "due_date is required when collection_method is send_invoice".to_string(),
        )
    })?;

    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        BillingError::Validation(format!("invalid due_date '{}', expected YYYY-MM-DD", raw))
    })
}

/// Midnight UTC of the calendar date, as the gateway's unix timestamp
fn date_to_unix(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

//! Billing sweep
//!
//! Unattended daily pass over projects whose billing anchor day matches
//! today. For each match it resolves (or auto-creates) a billing period,
//! composes a draft invoice from the retainer plus whatever is pending in
//! the ledger, and optionally finalizes it. One project's failure never
//! stops the sweep; outcomes are collected into a report.

use chrono::{Datelike, NaiveDate};
use opsdash_shared::{CollectionMethod, PaymentMethodType, Project};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::composer::{ComposeInvoiceInput, InvoiceComposer};
use crate::error::BillingResult;
use crate::ledger::LedgerService;
use crate::periods::PeriodService;

/// Days until a swept send_invoice draft is due
pub const SWEEP_DUE_DAYS: i64 = 15;

/// What happened to one project during a sweep
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SweepOutcome {
    Invoiced {
        project_id: Uuid,
        invoice_id: Uuid,
        total_cents: i64,
        finalized: bool,
    },
    Skipped {
        project_id: Uuid,
        reason: String,
    },
    Failed {
        project_id: Uuid,
        error: String,
    },
}

/// Aggregate result of one sweep run
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub sweep_date: NaiveDate,
    pub candidates: usize,
    pub invoiced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<SweepOutcome>,
}

/// Scheduled billing sweep service
#[derive(Clone)]
pub struct SweepService {
    pool: PgPool,
    composer: InvoiceComposer,
    periods: PeriodService,
    ledger: LedgerService,
}

impl SweepService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            composer: InvoiceComposer::new(stripe, pool.clone()),
            periods: PeriodService::new(pool.clone()),
            ledger: LedgerService::new(pool.clone()),
            pool,
        }
    }

    /// Sweep every project anchored to today's day-of-month
    pub async fn run_sweep(&self, today: NaiveDate) -> BillingResult<SweepReport> {
        let anchor_day = today.day() as i32;

        let candidates: Vec<Project> = sqlx::query_as(
            "SELECT * FROM projects WHERE billing_anchor_day = $1 ORDER BY created_at ASC",
        )
        .bind(anchor_day)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(
            sweep_date = %today,
            anchor_day = anchor_day,
            candidates = candidates.len(),
            "Billing sweep started"
        );

        let mut outcomes = Vec::with_capacity(candidates.len());
        for project in &candidates {
            let outcome = match self.sweep_project(project, today).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        project_id = %project.id,
                        error = %e,
                        "Sweep failed for project; continuing"
                    );
                    SweepOutcome::Failed {
                        project_id: project.id,
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = SweepReport {
            sweep_date: today,
            candidates: candidates.len(),
            invoiced: outcomes
                .iter()
                .filter(|o| matches!(o, SweepOutcome::Invoiced { .. }))
                .count(),
            skipped: outcomes
                .iter()
                .filter(|o| matches!(o, SweepOutcome::Skipped { .. }))
                .count(),
            failed: outcomes
                .iter()
                .filter(|o| matches!(o, SweepOutcome::Failed { .. }))
                .count(),
            outcomes,
        };

        tracing::info!(
            sweep_date = %today,
            invoiced = report.invoiced,
            skipped = report.skipped,
            failed = report.failed,
            "Billing sweep finished"
        );

        Ok(report)
    }

    async fn sweep_project(
        &self,
        project: &Project,
        today: NaiveDate,
    ) -> BillingResult<SweepOutcome> {
        let period = self
            .periods
            .find_or_create_for_day(project.created_by, project.id, today)
            .await?;

        // Already swept this period? One draft per project per period.
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM invoices
            WHERE project_id = $1 AND billing_period_id = $2 AND status <> 'void'
            LIMIT 1
            "#,
        )
        .bind(project.id)
        .bind(period.id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((invoice_id,)) = existing {
            return Ok(SweepOutcome::Skipped {
                project_id: project.id,
                reason: format!("invoice {} already exists for this period", invoice_id),
            });
        }

        let pending = self
            .ledger
            .list_pending(project.created_by, project.id, Some(period.id))
            .await?;

        // Retainer-only months are not swept; the anchor day bills
        // accumulated work, and an operator can always compose manually
        if pending.is_empty() {
            return Ok(SweepOutcome::Skipped {
                project_id: project.id,
                reason: "no pending items".to_string(),
            });
        }

        let collection_method = decide_collection_method(project);
        let due_date = match collection_method {
            CollectionMethod::SendInvoice => {
                Some((today + chrono::Duration::days(SWEEP_DUE_DAYS)).format("%Y-%m-%d").to_string())
            }
            CollectionMethod::ChargeAutomatically => None,
        };

        let composed = self
            .composer
            .compose_draft_invoice(
                project.created_by,
                ComposeInvoiceInput {
                    billing_period_id: period.id,
                    pending_item_ids: Some(pending.iter().map(|p| p.id).collect()),
                    include_retainer: project.base_retainer_cents > 0,
                    manual_lines: Vec::new(),
                    collection_method,
                    due_date,
                    memo: Some(format!(
                        "Scheduled billing for {} through {}",
                        period.period_start, period.period_end
                    )),
                },
            )
            .await?;

        let mut finalized = false;
        let invoice_id = composed.invoice.id;
        let total_cents = composed.invoice.total_cents;
        if project.billing_auto_finalize {
            self.composer
                .finalize_invoice(project.created_by, invoice_id)
                .await?;
            finalized = true;
        }

        tracing::info!(
            project_id = %project.id,
            invoice_id = %invoice_id,
            total_cents = total_cents,
            finalized = finalized,
            "Project swept"
        );

        Ok(SweepOutcome::Invoiced {
            project_id: project.id,
            invoice_id,
            total_cents,
            finalized,
        })
    }
}

/// Auto-charge only when the project both opted into auto-pay and has a
/// chargeable method on file; everything else gets a sent invoice
pub fn decide_collection_method(project: &Project) -> CollectionMethod {
    if project.auto_pay_enabled && project.payment_method_type != PaymentMethodType::Offline {
        CollectionMethod::ChargeAutomatically
    } else {
        CollectionMethod::SendInvoice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn project(method: PaymentMethodType, auto_pay: bool) -> Project {
        Project {
            id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            client_id: None,
            name: "test project".to_string(),
            payment_method_type: method,
            auto_pay_enabled: auto_pay,
            base_retainer_cents: 0,
            ach_discount_cents: 0,
            billing_anchor_day: Some(1),
            billing_auto_finalize: false,
            billing_default_collection_method: CollectionMethod::SendInvoice,
            gateway_customer_id: None,
            gateway_subscription_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_auto_pay_card_charges_automatically() {
        let p = project(PaymentMethodType::Card, true);
        assert_eq!(
            decide_collection_method(&p),
            CollectionMethod::ChargeAutomatically
        );
    }

    #[test]
    fn test_auto_pay_ach_charges_automatically() {
        let p = project(PaymentMethodType::Ach, true);
        assert_eq!(
            decide_collection_method(&p),
            CollectionMethod::ChargeAutomatically
        );
    }

    #[test]
    fn test_offline_always_sends_invoice() {
        // auto_pay means nothing without a chargeable method on file
        let p = project(PaymentMethodType::Offline, true);
        assert_eq!(decide_collection_method(&p), CollectionMethod::SendInvoice);
    }

    #[test]
    fn test_no_auto_pay_sends_invoice() {
        let p = project(PaymentMethodType::Card, false);
        assert_eq!(decide_collection_method(&p), CollectionMethod::SendInvoice);
    }
}

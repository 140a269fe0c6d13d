//! Billing ledger and invoice generation engine
//!
//! The flow, end to end: billable facts accumulate in the pending-item
//! ledger (usage imports, task completions, manual entries); the composer
//! merges them with the project's billing profile into a gateway draft
//! invoice plus a local mirror row; the webhook reconciler keeps the mirror
//! consistent with what actually happens at the gateway; and the sweep runs
//! the whole pipeline unattended on each project's billing anchor day.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod calculator;
pub mod client;
pub mod composer;
pub mod error;
pub mod invoices;
pub mod ledger;
pub mod periods;
pub mod profile;
pub mod sweep;
pub mod webhooks;

pub use calculator::{
    apply_payment_method_adjustments, card_processing_fee_cents, line_amount_cents,
    AdjustedInvoice, DraftLine, FinalLine, PaymentPolicy,
};
pub use client::{StripeClient, StripeConfig};
pub use composer::{ComposeInvoiceInput, InvoiceComposer, ManualLine};
pub use error::{BillingError, BillingResult};
pub use invoices::{
    GatewayInvoicePatch, Invoice, InvoiceLineItem, InvoiceRepository, InvoiceWithLines,
    NewInvoice, UpsertContext,
};
pub use ledger::{LedgerService, NewPendingItem, PendingInvoiceItem, UsageImportRow};
pub use periods::{CreateBillingPeriod, PeriodService};
pub use profile::{ProfileService, SubscriptionSettingsUpdate};
pub use sweep::{decide_collection_method, SweepOutcome, SweepReport, SweepService};
pub use webhooks::{verify_signature, WebhookEvent, WebhookOutcome, WebhookService};

use sqlx::PgPool;

/// One handle bundling every billing service over a shared pool and
/// gateway client. The API and worker construct this once at startup.
#[derive(Clone)]
pub struct BillingService {
    pub periods: PeriodService,
    pub ledger: LedgerService,
    pub invoices: InvoiceRepository,
    pub composer: InvoiceComposer,
    pub webhooks: WebhookService,
    pub sweep: SweepService,
    pub profile: ProfileService,
}

impl BillingService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            periods: PeriodService::new(pool.clone()),
            ledger: LedgerService::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            composer: InvoiceComposer::new(stripe.clone(), pool.clone()),
            webhooks: WebhookService::new(stripe.clone(), pool.clone()),
            sweep: SweepService::new(stripe, pool.clone()),
            profile: ProfileService::new(pool),
        }
    }

    /// Construct from environment configuration
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }
}

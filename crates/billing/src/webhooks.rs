//! Webhook reconciler
//!
//! Keeps the local invoice mirror consistent with what actually happened at
//! the gateway. Handlers are idempotent (replays converge on the same row
//! state) and tolerate out-of-order delivery: every handler upserts by
//! gateway_invoice_id rather than assuming a prior event created the row.
//!
//! Signature verification failures are the only rejected outcome; business
//! errors inside a handler are logged and acknowledged so the gateway does
//! not retry an event that will never succeed.
//!
//! Signatures are verified manually with HMAC-SHA256 (workaround for
//! async-stripe API version incompatibility with the webhook construct_event
//! helper).

use hmac::{Hmac, Mac};
use opsdash_shared::{InvoiceStatus, Project};
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Charge, ChargeId, Expandable, PaymentIntent, PaymentIntentId};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::invoices::{GatewayInvoicePatch, Invoice, InvoiceRepository, UpsertContext};
use crate::ledger::LedgerService;

type HmacSha256 = Hmac<Sha256>;

/// Reject events whose signature timestamp is older than this (replay guard)
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A parsed gateway event envelope
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub object: Value,
}

/// What the reconciler did with an event
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Processed { event_type: String },
    Ignored { event_type: String },
    /// Business error, acknowledged so the gateway stops retrying
    Failed { event_type: String, error: String },
}

/// Webhook reconciliation service
#[derive(Clone)]
pub struct WebhookService {
    stripe: StripeClient,
    pool: PgPool,
    invoices: InvoiceRepository,
    ledger: LedgerService,
}

impl WebhookService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            invoices: InvoiceRepository::new(pool.clone()),
            ledger: LedgerService::new(pool.clone()),
            stripe,
            pool,
        }
    }

    /// Verify, parse, and dispatch one raw webhook delivery.
    ///
    /// Returns Err only for signature failures (the caller responds 401 and
    /// the gateway retries). Anything that goes wrong after the payload is
    /// authenticated comes back as `WebhookOutcome::Failed`.
    pub async fn process(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> BillingResult<WebhookOutcome> {
        let now_unix = time::OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(
            &self.stripe.config().webhook_secret,
            payload,
            signature_header,
            now_unix,
        )?;

        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable webhook payload; acknowledging");
                return Ok(WebhookOutcome::Failed {
                    event_type: "unknown".to_string(),
                    error: e.to_string(),
                });
            }
        };

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook event received"
        );

        let result = match event.event_type.as_str() {
            "invoice.finalized" => self.handle_invoice_finalized(&event.object).await,
            "invoice.paid" => self.handle_invoice_paid(&event.object).await,
            "invoice.payment_failed" => self.handle_invoice_payment_failed(&event.object).await,
            "invoice.voided" => self.handle_invoice_voided(&event.object).await,
            "checkout.session.completed" => self.handle_checkout_completed(&event.object).await,
            other => {
                tracing::debug!(event_type = %other, "Ignoring unhandled webhook event type");
                return Ok(WebhookOutcome::Ignored {
                    event_type: event.event_type,
                });
            }
        };

        match result {
            Ok(()) => Ok(WebhookOutcome::Processed {
                event_type: event.event_type,
            }),
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook handler failed; acknowledging to stop retries"
                );
                Ok(WebhookOutcome::Failed {
                    event_type: event.event_type,
                    error: e.to_string(),
                })
            }
        }
    }

    /// invoice.finalized: the draft became open; capture hosted/pdf urls and
    /// the gateway's final totals
    async fn handle_invoice_finalized(&self, object: &Value) -> BillingResult<()> {
        let gateway_invoice_id = required_id(object)?;
        let context = self.upsert_context_for(object).await?;

        let patch = GatewayInvoicePatch {
            status: Some(
                map_gateway_status(object["status"].as_str().unwrap_or("open"))
                    .unwrap_or(InvoiceStatus::Open),
            ),
            subtotal_cents: object["subtotal"].as_i64(),
            total_cents: object["total"].as_i64(),
            hosted_url: string_field(object, "hosted_invoice_url"),
            pdf_url: string_field(object, "invoice_pdf"),
            ..Default::default()
        };

        let invoice = self
            .invoices
            .upsert_from_gateway(&gateway_invoice_id, patch, context)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %gateway_invoice_id,
            "Invoice finalization reconciled"
        );
        Ok(())
    }

    /// invoice.paid: settle the mirror row with actual fee and net amounts
    /// from the charge's balance transaction
    async fn handle_invoice_paid(&self, object: &Value) -> BillingResult<()> {
        let gateway_invoice_id = required_id(object)?;
        let context = self.upsert_context_for(object).await?;

        // Best effort: a paid invoice without a resolvable charge still gets
        // marked paid, just without fee/net/card detail
        let settlement = self.charge_settlement(object).await;

        let amount_paid = object["amount_paid"].as_i64();
        let net_amount_cents = match (&settlement, amount_paid) {
            (Some(s), _) => Some(s.net_cents),
            (None, Some(paid)) => Some(paid),
            (None, None) => None,
        };

        let patch = GatewayInvoicePatch {
            status: Some(InvoiceStatus::Paid),
            total_cents: object["total"].as_i64(),
            processing_fee_cents: settlement.as_ref().map(|s| s.fee_cents),
            net_amount_cents,
            hosted_url: string_field(object, "hosted_invoice_url"),
            pdf_url: string_field(object, "invoice_pdf"),
            payment_method_used: settlement.as_ref().and_then(|s| s.method.clone()),
            payment_brand: settlement.as_ref().and_then(|s| s.brand.clone()),
            payment_last4: settlement.as_ref().and_then(|s| s.last4.clone()),
            ..Default::default()
        };

        let invoice = self
            .invoices
            .upsert_from_gateway(&gateway_invoice_id, patch, context)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %gateway_invoice_id,
            net_amount_cents = ?invoice.net_amount_cents,
            "Invoice payment reconciled"
        );
        Ok(())
    }

    /// invoice.payment_failed: the invoice goes back to open; record the
    /// failure and attempt count in metadata for the operator to act on
    async fn handle_invoice_payment_failed(&self, object: &Value) -> BillingResult<()> {
        let gateway_invoice_id = required_id(object)?;
        let context = self.upsert_context_for(object).await?;

        let patch = payment_failed_patch(object);

        let invoice = self
            .invoices
            .upsert_from_gateway(&gateway_invoice_id, patch, context)
            .await?;

        tracing::warn!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %gateway_invoice_id,
            "Invoice payment failure recorded"
        );
        Ok(())
    }

    /// invoice.voided: mark the mirror row void and return its billed
    /// pending items to the queue so the work can be re-invoiced
    async fn handle_invoice_voided(&self, object: &Value) -> BillingResult<()> {
        let gateway_invoice_id = required_id(object)?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<Invoice> =
            sqlx::query_as("SELECT * FROM invoices WHERE gateway_invoice_id = $1 FOR UPDATE")
                .bind(&gateway_invoice_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(invoice) = existing else {
            // Nothing local to roll back; just mirror the void
            drop(tx);
            let context = self.upsert_context_for(object).await?;
            let patch = GatewayInvoicePatch {
                status: Some(InvoiceStatus::Void),
                ..Default::default()
            };
            self.invoices
                .upsert_from_gateway(&gateway_invoice_id, patch, context)
                .await?;
            return Ok(());
        };

        sqlx::query("UPDATE invoices SET status = 'void' WHERE id = $1")
            .bind(invoice.id)
            .execute(&mut *tx)
            .await?;

        let billed_item_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM pending_invoice_items WHERE billed_invoice_id = $1 AND status = 'billed'",
        )
        .bind(invoice.id)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = billed_item_ids.into_iter().map(|(id,)| id).collect();
        let reverted = if ids.is_empty() {
            0
        } else {
            self.ledger.revert_to_pending(&mut tx, &ids).await?
        };

        tx.commit().await?;

        tracing::info!(
            invoice_id = %invoice.id,
            gateway_invoice_id = %gateway_invoice_id,
            reverted_items = reverted,
            "Invoice void reconciled; billed items returned to queue"
        );
        Ok(())
    }

    /// checkout.session.completed: record the one-off payment, and if the
    /// session settles an invoice, mirror that too
    async fn handle_checkout_completed(&self, object: &Value) -> BillingResult<()> {
        let session_id = required_id(object)?;
        let project = self.resolve_project(object).await?;

        let amount_cents = object["amount_total"].as_i64().unwrap_or(0);
        let payment_intent_id = string_field(object, "payment_intent");
        let description = object
            .pointer("/metadata/description")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        // Best effort: a session without a resolvable charge is still paid,
        // just without card detail
        let settlement = self.session_settlement(object).await;

        sqlx::query(
            r#"
            INSERT INTO payments (
                created_by, project_id, gateway_session_id,
                gateway_payment_intent_id, amount_cents, status,
                payment_method_used, payment_brand, payment_last4, description
            )
            VALUES ($1, $2, $3, $4, $5, 'paid', $6, $7, $8, $9)
            ON CONFLICT (gateway_session_id) DO UPDATE SET
                status = 'paid',
                gateway_payment_intent_id = COALESCE(EXCLUDED.gateway_payment_intent_id, payments.gateway_payment_intent_id),
                amount_cents = EXCLUDED.amount_cents,
                payment_method_used = COALESCE(EXCLUDED.payment_method_used, payments.payment_method_used),
                payment_brand = COALESCE(EXCLUDED.payment_brand, payments.payment_brand),
                payment_last4 = COALESCE(EXCLUDED.payment_last4, payments.payment_last4)
            "#,
        )
        .bind(project.created_by)
        .bind(project.id)
        .bind(&session_id)
        .bind(&payment_intent_id)
        .bind(amount_cents)
        .bind(settlement.as_ref().and_then(|s| s.method.clone()))
        .bind(settlement.as_ref().and_then(|s| s.brand.clone()))
        .bind(settlement.as_ref().and_then(|s| s.last4.clone()))
        .bind(&description)
        .execute(&self.pool)
        .await?;

        // A session created from a hosted invoice carries the invoice id
        if let Some(invoice_id) = object["invoice"].as_str() {
            let context = UpsertContext {
                project_id: project.id,
                client_id: project.client_id,
                created_by: project.created_by,
                gateway_customer_id: string_field(object, "customer")
                    .or(project.gateway_customer_id.clone()),
            };
            let patch = GatewayInvoicePatch {
                status: Some(InvoiceStatus::Paid),
                net_amount_cents: object["amount_total"].as_i64(),
                ..Default::default()
            };
            self.invoices
                .upsert_from_gateway(invoice_id, patch, context)
                .await?;
        }

        tracing::info!(
            gateway_session_id = %session_id,
            project_id = %project.id,
            amount_cents = amount_cents,
            "Checkout session reconciled"
        );
        Ok(())
    }

    /// Pull fee, net, and payment-method detail from the charge's expanded
    /// balance transaction. None when the charge is absent or unreadable.
    async fn charge_settlement(&self, object: &Value) -> Option<ChargeSettlement> {
        let charge_id = object["charge"].as_str()?.parse::<ChargeId>().ok()?;

        let charge = match Charge::retrieve(
            self.stripe.inner(),
            &charge_id,
            &["balance_transaction"],
        )
        .await
        {
            Ok(charge) => charge,
            Err(e) => {
                tracing::warn!(
                    charge_id = %charge_id,
                    error = %e,
                    "Charge lookup failed; settling without fee detail"
                );
                return None;
            }
        };

        settlement_from_charge(&charge)
    }

    /// Same as `charge_settlement`, but starting from a checkout session:
    /// the session carries a payment intent, not a charge
    async fn session_settlement(&self, object: &Value) -> Option<ChargeSettlement> {
        let intent_id = object["payment_intent"]
            .as_str()?
            .parse::<PaymentIntentId>()
            .ok()?;

        let intent = match PaymentIntent::retrieve(
            self.stripe.inner(),
            &intent_id,
            &["latest_charge.balance_transaction"],
        )
        .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(
                    payment_intent_id = %intent_id,
                    error = %e,
                    "Payment intent lookup failed; settling without card detail"
                );
                return None;
            }
        };

        match &intent.latest_charge {
            Some(Expandable::Object(charge)) => settlement_from_charge(charge),
            _ => None,
        }
    }

    /// Build the defensive-insert context for an invoice object
    async fn upsert_context_for(&self, object: &Value) -> BillingResult<UpsertContext> {
        let project = self.resolve_project(object).await?;
        Ok(UpsertContext {
            gateway_customer_id: string_field(object, "customer")
                .or(project.gateway_customer_id.clone()),
            project_id: project.id,
            client_id: project.client_id,
            created_by: project.created_by,
        })
    }

    /// Resolve the owning project: event metadata first, then the gateway
    /// subscription id, then the gateway customer id
    async fn resolve_project(&self, object: &Value) -> BillingResult<Project> {
        if let Some(raw) = object
            .pointer("/metadata/project_id")
            .and_then(|v| v.as_str())
        {
            if let Ok(project_id) = Uuid::parse_str(raw) {
                let found: Option<Project> =
                    sqlx::query_as("SELECT * FROM projects WHERE id = $1")
                        .bind(project_id)
                        .fetch_optional(&self.pool)
                        .await?;
                if let Some(project) = found {
                    return Ok(project);
                }
            }
        }

        if let Some(subscription_id) = object["subscription"].as_str() {
            let found: Option<Project> =
                sqlx::query_as("SELECT * FROM projects WHERE gateway_subscription_id = $1")
                    .bind(subscription_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(project) = found {
                return Ok(project);
            }
        }

        if let Some(customer_id) = object["customer"].as_str() {
            let found: Option<Project> = sqlx::query_as(
                "SELECT * FROM projects WHERE gateway_customer_id = $1 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(project) = found {
                return Ok(project);
            }
        }

        Err(BillingError::NotFound(
            "No project matches this gateway event".to_string(),
        ))
    }
}

/// Fee/net/method detail for a settled charge
struct ChargeSettlement {
    fee_cents: i64,
    net_cents: i64,
    method: Option<String>,
    brand: Option<String>,
    last4: Option<String>,
}

fn settlement_from_charge(charge: &Charge) -> Option<ChargeSettlement> {
    let (fee_cents, net_cents) = match &charge.balance_transaction {
        Some(Expandable::Object(bt)) => (bt.fee, bt.net),
        _ => return None,
    };

    let charge_json = serde_json::to_value(charge).ok()?;
    let (method, brand, last4) = payment_method_detail(&charge_json);

    Some(ChargeSettlement {
        fee_cents,
        net_cents,
        method,
        brand,
        last4,
    })
}

/// Pull (method, brand, last4) out of a charge's payment_method_details.
/// Brand only exists for cards; last4 also covers bank debits.
fn payment_method_detail(
    charge_json: &Value,
) -> (Option<String>, Option<String>, Option<String>) {
    let method = charge_json
        .pointer("/payment_method_details/type")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let brand = charge_json
        .pointer("/payment_method_details/card/brand")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let last4 = charge_json
        .pointer("/payment_method_details/card/last4")
        .or_else(|| charge_json.pointer("/payment_method_details/us_bank_account/last4"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    (method, brand, last4)
}

/// Build the mirror patch for a failed payment: the invoice is open again
/// at the gateway, and the attempt count comes from the event so replays
/// converge instead of double-counting
fn payment_failed_patch(object: &Value) -> GatewayInvoicePatch {
    let failure_message = object
        .pointer("/last_payment_error/message")
        .or_else(|| object.pointer("/last_finalization_error/message"))
        .and_then(|v| v.as_str())
        .unwrap_or("payment failed")
        .to_string();

    GatewayInvoicePatch {
        status: Some(InvoiceStatus::Open),
        metadata_patch: Some(serde_json::json!({
            "last_payment_error": failure_message,
            "payment_attempt_count": object["attempt_count"].as_i64().unwrap_or(1),
            "last_payment_failed_at": time::OffsetDateTime::now_utc().unix_timestamp(),
        })),
        ..Default::default()
    }
}

/// Verify a `t=...,v1=...` signature header against the raw payload.
///
/// The signed message is `"{t}.{payload}"`; comparison is constant-time via
/// the MAC's own verifier. All failure modes collapse into one error so the
/// response leaks nothing about which check failed.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    signature_header: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => candidates.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    if candidates.is_empty() {
        return Err(BillingError::WebhookSignatureInvalid);
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);

    for candidate in candidates {
        let Ok(candidate_bytes) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&candidate_bytes).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::WebhookSignatureInvalid)
}

/// Parse the event envelope we care about: id, type, data.object
pub fn parse_event(payload: &str) -> BillingResult<WebhookEvent> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|e| BillingError::Validation(format!("malformed webhook payload: {}", e)))?;

    let id = value["id"]
        .as_str()
        .ok_or_else(|| BillingError::Validation("webhook event missing id".to_string()))?
        .to_string();
    let event_type = value["type"]
        .as_str()
        .ok_or_else(|| BillingError::Validation("webhook event missing type".to_string()))?
        .to_string();
    let object = value
        .pointer("/data/object")
        .cloned()
        .ok_or_else(|| BillingError::Validation("webhook event missing data.object".to_string()))?;

    Ok(WebhookEvent {
        id,
        event_type,
        object,
    })
}

/// Map the gateway's invoice status string onto the mirror's status
pub fn map_gateway_status(status: &str) -> Option<InvoiceStatus> {
    match status {
        "draft" => Some(InvoiceStatus::Draft),
        "open" => Some(InvoiceStatus::Open),
        "paid" => Some(InvoiceStatus::Paid),
        "void" | "uncollectible" => Some(InvoiceStatus::Void),
        _ => None,
    }
}

fn required_id(object: &Value) -> BillingResult<String> {
    object["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BillingError::Validation("event object missing id".to_string()))
}

fn string_field(object: &Value, key: &str) -> Option<String> {
    object[key].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#;

    fn sign(secret: &str, payload: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_verify_signature_accepts_valid_header() {
        let now = 1_700_000_000;
        let header = sign(SECRET, PAYLOAD, now);
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_ok());
        // Within tolerance
        assert!(verify_signature(SECRET, PAYLOAD, &header, now + 200).is_ok());
    }

    #[test]
    fn test_verify_signature_rejects_tampered_payload() {
        let now = 1_700_000_000;
        let header = sign(SECRET, PAYLOAD, now);
        let tampered = PAYLOAD.replace("in_1", "in_2");
        assert!(matches!(
            verify_signature(SECRET, &tampered, &header, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let now = 1_700_000_000;
        let header = sign("whsec_other", PAYLOAD, now);
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_stale_timestamp() {
        let now = 1_700_000_000;
        let header = sign(SECRET, PAYLOAD, now - SIGNATURE_TOLERANCE_SECS - 1);
        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    #[test]
    fn test_verify_signature_rejects_malformed_header() {
        let now = 1_700_000_000;
        assert!(verify_signature(SECRET, PAYLOAD, "", now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "t=abc,v1=zzzz", now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "v1=deadbeef", now).is_err());
        assert!(verify_signature(SECRET, PAYLOAD, "t=1700000000", now).is_err());
    }

    #[test]
    fn test_parse_event_extracts_envelope() {
        let event = parse_event(PAYLOAD).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.object["id"], "in_1");
    }

    #[test]
    fn test_parse_event_rejects_incomplete_payload() {
        assert!(parse_event("not json").is_err());
        assert!(parse_event(r#"{"id":"evt_1"}"#).is_err());
        assert!(parse_event(r#"{"id":"evt_1","type":"invoice.paid"}"#).is_err());
    }

    #[test]
    fn test_payment_failed_patch_reopens_invoice() {
        let object = serde_json::json!({
            "id": "in_1",
            "status": "open",
            "attempt_count": 3,
            "last_payment_error": { "message": "Your card was declined." },
        });
        let patch = payment_failed_patch(&object);
        assert_eq!(patch.status, Some(InvoiceStatus::Open));
        let metadata = patch.metadata_patch.unwrap();
        assert_eq!(metadata["payment_attempt_count"], 3);
        assert_eq!(metadata["last_payment_error"], "Your card was declined.");
        assert!(metadata["last_payment_failed_at"].is_i64());
    }

    #[test]
    fn test_payment_failed_patch_defaults_attempt_count() {
        let patch = payment_failed_patch(&serde_json::json!({ "id": "in_1" }));
        assert_eq!(patch.status, Some(InvoiceStatus::Open));
        let metadata = patch.metadata_patch.unwrap();
        assert_eq!(metadata["payment_attempt_count"], 1);
        assert_eq!(metadata["last_payment_error"], "payment failed");
    }

    #[test]
    fn test_payment_method_detail_card() {
        let charge = serde_json::json!({
            "payment_method_details": {
                "type": "card",
                "card": { "brand": "visa", "last4": "4242" },
            }
        });
        let (method, brand, last4) = payment_method_detail(&charge);
        assert_eq!(method.as_deref(), Some("card"));
        assert_eq!(brand.as_deref(), Some("visa"));
        assert_eq!(last4.as_deref(), Some("4242"));
    }

    #[test]
    fn test_payment_method_detail_bank_debit() {
        let charge = serde_json::json!({
            "payment_method_details": {
                "type": "us_bank_account",
                "us_bank_account": { "last4": "6789" },
            }
        });
        let (method, brand, last4) = payment_method_detail(&charge);
        assert_eq!(method.as_deref(), Some("us_bank_account"));
        assert_eq!(brand, None);
        assert_eq!(last4.as_deref(), Some("6789"));
    }

    #[test]
    fn test_map_gateway_status() {
        assert_eq!(map_gateway_status("draft"), Some(InvoiceStatus::Draft));
        assert_eq!(map_gateway_status("open"), Some(InvoiceStatus::Open));
        assert_eq!(map_gateway_status("paid"), Some(InvoiceStatus::Paid));
        assert_eq!(map_gateway_status("void"), Some(InvoiceStatus::Void));
        assert_eq!(map_gateway_status("uncollectible"), Some(InvoiceStatus::Void));
        assert_eq!(map_gateway_status("deleted"), None);
    }
}

//! Common types used across OpsDash

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// How a project's invoices get collected by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    Ach,
    Offline,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::Card => "card",
            PaymentMethodType::Ach => "ach",
            PaymentMethodType::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethodType::Card),
            "ach" => Ok(PaymentMethodType::Ach),
            "offline" => Ok(PaymentMethodType::Offline),
            _ => Err(format!("Unknown payment method type: {}", s)),
        }
    }
}

/// Whether an invoice is auto-charged or sent with a due date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    ChargeAutomatically,
    SendInvoice,
}

impl CollectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::ChargeAutomatically => "charge_automatically",
            CollectionMethod::SendInvoice => "send_invoice",
        }
    }
}

impl std::fmt::Display for CollectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CollectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge_automatically" => Ok(CollectionMethod::ChargeAutomatically),
            "send_invoice" => Ok(CollectionMethod::SendInvoice),
            _ => Err(format!("Unknown collection method: {}", s)),
        }
    }
}

/// Invoice lifecycle status (mirrors the gateway's invoice states)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pending invoice item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PendingItemStatus {
    Pending,
    Billed,
    Voided,
}

impl PendingItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingItemStatus::Pending => "pending",
            PendingItemStatus::Billed => "billed",
            PendingItemStatus::Voided => "voided",
        }
    }
}

impl std::fmt::Display for PendingItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a pending invoice item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PendingItemSource {
    Usage,
    Task,
    Manual,
}

impl PendingItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingItemSource::Usage => "usage",
            PendingItemSource::Task => "task",
            PendingItemSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for PendingItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of invoice line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    BaseSubscription,
    Usage,
    Project,
    InvoiceItem,
    Subscription,
    ProcessingFee,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::BaseSubscription => "base_subscription",
            LineType::Usage => "usage",
            LineType::Project => "project",
            LineType::InvoiceItem => "invoice_item",
            LineType::Subscription => "subscription",
            LineType::ProcessingFee => "processing_fee",
        }
    }
}

impl std::fmt::Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing period lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriodStatus {
    Draft,
    Finalized,
    Paid,
}

impl BillingPeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriodStatus::Draft => "draft",
            BillingPeriodStatus::Finalized => "finalized",
            BillingPeriodStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for BillingPeriodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Core Entities
// =============================================================================

/// A client (the party being invoiced)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A project and its billing profile
///
/// The billing profile columns are mutated only through the
/// subscription-settings update operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub created_by: Uuid,
    pub client_id: Option<Uuid>,
    pub name: String,
    pub payment_method_type: PaymentMethodType,
    pub auto_pay_enabled: bool,
    pub base_retainer_cents: i64,
    pub ach_discount_cents: i64,
    /// Day-of-month (1..28) the sweep generates this project's invoice, if any
    pub billing_anchor_day: Option<i32>,
    pub billing_auto_finalize: bool,
    pub billing_default_collection_method: CollectionMethod,
    pub gateway_customer_id: Option<String>,
    pub gateway_subscription_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// An operator-defined date range scoping usage import and invoice generation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub id: Uuid,
    pub project_id: Uuid,
    pub client_id: Option<Uuid>,
    pub created_by: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: BillingPeriodStatus,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_collection_method_round_trip() {
        assert_eq!(
            CollectionMethod::ChargeAutomatically.as_str(),
            "charge_automatically"
        );
        assert_eq!(
            CollectionMethod::from_str("send_invoice").unwrap(),
            CollectionMethod::SendInvoice
        );
        assert!(CollectionMethod::from_str("mail_a_check").is_err());
    }

    #[test]
    fn test_payment_method_type_round_trip() {
        for (s, v) in [
            ("card", PaymentMethodType::Card),
            ("ach", PaymentMethodType::Ach),
            ("offline", PaymentMethodType::Offline),
        ] {
            assert_eq!(PaymentMethodType::from_str(s).unwrap(), v);
            assert_eq!(v.as_str(), s);
        }
    }

    #[test]
    fn test_line_type_strings() {
        assert_eq!(LineType::BaseSubscription.as_str(), "base_subscription");
        assert_eq!(LineType::ProcessingFee.as_str(), "processing_fee");
    }
}

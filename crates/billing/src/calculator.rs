//! Billing calculator
//!
//! Pure payment-method adjustment logic: takes priced draft lines plus the
//! project's payment policy and produces the final line items, adding a
//! card processing-fee line or an ACH auto-pay discount as the policy
//! dictates. No I/O, deterministic, all amounts in integer cents.

use opsdash_shared::{LineType, PaymentMethodType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Card-network fee model: 2.9% + 30 cents, applied to the subtotal
pub const CARD_FEE_BASIS_POINTS: i64 = 290;
pub const CARD_FEE_FIXED_CENTS: i64 = 30;

/// A priced line before payment-method adjustments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftLine {
    pub line_type: LineType,
    pub description: String,
    /// May be fractional for metered usage
    pub quantity: f64,
    pub unit_price_cents: i64,
    pub metadata: Option<serde_json::Value>,
    /// Back-reference to the pending ledger item this line bills, if any
    pub pending_source_item_id: Option<Uuid>,
}

/// A line after adjustments, with its computed amount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalLine {
    pub line_type: LineType,
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
    pub amount_cents: i64,
    pub metadata: Option<serde_json::Value>,
    pub pending_source_item_id: Option<Uuid>,
}

/// The slice of a project's billing profile the calculator needs
#[derive(Debug, Clone, Copy)]
pub struct PaymentPolicy {
    pub payment_method_type: PaymentMethodType,
    pub auto_pay_enabled: bool,
    pub ach_discount_cents: i64,
    pub show_processing_fee_line: bool,
}

/// Result of applying payment-method adjustments
#[derive(Debug, Clone, Serialize)]
pub struct AdjustedInvoice {
    pub lines: Vec<FinalLine>,
    pub subtotal_cents: i64,
    pub total_cents: i64,
}

/// Amount of a single line, rounded to the nearest cent
pub fn line_amount_cents(quantity: f64, unit_price_cents: i64) -> i64 {
    (quantity * unit_price_cents as f64).round() as i64
}

/// Card processing fee on a subtotal, rounded to the nearest cent
pub fn card_processing_fee_cents(subtotal_cents: i64) -> i64 {
    if subtotal_cents <= 0 {
        return 0;
    }
    (subtotal_cents * CARD_FEE_BASIS_POINTS + 5_000) / 10_000 + CARD_FEE_FIXED_CENTS
}

/// Apply payment-method adjustments to a set of draft lines
///
/// - subtotal = sum of rounded base line amounts
/// - ACH + auto-pay appends a negative discount line
/// - card + show_processing_fee_line appends a processing-fee line
/// - total = subtotal + adjustments, clamped to >= 0
///
/// An empty input produces an empty, zero-total result; rejecting empty
/// invoices is the composer's job.
pub fn apply_payment_method_adjustments(
    base_lines: &[DraftLine],
    policy: &PaymentPolicy,
) -> AdjustedInvoice {
    let mut lines: Vec<FinalLine> = base_lines
        .iter()
        .map(|line| FinalLine {
            line_type: line.line_type,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
            amount_cents: line_amount_cents(line.quantity, line.unit_price_cents),
            metadata: line.metadata.clone(),
            pending_source_item_id: line.pending_source_item_id,
        })
        .collect();

    let subtotal_cents: i64 = lines.iter().map(|l| l.amount_cents).sum();
    let mut total_cents = subtotal_cents;

    if policy.payment_method_type == PaymentMethodType::Ach
        && policy.auto_pay_enabled
        && policy.ach_discount_cents > 0
    {
        let discount = -policy.ach_discount_cents;
        lines.push(FinalLine {
            line_type: LineType::Project,
            description: "ACH auto-pay discount".to_string(),
            quantity: 1.0,
            unit_price_cents: discount,
            amount_cents: discount,
            metadata: None,
            pending_source_item_id: None,
        });
        total_cents += discount;
    }

    if policy.show_processing_fee_line && policy.payment_method_type == PaymentMethodType::Card {
        let fee = card_processing_fee_cents(subtotal_cents);
        lines.push(FinalLine {
            line_type: LineType::ProcessingFee,
            description: "Card processing fee".to_string(),
            quantity: 1.0,
            unit_price_cents: fee,
            amount_cents: fee,
            metadata: None,
            pending_source_item_id: None,
        });
        total_cents += fee;
    }

    AdjustedInvoice {
        lines,
        subtotal_cents,
        total_cents: total_cents.max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(quantity: f64, unit_price_cents: i64) -> DraftLine {
        DraftLine {
            line_type: LineType::Usage,
            description: "test line".to_string(),
            quantity,
            unit_price_cents,
            metadata: None,
            pending_source_item_id: None,
        }
    }

    fn policy(method: PaymentMethodType) -> PaymentPolicy {
        PaymentPolicy {
            payment_method_type: method,
            auto_pay_enabled: false,
            ach_discount_cents: 0,
            show_processing_fee_line: false,
        }
    }

    #[test]
    fn test_offline_round_trip_total() {
        // 2 x $50.00, offline: no fee, no discount
        let result =
            apply_payment_method_adjustments(&[draft(2.0, 5_000)], &policy(PaymentMethodType::Offline));
        assert_eq!(result.subtotal_cents, 10_000);
        assert_eq!(result.total_cents, 10_000);
        assert_eq!(result.lines.len(), 1);
    }

    #[test]
    fn test_card_fee_line_added() {
        let mut p = policy(PaymentMethodType::Card);
        p.show_processing_fee_line = true;
        let result = apply_payment_method_adjustments(&[draft(2.0, 5_000)], &p);

        let fee_line = result
            .lines
            .iter()
            .find(|l| l.line_type == LineType::ProcessingFee)
            .expect("processing fee line missing");
        assert!(fee_line.amount_cents > 0);
        assert_eq!(
            result.total_cents,
            result.subtotal_cents + fee_line.amount_cents
        );
        // 2.9% of $100 + 30c = 320
        assert_eq!(fee_line.amount_cents, 320);
    }

    #[test]
    fn test_card_without_fee_line_flag() {
        let result =
            apply_payment_method_adjustments(&[draft(2.0, 5_000)], &policy(PaymentMethodType::Card));
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.total_cents, 10_000);
    }

    #[test]
    fn test_ach_auto_pay_discount() {
        let p = PaymentPolicy {
            payment_method_type: PaymentMethodType::Ach,
            auto_pay_enabled: true,
            ach_discount_cents: 500,
            show_processing_fee_line: false,
        };
        let result = apply_payment_method_adjustments(&[draft(2.0, 5_000)], &p);

        let discount = result
            .lines
            .iter()
            .find(|l| l.amount_cents < 0)
            .expect("discount line missing");
        assert_eq!(discount.amount_cents, -500);
        assert_eq!(discount.description, "ACH auto-pay discount");
        assert_eq!(result.total_cents, 9_500);
    }

    #[test]
    fn test_ach_discount_requires_auto_pay() {
        let p = PaymentPolicy {
            payment_method_type: PaymentMethodType::Ach,
            auto_pay_enabled: false,
            ach_discount_cents: 500,
            show_processing_fee_line: false,
        };
        let result = apply_payment_method_adjustments(&[draft(1.0, 1_000)], &p);
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.total_cents, 1_000);
    }

    #[test]
    fn test_total_clamped_to_zero() {
        let p = PaymentPolicy {
            payment_method_type: PaymentMethodType::Ach,
            auto_pay_enabled: true,
            ach_discount_cents: 5_000,
            show_processing_fee_line: false,
        };
        let result = apply_payment_method_adjustments(&[draft(1.0, 100)], &p);
        assert_eq!(result.subtotal_cents, 100);
        assert_eq!(result.total_cents, 0);
    }

    #[test]
    fn test_fractional_quantity_rounds_to_nearest_cent() {
        // 2.5 hours x $99.99 = $249.975 -> 24998 cents
        let result = apply_payment_method_adjustments(
            &[draft(2.5, 9_999)],
            &policy(PaymentMethodType::Offline),
        );
        assert_eq!(result.subtotal_cents, 24_998);
    }

    #[test]
    fn test_deterministic_for_identical_input() {
        let lines = vec![draft(2.0, 5_000), draft(0.25, 12_345)];
        let mut p = policy(PaymentMethodType::Card);
        p.show_processing_fee_line = true;

        let a = apply_payment_method_adjustments(&lines, &p);
        let b = apply_payment_method_adjustments(&lines, &p);
        assert_eq!(a.subtotal_cents, b.subtotal_cents);
        assert_eq!(a.total_cents, b.total_cents);
        assert_eq!(a.lines.len(), b.lines.len());
        for (x, y) in a.lines.iter().zip(b.lines.iter()) {
            assert_eq!(x.amount_cents, y.amount_cents);
        }
    }

    #[test]
    fn test_empty_lines_yield_zero_totals() {
        let result = apply_payment_method_adjustments(&[], &policy(PaymentMethodType::Offline));
        assert_eq!(result.subtotal_cents, 0);
        assert_eq!(result.total_cents, 0);
        assert!(result.lines.is_empty());
    }

    #[test]
    fn test_fee_never_charged_on_zero_subtotal() {
        assert_eq!(card_processing_fee_cents(0), 0);
        assert_eq!(card_processing_fee_cents(-100), 0);
    }
}

//! Custom Test Assertions
//!
//! Assertion helpers for billing types with messages that point at the
//! offending entry instead of a bare `left != right`.

use rust_decimal::Decimal;

use domain_billing::{Invoice, InvoiceStatus, LedgerEntry};

/// Asserts the ledger balance invariant
///
/// Each entry's `balance_after` must equal the running `Σ(debit − credit)`
/// up to and including that entry, and the final running sum must equal
/// `stored_balance`.
///
/// # Panics
///
/// Panics at the first entry whose snapshot drifts, or if the stored balance
/// differs from the recomputed one
pub fn assert_ledger_consistent(entries: &[LedgerEntry], stored_balance: Decimal) {
    let mut running = Decimal::ZERO;
    for (index, entry) in entries.iter().enumerate() {
        running += entry.debit - entry.credit;
        assert_eq!(
            entry.balance_after, running,
            "balance_after drifted at entry #{} ({} {}): expected {}, found {}",
            index, entry.entry_type, entry.id, running, entry.balance_after
        );
    }
    assert_eq!(
        stored_balance, running,
        "stored balance {} does not match ledger sum {}",
        stored_balance, running
    );
}

/// Asserts an invoice's payment fields agree with each other
///
/// # Panics
///
/// Panics if `balance_due` is not `max(total − amount_paid, 0)` or the
/// status does not follow from the amounts
pub fn assert_invoice_reconciled(invoice: &Invoice) {
    let expected_due = (invoice.total - invoice.amount_paid).max(Decimal::ZERO);
    assert_eq!(
        invoice.balance_due, expected_due,
        "invoice {} balance_due {} != max(total {} - paid {}, 0)",
        invoice.invoice_number, invoice.balance_due, invoice.total, invoice.amount_paid
    );

    let expected_status = if invoice.amount_paid >= invoice.total {
        InvoiceStatus::Paid
    } else if invoice.amount_paid > Decimal::ZERO {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Unpaid
    };
    assert_eq!(
        invoice.status, expected_status,
        "invoice {} status does not follow from paid {} of {}",
        invoice.invoice_number, invoice.amount_paid, invoice.total
    );
}

/// Asserts a decimal has at most two fractional digits
pub fn assert_cents(value: Decimal) {
    assert_eq!(
        value,
        value.round_dp(2),
        "{} has more than two decimal places",
        value
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_kernel::{CustomerId, LedgerEntryId};
    use domain_billing::EntryType;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(debit: Decimal, credit: Decimal, balance_after: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(),
            customer_id: CustomerId::new(),
            reference_id: Uuid::new_v4(),
            entry_type: EntryType::Adjustment,
            debit,
            credit,
            balance_after,
            description: "test".to_string(),
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_consistent_ledger_passes() {
        let entries = vec![
            entry(dec!(560), dec!(0), dec!(560)),
            entry(dec!(0), dec!(200), dec!(360)),
        ];
        assert_ledger_consistent(&entries, dec!(360));
    }

    #[test]
    #[should_panic(expected = "balance_after drifted")]
    fn test_drifted_snapshot_panics() {
        let entries = vec![
            entry(dec!(560), dec!(0), dec!(560)),
            entry(dec!(0), dec!(200), dec!(350)),
        ];
        assert_ledger_consistent(&entries, dec!(360));
    }

    #[test]
    #[should_panic(expected = "does not match ledger sum")]
    fn test_stored_balance_mismatch_panics() {
        assert_ledger_consistent(&[entry(dec!(10), dec!(0), dec!(10))], dec!(0));
    }

    #[test]
    fn test_assert_cents() {
        assert_cents(dec!(10.25));
        assert_cents(dec!(3));
    }
}

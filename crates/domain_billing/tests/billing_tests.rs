//! End-to-end tests for domain_billing against the in-memory store

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use core_kernel::{CustomerId, InvoiceId, ShipmentId};

use domain_billing::{
    ActorContext, AdjustmentRequest, BillingError, BillingInputPatch, BillingInvoiceInput,
    BillingStore, CoordinatorConfig, Customer, EntryType, InMemoryBillingStore, InvoiceRenderer,
    InvoiceSnapshot, InvoiceStatus, LineKind, PaymentMethod, PaymentRequest, ProductInvoiceItem,
    RenderJobStatus, RenderQueue, RenderQueueConfig, Shipment, ShipmentBox, ShipmentStatus,
    TransactionCoordinator,
};

// ============================================================================
// Harness
// ============================================================================

#[derive(Default)]
struct TestRenderer {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl TestRenderer {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvoiceRenderer for TestRenderer {
    async fn render(&self, invoice_id: Uuid, snapshot: &InvoiceSnapshot) -> Result<String, BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BillingError::Storage(format!(
                "bucket unavailable for {}",
                snapshot.invoice_number
            )));
        }
        Ok(format!("invoices/{}.pdf", invoice_id))
    }
}

struct Harness {
    store: Arc<InMemoryBillingStore>,
    renderer: Arc<TestRenderer>,
    queue: RenderQueue,
    coordinator: TransactionCoordinator,
}

fn harness_with(config: CoordinatorConfig, queue_config: RenderQueueConfig) -> Harness {
    harness_on(InMemoryBillingStore::new(), config, queue_config)
}

fn harness_on(store: InMemoryBillingStore, config: CoordinatorConfig, queue_config: RenderQueueConfig) -> Harness {
    let store = Arc::new(store);
    let renderer = Arc::new(TestRenderer::default());
    let queue = RenderQueue::new(renderer.clone(), store.clone(), queue_config);
    let coordinator = TransactionCoordinator::new(store.clone(), queue.clone(), config);
    Harness {
        store,
        renderer,
        queue,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(CoordinatorConfig::default(), RenderQueueConfig::default())
}

async fn seed_customer(store: &InMemoryBillingStore) -> CustomerId {
    let customer = Customer::new("Northwind Traders");
    let id = customer.id;
    store.insert_customer(customer).await;
    id
}

/// 50 × 40 × 25 cm box (10 kg volumetric), 8 kg actual, billed per kg
fn credit_shipment(customer_id: CustomerId) -> Shipment {
    Shipment::new(customer_id, "TRK-100200", dec!(8))
        .with_box(ShipmentBox::new(dec!(50), dec!(40), dec!(25)))
        .with_item(ProductInvoiceItem::new("Cotton shirts", 12, dec!(8.50)))
        .with_item(ProductInvoiceItem::new("Leather belt", 2, dec!(15)))
        .with_billing_input(
            BillingInvoiceInput::per_kg(dec!(50), dec!(560), PaymentMethod::Credit)
                .with_e_form_charges(dec!(10)),
        )
}

fn flat_shipment(customer_id: CustomerId, total: Decimal, method: PaymentMethod) -> Shipment {
    Shipment::new(customer_id, "TRK-900100", dec!(3))
        .with_billing_input(BillingInvoiceInput::flat(total, total, method))
}

async fn seed_shipment(store: &InMemoryBillingStore, shipment: Shipment) -> ShipmentId {
    let id = shipment.id;
    store.insert_shipment(shipment).await.unwrap();
    id
}

async fn assert_balance_invariant(store: &InMemoryBillingStore, customer_id: CustomerId) {
    let customer = store.customer(customer_id).await.expect("customer exists");
    let entries = store.ledger_entries(customer_id).await;

    let mut running = Decimal::ZERO;
    for entry in &entries {
        running += entry.debit - entry.credit;
        assert_eq!(entry.balance_after, running, "balance_after drifted at entry {}", entry.id);
    }
    assert_eq!(customer.ledger_balance, running);
}

fn system() -> ActorContext {
    ActorContext::system()
}

// ============================================================================
// Confirmation Tests
// ============================================================================

mod confirmation_tests {
    use super::*;

    #[tokio::test]
    async fn test_confirm_credit_shipment_generates_and_posts() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        let year = Utc::now().year();

        let outcome = h
            .coordinator
            .confirm_shipment(shipment_id, &ActorContext::user("clerk-7"))
            .await
            .unwrap();
        let invoices = &outcome.invoices;

        assert!(invoices.created);
        assert!(outcome.warnings.is_empty());
        assert_eq!(invoices.declared_value.invoice_number, format!("DV-{}-000001", year));
        assert_eq!(invoices.billing.invoice_number, format!("BL-{}-000001", year));
        assert_eq!(invoices.customer_invoice.invoice_number, format!("INV-{}-000001", year));

        // Declared value: 12 × 8.50 + 2 × 15
        assert_eq!(invoices.declared_value.total, dec!(132.00));
        assert_eq!(invoices.declared_value.status, InvoiceStatus::Draft);
        assert_eq!(invoices.declared_value.lines.len(), 2);

        // Billing: 500 freight + 10 e-form + 50 adjustment
        let billing = &invoices.billing;
        assert_eq!(billing.total, dec!(560));
        assert_eq!(billing.tax, Decimal::ZERO);
        assert_eq!(billing.status, InvoiceStatus::AddToLedger);
        let totals: Vec<Decimal> = billing.lines.iter().map(|l| l.total).collect();
        assert_eq!(totals, vec![dec!(500), dec!(10), dec!(50)]);
        assert_eq!(billing.lines[2].kind, LineKind::Adjustment);

        // Ledger
        let entry = invoices.ledger_entry.as_ref().unwrap();
        assert_eq!(billing.posted_ledger_entry_id, Some(entry.id));
        assert_eq!(entry.entry_type, EntryType::Invoice);
        assert_eq!(entry.reference_id, *billing.id.as_uuid());
        assert_eq!(entry.debit, dec!(560));
        assert_eq!(entry.created_by.as_deref(), Some("clerk-7"));
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(560));

        // Customer invoice
        assert_eq!(invoices.customer_invoice.total, dec!(560));
        assert_eq!(invoices.customer_invoice.balance_due, dec!(560));
        assert_eq!(invoices.customer_invoice.status, InvoiceStatus::Unpaid);

        // Shipment
        let shipment = h.store.shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Confirmed);
        assert_eq!(shipment.charged_weight_kg, Some(dec!(10)));
        assert_eq!(shipment.customs_value, Some(dec!(132.00)));

        // Renders
        let jobs = h.store.render_jobs().await;
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.status == RenderJobStatus::Succeeded));
        assert_eq!(h.renderer.calls(), 3);
    }

    #[tokio::test]
    async fn test_confirm_cash_shipment_does_not_post() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id =
            seed_shipment(&h.store, flat_shipment(customer_id, dec!(250), PaymentMethod::Cash)).await;

        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        assert_eq!(outcome.invoices.billing.status, InvoiceStatus::Unpaid);
        assert!(outcome.invoices.billing.posted_ledger_entry_id.is_none());
        assert!(outcome.invoices.ledger_entry.is_none());
        assert!(h.store.ledger_entries(customer_id).await.is_empty());
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_numbers_increase_across_shipments() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let first = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        let second = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        let year = Utc::now().year();

        h.coordinator.confirm_shipment(first, &system()).await.unwrap();
        let outcome = h.coordinator.confirm_shipment(second, &system()).await.unwrap();

        assert_eq!(outcome.invoices.billing.invoice_number, format!("BL-{}-000002", year));
        assert_eq!(outcome.invoices.customer_invoice.invoice_number, format!("INV-{}-000002", year));
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(1120));
        assert_balance_invariant(&h.store, customer_id).await;
    }

    #[tokio::test]
    async fn test_reconfirm_is_rejected_without_side_effects() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let err = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap_err();

        match err {
            BillingError::InvalidState { actual, .. } => assert_eq!(actual, "CONFIRMED"),
            other => panic!("Expected InvalidState, got {:?}", other),
        }
        assert_eq!(h.store.shipment_invoices(shipment_id).await.len(), 2);
        assert_eq!(h.store.invoices().await.len(), 1);
        assert_eq!(h.store.ledger_entries(customer_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_in_transit_shipment_is_rejected() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let mut shipment = credit_shipment(customer_id);
        shipment.status = ShipmentStatus::InTransit;
        let shipment_id = seed_shipment(&h.store, shipment).await;

        let err = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap_err();

        assert!(matches!(err, BillingError::InvalidState { .. }));
        assert!(h.store.shipment_invoices(shipment_id).await.is_empty());
        assert!(h.store.invoices().await.is_empty());
        assert!(h.store.ledger_entries(customer_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_shipment_is_not_found() {
        let h = harness();
        let err = h
            .coordinator
            .confirm_shipment(ShipmentId::new(), &system())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_credit_customer_rolls_back_everything() {
        let h = harness();
        let customer = Customer::new("Not yet onboarded");
        let customer_id = customer.id;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;

        let err = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap_err();

        assert!(err.is_not_found());
        let shipment = h.store.shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status, ShipmentStatus::Draft);
        assert!(shipment.charged_weight_kg.is_none());
        assert!(h.store.shipment_invoices(shipment_id).await.is_empty());
        assert!(h.store.render_jobs().await.is_empty());

        // Numbers reserved by the failed attempt were rolled back too
        h.store.insert_customer(customer).await;
        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();
        assert!(outcome.invoices.declared_value.invoice_number.ends_with("-000001"));
    }

    #[tokio::test]
    async fn test_missing_billing_input_fails_validation() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, Shipment::new(customer_id, "TRK-1", dec!(2))).await;

        let err = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(h.store.shipment(shipment_id).await.unwrap().status, ShipmentStatus::Draft);
    }

    #[tokio::test]
    async fn test_volumetric_weight_drives_billing() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment = Shipment::new(customer_id, "TRK-VOL", dec!(25))
            .with_box(ShipmentBox::new(dec!(100), dec!(50), dec!(30)))
            .with_billing_input(BillingInvoiceInput::per_kg(dec!(20), dec!(600), PaymentMethod::Cash));
        let shipment_id = seed_shipment(&h.store, shipment).await;

        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let freight = &outcome.invoices.billing.lines[0];
        assert_eq!(freight.quantity, dec!(30));
        assert_eq!(freight.total, dec!(600));
        assert_eq!(outcome.invoices.billing.lines.len(), 1);
        assert_eq!(h.store.shipment(shipment_id).await.unwrap().charged_weight_kg, Some(dec!(30)));
    }
}

// ============================================================================
// Idempotency Tests
// ============================================================================

mod idempotency_tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_twice_returns_same_invoices() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        let first = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let second = h.coordinator.generate_invoices(shipment_id, &system()).await.unwrap();
        let third = h.coordinator.generate_invoices(shipment_id, &system()).await.unwrap();

        for again in [&second, &third] {
            assert!(!again.invoices.created);
            assert_eq!(again.invoices.declared_value.id, first.invoices.declared_value.id);
            assert_eq!(again.invoices.billing.id, first.invoices.billing.id);
            assert_eq!(again.invoices.customer_invoice.id, first.invoices.customer_invoice.id);
            assert!(again.invoices.ledger_entry.is_none());
            assert!(again.invoices.render_job_ids.is_empty());
        }

        assert_eq!(h.store.ledger_entries(customer_id).await.len(), 1);
        assert_eq!(h.store.render_jobs().await.len(), 3);
        assert_eq!(h.renderer.calls(), 3);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(560));
    }

    #[tokio::test]
    async fn test_generate_requires_confirmed_shipment() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;

        let err = h.coordinator.generate_invoices(shipment_id, &system()).await.unwrap_err();

        match err {
            BillingError::InvalidState { actual, expected, .. } => {
                assert_eq!(actual, "DRAFT");
                assert_eq!(expected, "CONFIRMED");
            }
            other => panic!("Expected InvalidState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_for_externally_confirmed_shipment() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let mut shipment = credit_shipment(customer_id);
        shipment.status = ShipmentStatus::Confirmed;
        let shipment_id = seed_shipment(&h.store, shipment).await;

        let outcome = h.coordinator.generate_invoices(shipment_id, &system()).await.unwrap();

        assert!(outcome.invoices.created);
        assert_eq!(h.store.ledger_entries(customer_id).await.len(), 1);
        assert_eq!(h.store.shipment(shipment_id).await.unwrap().status, ShipmentStatus::Confirmed);
    }
}

// ============================================================================
// Payment Tests
// ============================================================================

mod payment_tests {
    use super::*;

    async fn confirmed_invoice(h: &Harness, total: Decimal, method: PaymentMethod) -> (CustomerId, InvoiceId) {
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, flat_shipment(customer_id, total, method)).await;
        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();
        (customer_id, outcome.invoices.customer_invoice.id)
    }

    #[tokio::test]
    async fn test_payment_sequence_to_paid() {
        let h = harness();
        let (customer_id, invoice_id) = confirmed_invoice(&h, dec!(1000), PaymentMethod::Credit).await;

        let first = h
            .coordinator
            .record_payment(PaymentRequest::new(invoice_id, dec!(400), PaymentMethod::BankTransfer), &system())
            .await
            .unwrap();
        assert_eq!(first.invoice.status, InvoiceStatus::Partial);
        assert_eq!(first.outstanding, dec!(600));
        assert_eq!(first.ledger_entry.credit, dec!(400));
        assert_eq!(first.ledger_entry.entry_type, EntryType::Payment);
        assert_eq!(first.ledger_entry.balance_after, dec!(600));

        let second = h
            .coordinator
            .record_payment(
                PaymentRequest::new(invoice_id, dec!(600), PaymentMethod::Cheque).with_reference("CHQ-0042"),
                &ActorContext::user("cashier-2"),
            )
            .await
            .unwrap();
        assert_eq!(second.invoice.status, InvoiceStatus::Paid);
        assert_eq!(second.outstanding, Decimal::ZERO);
        assert_eq!(second.overpayment, Decimal::ZERO);
        assert_eq!(second.payment.reference.as_deref(), Some("CHQ-0042"));
        assert_eq!(second.payment.created_by.as_deref(), Some("cashier-2"));

        let err = h
            .coordinator
            .record_payment(PaymentRequest::new(invoice_id, dec!(1), PaymentMethod::Cash), &system())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidState { .. }));

        assert_eq!(h.store.payments().await.len(), 2);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, Decimal::ZERO);
        assert_balance_invariant(&h.store, customer_id).await;
    }

    #[tokio::test]
    async fn test_overpayment_is_flagged() {
        let h = harness();
        let (_, invoice_id) = confirmed_invoice(&h, dec!(100), PaymentMethod::Credit).await;

        let receipt = h
            .coordinator
            .record_payment(PaymentRequest::new(invoice_id, dec!(130), PaymentMethod::Cash), &system())
            .await
            .unwrap();

        assert_eq!(receipt.invoice.status, InvoiceStatus::Paid);
        assert_eq!(receipt.overpayment, dec!(30));
        assert_eq!(receipt.invoice.balance_due, Decimal::ZERO);
        assert_eq!(receipt.ledger_entry.balance_after, dec!(-30));
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_rejected() {
        let h = harness();
        let (customer_id, invoice_id) = confirmed_invoice(&h, dec!(100), PaymentMethod::Cash).await;

        for amount in [Decimal::ZERO, dec!(-25), dec!(0.004)] {
            let err = h
                .coordinator
                .record_payment(PaymentRequest::new(invoice_id, amount, PaymentMethod::Cash), &system())
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::Validation(_)), "amount {} accepted", amount);
        }
        assert!(h.store.payments().await.is_empty());
        assert!(h.store.ledger_entries(customer_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_found() {
        let h = harness();
        let err = h
            .coordinator
            .record_payment(PaymentRequest::new(InvoiceId::new(), dec!(10), PaymentMethod::Cash), &system())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cash_invoice_payment_still_credits_ledger() {
        let h = harness();
        let (customer_id, invoice_id) = confirmed_invoice(&h, dec!(80), PaymentMethod::Cash).await;

        h.coordinator
            .record_payment(PaymentRequest::new(invoice_id, dec!(80), PaymentMethod::Cash), &system())
            .await
            .unwrap();

        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(-80));
        assert_balance_invariant(&h.store, customer_id).await;
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payments_lose_no_updates() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id =
            seed_shipment(&h.store, flat_shipment(customer_id, dec!(1000), PaymentMethod::Credit)).await;
        let invoice_id = h
            .coordinator
            .confirm_shipment(shipment_id, &system())
            .await
            .unwrap()
            .invoices
            .customer_invoice
            .id;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move {
                let actor = ActorContext::system();
                coordinator
                    .record_payment(PaymentRequest::new(invoice_id, dec!(50), PaymentMethod::Card), &actor)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let invoice = h.store.invoices().await.into_iter().find(|i| i.id == invoice_id).unwrap();
        assert_eq!(invoice.amount_paid, dec!(500));
        assert_eq!(invoice.status, InvoiceStatus::Partial);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(500));
        assert_eq!(h.store.ledger_entries(customer_id).await.len(), 11);
        assert_balance_invariant(&h.store, customer_id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_get_distinct_numbers() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let mut shipment_ids = Vec::new();
        for _ in 0..8 {
            shipment_ids.push(seed_shipment(&h.store, credit_shipment(customer_id)).await);
        }

        let mut handles = Vec::new();
        for shipment_id in shipment_ids {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.confirm_shipment(shipment_id, &ActorContext::system()).await
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().invoices.customer_invoice.invoice_number);
        }

        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 8);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(4480));
        assert_balance_invariant(&h.store, customer_id).await;
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_and_is_retryable() {
        let h = harness_with(
            CoordinatorConfig::default().with_transaction_timeout(Duration::from_millis(50)),
            RenderQueueConfig::default(),
        );
        let customer_id = seed_customer(&h.store).await;

        let blocker = h.store.begin().await.unwrap();
        let err = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, dec!(10), "Storage fee"), &system())
            .await
            .unwrap_err();
        drop(blocker);

        assert!(matches!(err, BillingError::TransactionTimeout { operation: "record_adjustment", .. }));
        assert!(err.is_retryable());
        assert!(h.store.ledger_entries(customer_id).await.is_empty());

        h.coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, dec!(10), "Storage fee"), &system())
            .await
            .unwrap();
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(10));
    }

    #[tokio::test]
    async fn test_slow_commit_is_not_cut_off_by_the_deadline() {
        let h = harness_on(
            InMemoryBillingStore::new().with_commit_delay(Duration::from_millis(200)),
            CoordinatorConfig::default().with_transaction_timeout(Duration::from_millis(50)),
            RenderQueueConfig::default(),
        );
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, flat_shipment(customer_id, dec!(400), PaymentMethod::Credit)).await;
        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let receipt = h
            .coordinator
            .record_payment(
                PaymentRequest::new(outcome.invoices.customer_invoice.id, dec!(150), PaymentMethod::Cash),
                &system(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.outstanding, dec!(250));
        assert_eq!(h.store.payments().await.len(), 1);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(250));
        assert_balance_invariant(&h.store, customer_id).await;
    }
}

// ============================================================================
// Adjustment & Statement Tests
// ============================================================================

mod ledger_tests {
    use super::*;

    #[tokio::test]
    async fn test_adjustments_post_and_statement_verifies() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let debit = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, dec!(15.50), "Redelivery fee"), &system())
            .await
            .unwrap();
        let credit = h
            .coordinator
            .record_adjustment(
                AdjustmentRequest::credit(customer_id, dec!(75.50), "Damaged parcel goodwill")
                    .with_reference(*shipment_id.as_uuid()),
                &ActorContext::user("manager-1"),
            )
            .await
            .unwrap();

        assert_eq!(debit.entry_type, EntryType::Adjustment);
        assert_eq!(debit.balance_after, dec!(575.50));
        assert_eq!(credit.balance_after, dec!(500.00));
        assert_eq!(credit.reference_id, *shipment_id.as_uuid());

        let statement = h.coordinator.customer_statement(customer_id).await.unwrap();
        assert_eq!(statement.entries.len(), 3);
        assert_eq!(statement.stored_balance, dec!(500.00));
        assert_eq!(statement.computed_balance, dec!(500.00));
        assert!(statement.verify().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_adjustments_are_rejected() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;

        let both = AdjustmentRequest {
            credit: dec!(5),
            ..AdjustmentRequest::debit(customer_id, dec!(5), "Both sides")
        };
        assert!(matches!(
            h.coordinator.record_adjustment(both, &system()).await,
            Err(BillingError::Validation(_))
        ));

        let err = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(CustomerId::new(), dec!(5), "Ghost"), &system())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(h.store.ledger_entries(customer_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_sub_cent_adjustment_posts_nothing() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;

        let err = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, dec!(0.004), "Rounding dust"), &system())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
        assert!(h.store.ledger_entries(customer_id).await.is_empty());
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_adjustments_near_the_storable_limit_do_not_panic() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let near_limit = dec!(999999999999.99);

        h.coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, near_limit, "Bulk contract"), &system())
            .await
            .unwrap();
        let err = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, near_limit, "Bulk contract"), &system())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        let err = h
            .coordinator
            .record_adjustment(AdjustmentRequest::debit(customer_id, Decimal::MAX - Decimal::ONE, "Overflow"), &system())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));

        assert_eq!(h.store.ledger_entries(customer_id).await.len(), 1);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, near_limit);
    }

    #[tokio::test]
    async fn test_statement_for_unknown_customer() {
        let h = harness();
        let err = h.coordinator.customer_statement(CustomerId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

// ============================================================================
// Billing Input Revision Tests
// ============================================================================

mod revision_tests {
    use super::*;

    #[tokio::test]
    async fn test_revised_input_is_billed() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;

        let patch = BillingInputPatch {
            grand_total: Some(dec!(600)),
            remote_area_charges: Some(dec!(40)),
            ..Default::default()
        };
        let revised = h
            .coordinator
            .revise_billing_input(shipment_id, patch, &system())
            .await
            .unwrap();
        assert_eq!(revised.billing_input.as_ref().unwrap().grand_total, dec!(600));

        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();
        let totals: Vec<Decimal> = outcome.invoices.billing.lines.iter().map(|l| l.total).collect();
        assert_eq!(totals, vec![dec!(500), dec!(10), dec!(40), dec!(50)]);
        assert_eq!(outcome.invoices.billing.total, dec!(600));
    }

    #[tokio::test]
    async fn test_revision_after_confirmation_is_rejected() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let patch = BillingInputPatch {
            grand_total: Some(dec!(1)),
            ..Default::default()
        };
        let err = h
            .coordinator
            .revise_billing_input(shipment_id, patch, &system())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InvalidState { .. }));
        let stored = h.store.shipment(shipment_id).await.unwrap();
        assert_eq!(stored.billing_input.unwrap().grand_total, dec!(560));
    }

    #[tokio::test]
    async fn test_invalid_patch_is_rejected() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;

        let patch = BillingInputPatch {
            box_charges: Some(dec!(-3)),
            ..Default::default()
        };
        let err = h
            .coordinator
            .revise_billing_input(shipment_id, patch, &system())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Validation(_)));
    }
}

// ============================================================================
// Render Queue Tests
// ============================================================================

mod render_tests {
    use super::*;

    #[tokio::test]
    async fn test_render_failure_is_a_warning_and_retried() {
        let h = harness();
        h.renderer.set_failing(true);
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;

        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        assert_eq!(outcome.warnings.len(), 3);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.invoice_number == outcome.invoices.billing.invoice_number));
        assert_eq!(h.store.shipment(shipment_id).await.unwrap().status, ShipmentStatus::Confirmed);
        assert_eq!(h.store.customer(customer_id).await.unwrap().ledger_balance, dec!(560));

        let jobs = h.store.render_jobs().await;
        assert!(jobs.iter().all(|j| j.status == RenderJobStatus::Failed && j.attempts == 1));
        assert!(jobs.iter().all(|j| j.last_error.is_some()));

        h.renderer.set_failing(false);
        let summary = h.queue.process_due().await.unwrap();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 3);

        let jobs = h.store.render_jobs().await;
        assert!(jobs.iter().all(|j| j.status == RenderJobStatus::Succeeded));
        assert_eq!(h.queue.process_due().await.unwrap().attempted, 0);
    }

    #[tokio::test]
    async fn test_succeeded_job_is_not_rendered_again() {
        let h = harness();
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();
        let invoice_id = *outcome.invoices.customer_invoice.id.as_uuid();
        let calls = h.renderer.calls();

        let key = h.queue.process(invoice_id).await.unwrap();

        assert_eq!(key, format!("invoices/{}.pdf", invoice_id));
        assert_eq!(h.renderer.calls(), calls);
    }

    #[tokio::test]
    async fn test_failed_jobs_stop_at_max_attempts() {
        let h = harness_with(
            CoordinatorConfig::default(),
            RenderQueueConfig::default().with_max_attempts(2),
        );
        h.renderer.set_failing(true);
        let customer_id = seed_customer(&h.store).await;
        let shipment_id = seed_shipment(&h.store, credit_shipment(customer_id)).await;
        h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();

        let summary = h.queue.process_due().await.unwrap();
        assert_eq!(summary.failed, 3);
        assert_eq!(h.queue.process_due().await.unwrap().attempted, 0);
        assert!(h.store.render_jobs().await.iter().all(|j| j.attempts == 2));
    }

    #[tokio::test]
    async fn test_unknown_render_job() {
        let h = harness();
        assert!(h.queue.process(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        /// Confirm a credit shipment billed at this many cents
        Ship(i64),
        /// Pay this many cents against the oldest open invoice
        Pay(i64),
        Debit(i64),
        Credit(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..500_000).prop_map(Op::Ship),
            (1i64..500_000).prop_map(Op::Pay),
            (1i64..500_000).prop_map(Op::Debit),
            (1i64..500_000).prop_map(Op::Credit),
        ]
    }

    async fn assert_ledger_matches(store: &InMemoryBillingStore, customer_id: CustomerId, expected: Decimal) {
        let entries = store.ledger_entries(customer_id).await;
        let debits: Decimal = entries.iter().map(|entry| entry.debit).sum();
        let credits: Decimal = entries.iter().map(|entry| entry.credit).sum();
        let balance = store.customer(customer_id).await.unwrap().ledger_balance;

        assert_eq!(balance, debits - credits);
        assert_eq!(balance, expected);
        assert_balance_invariant(store, customer_id).await;
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn balance_equals_sum_of_entries(ops in prop::collection::vec(op(), 1..25)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let h = harness();
                let customer_id = seed_customer(&h.store).await;

                let mut expected = Decimal::ZERO;
                let mut open: Vec<(InvoiceId, Decimal)> = Vec::new();
                for op in &ops {
                    match op {
                        Op::Ship(cents) => {
                            let total = Decimal::new(*cents, 2);
                            let shipment = flat_shipment(customer_id, total, PaymentMethod::Credit);
                            let shipment_id = seed_shipment(&h.store, shipment).await;
                            let outcome = h.coordinator.confirm_shipment(shipment_id, &system()).await.unwrap();
                            open.push((outcome.invoices.customer_invoice.id, total));
                            expected += total;
                        }
                        Op::Pay(cents) => {
                            let Some((invoice_id, outstanding)) = open.first().copied() else {
                                continue;
                            };
                            let amount = Decimal::new(*cents, 2);
                            let receipt = h
                                .coordinator
                                .record_payment(PaymentRequest::new(invoice_id, amount, PaymentMethod::Cash), &system())
                                .await
                                .unwrap();
                            if amount >= outstanding {
                                assert_eq!(receipt.invoice.status, InvoiceStatus::Paid);
                                open.remove(0);
                            } else {
                                assert_eq!(receipt.outstanding, outstanding - amount);
                                open[0].1 = outstanding - amount;
                            }
                            expected -= amount;
                        }
                        Op::Debit(cents) => {
                            let request = AdjustmentRequest::debit(customer_id, Decimal::new(*cents, 2), "debit");
                            h.coordinator.record_adjustment(request, &system()).await.unwrap();
                            expected += Decimal::new(*cents, 2);
                        }
                        Op::Credit(cents) => {
                            let request = AdjustmentRequest::credit(customer_id, Decimal::new(*cents, 2), "credit");
                            h.coordinator.record_adjustment(request, &system()).await.unwrap();
                            expected -= Decimal::new(*cents, 2);
                        }
                    }
                    assert_ledger_matches(&h.store, customer_id, expected).await;
                }

                let statement = h.coordinator.customer_statement(customer_id).await.unwrap();
                assert!(statement.is_consistent());
                assert_eq!(statement.stored_balance, expected);
            });
        }
    }
}

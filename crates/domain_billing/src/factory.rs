//! Invoice factory
//!
//! Builds the documents for a confirmed shipment:
//!
//! | Document | Number | Status |
//! |---|---|---|
//! | Declared-value `ShipmentInvoice` | `DV-YYYY-NNNNNN` | `DRAFT` |
//! | Billing `ShipmentInvoice` | `BL-YYYY-NNNNNN` | `ADD_TO_LEDGER` on credit, else `UNPAID` |
//! | Customer `Invoice` | `INV-YYYY-NNNNNN` | `UNPAID` |
//!
//! Generation is idempotent: documents that already exist are returned as
//! they are, and only missing ones are numbered, posted and queued for
//! rendering.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use core_kernel::{ensure_positive, round_money, CoreError, RECONCILIATION_TOLERANCE};

use crate::charges::{ChargeBreakdown, ChargeCalculator};
use crate::error::BillingError;
use crate::invoice::{
    sum_lines, Invoice, InvoiceLine, InvoiceSnapshot, InvoiceStatus, LineKind, ShipmentInvoice,
    ShipmentInvoiceType,
};
use crate::ledger::{EntryType, LedgerEntry, LedgerPoster, LedgerPosting};
use crate::numbering::{InvoiceKind, InvoiceNumberAllocator};
use crate::payment::PaymentMethod;
use crate::ports::BillingTx;
use crate::rendering::RenderJob;
use crate::shipment::{BillingInvoiceInput, Shipment, ShipmentStatus};

/// The documents belonging to one shipment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedInvoices {
    pub declared_value: ShipmentInvoice,
    pub billing: ShipmentInvoice,
    pub customer_invoice: Invoice,
    /// Ledger entry posted by this call, if any
    pub ledger_entry: Option<LedgerEntry>,
    /// Render jobs enqueued by this call
    pub render_job_ids: Vec<Uuid>,
    /// False when every document already existed
    pub created: bool,
}

/// Creates invoices for confirmed shipments
pub struct InvoiceFactory;

impl InvoiceFactory {
    /// Generates the shipment's invoices inside `tx`
    ///
    /// # Arguments
    ///
    /// * `tx` - The caller's unit of work
    /// * `shipment` - A shipment read under lock in `tx`
    /// * `issued_on` - Issue date; its year scopes the invoice numbers
    /// * `created_by` - Attributed user for any ledger posting
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the shipment is `Confirmed`
    /// - `Validation` for missing or invalid billing input, boxes or items
    /// - `NotFound` if a credit customer does not exist
    /// - `Conflict` if a number or document collides in the store
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let generated = InvoiceFactory::generate(tx.as_mut(), &shipment, today, None).await?;
    /// assert_eq!(generated.billing.total, input.grand_total);
    /// ```
    #[instrument(skip(tx, shipment, created_by), fields(shipment_id = %shipment.id))]
    pub async fn generate(
        tx: &mut dyn BillingTx,
        shipment: &Shipment,
        issued_on: NaiveDate,
        created_by: Option<String>,
    ) -> Result<GeneratedInvoices, BillingError> {
        shipment.ensure_status(ShipmentStatus::Confirmed)?;

        let existing = tx.shipment_invoices(shipment.id).await?;
        let mut declared_value = find(&existing, ShipmentInvoiceType::DeclaredValue);
        let mut billing = find(&existing, ShipmentInvoiceType::Billing);
        let mut customer_invoice = tx.invoice_for_shipment(shipment.id).await?;

        if let (Some(declared_value), Some(billing), Some(customer_invoice)) =
            (&declared_value, &billing, &customer_invoice)
        {
            debug!("Invoices already exist, returning them unchanged");
            return Ok(GeneratedInvoices {
                declared_value: declared_value.clone(),
                billing: billing.clone(),
                customer_invoice: customer_invoice.clone(),
                ledger_entry: None,
                render_job_ids: Vec::new(),
                created: false,
            });
        }

        let input = shipment.require_billing_input()?;
        input.validate()?;
        let breakdown = ChargeCalculator::for_shipment(shipment)?;
        tx.update_shipment_charges(shipment.id, breakdown.charged_weight_kg, breakdown.customs_value)
            .await?;

        let year = issued_on.year();
        let mut render_jobs = Vec::new();
        let mut ledger_entry = None;

        if declared_value.is_none() {
            let lines = declared_value_lines(shipment)?;
            let subtotal = sum_lines(&lines)?;
            let number = InvoiceNumberAllocator::allocate(tx, InvoiceKind::DeclaredValue, year).await?;
            let mut invoice = ShipmentInvoice::new(
                shipment.id,
                shipment.customer_id,
                ShipmentInvoiceType::DeclaredValue,
                number,
                subtotal,
                lines,
            );
            invoice.status = InvoiceStatus::Draft;

            tx.insert_shipment_invoice(&invoice).await?;
            render_jobs.push(RenderJob::new(InvoiceSnapshot::from(&invoice)));
            declared_value = Some(invoice);
        }

        let billing = match billing.take() {
            Some(existing) => existing,
            None => {
                let (invoice, entry) =
                    Self::create_billing(tx, shipment, input, &breakdown, year, created_by).await?;
                ledger_entry = entry;
                render_jobs.push(RenderJob::new(InvoiceSnapshot::from(&invoice)));
                invoice
            }
        };

        if customer_invoice.is_none() {
            let number = InvoiceNumberAllocator::allocate(tx, InvoiceKind::Customer, year).await?;
            let invoice = Invoice::for_billing(&billing, number);

            tx.insert_invoice(&invoice).await?;
            render_jobs.push(RenderJob::new(InvoiceSnapshot::for_customer_invoice(&invoice, &billing)));
            customer_invoice = Some(invoice);
        }

        for job in &render_jobs {
            tx.enqueue_render_job(job).await?;
        }

        let (declared_value, customer_invoice) = match (declared_value, customer_invoice) {
            (Some(dv), Some(inv)) => (dv, inv),
            _ => return Err(BillingError::conflict("invoice generation left a document missing")),
        };

        info!(
            declared_value = %declared_value.invoice_number,
            billing = %billing.invoice_number,
            customer_invoice = %customer_invoice.invoice_number,
            total = %billing.total,
            posted = ledger_entry.is_some(),
            "Invoices generated"
        );

        Ok(GeneratedInvoices {
            declared_value,
            billing,
            customer_invoice,
            ledger_entry,
            render_job_ids: render_jobs.iter().map(|job| job.invoice_id).collect(),
            created: true,
        })
    }

    async fn create_billing(
        tx: &mut dyn BillingTx,
        shipment: &Shipment,
        input: &BillingInvoiceInput,
        breakdown: &ChargeBreakdown,
        year: i32,
        created_by: Option<String>,
    ) -> Result<(ShipmentInvoice, Option<LedgerEntry>), BillingError> {
        let grand_total = round_money(ensure_positive("grand total", input.grand_total)?);
        let lines = build_billing_lines(input, breakdown.charged_weight_kg)?;
        let number = InvoiceNumberAllocator::allocate(tx, InvoiceKind::Billing, year).await?;

        let mut invoice = ShipmentInvoice::new(
            shipment.id,
            shipment.customer_id,
            ShipmentInvoiceType::Billing,
            number,
            grand_total,
            lines,
        );

        let entry = if input.payment_method == PaymentMethod::Credit {
            let entry = LedgerPoster::post(
                tx,
                LedgerPosting::debit(
                    shipment.customer_id,
                    grand_total,
                    EntryType::Invoice,
                    *invoice.id.as_uuid(),
                    format!("Invoice {} for shipment {}", invoice.invoice_number, shipment.tracking_number),
                )
                .created_by(created_by),
            )
            .await?;

            invoice.status = InvoiceStatus::AddToLedger;
            invoice.posted_ledger_entry_id = Some(entry.id);
            Some(entry)
        } else {
            invoice.status = InvoiceStatus::Unpaid;
            None
        };

        tx.insert_shipment_invoice(&invoice).await?;
        Ok((invoice, entry))
    }
}

fn find(invoices: &[ShipmentInvoice], invoice_type: ShipmentInvoiceType) -> Option<ShipmentInvoice> {
    invoices
        .iter()
        .find(|invoice| invoice.invoice_type == invoice_type)
        .cloned()
}

fn declared_value_lines(shipment: &Shipment) -> Result<Vec<InvoiceLine>, BillingError> {
    shipment
        .items
        .iter()
        .map(|item| {
            InvoiceLine::new(
                LineKind::DeclaredItem,
                item.description.clone(),
                Decimal::from(item.pieces),
                item.unit_value,
            )
        })
        .collect()
}

/// Builds the billing invoice lines for a booking
///
/// Freight is billed per kg of charged weight when a rate is present,
/// otherwise at the flat total rate. Surcharges appear only when positive.
/// An adjustment line closes any gap above one cent between the computed
/// lines and the authoritative grand total.
///
/// # Errors
///
/// Returns `Validation` if a line or the adjustment does not fit a stored amount
pub fn build_billing_lines(
    input: &BillingInvoiceInput,
    charged_weight_kg: Decimal,
) -> Result<Vec<InvoiceLine>, BillingError> {
    let mut lines = Vec::new();

    match input.rate_per_kg {
        Some(rate) => lines.push(InvoiceLine::new(
            LineKind::Freight,
            format!("Freight ({} kg @ {}/kg)", charged_weight_kg, rate),
            charged_weight_kg,
            rate,
        )?),
        None => lines.push(InvoiceLine::amount(LineKind::Freight, "Freight (flat rate)", input.total_rate)?),
    }

    let surcharges = [
        ("E-form charges", input.e_form_charges),
        ("Remote area charges", input.remote_area_charges),
        ("Box charges", input.box_charges),
    ];
    for (description, amount) in surcharges {
        if amount > Decimal::ZERO {
            lines.push(InvoiceLine::amount(LineKind::Surcharge, description, amount)?);
        }
    }

    let computed = sum_lines(&lines)?;
    let difference = round_money(input.grand_total)
        .checked_sub(computed)
        .ok_or_else(|| CoreError::out_of_range("billing adjustment", input.grand_total))?;
    if difference.abs() > RECONCILIATION_TOLERANCE {
        lines.push(InvoiceLine::amount(LineKind::Adjustment, "Adjustment to agreed total", difference)?);
    }

    Ok(lines)
}

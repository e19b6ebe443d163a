//! Test Data Builders
//!
//! Builders with sensible defaults so a test only names the fields it is
//! about.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::CustomerId;
use domain_billing::{
    BillingInvoiceInput, PaymentMethod, ProductInvoiceItem, Shipment, ShipmentBox, ShipmentStatus,
};

use crate::fixtures::ShipmentFixtures;

/// Builder for shipments
///
/// Defaults: 1 kg actual weight, no boxes, no items, and a flat cash billing
/// input of 100.00.
pub struct ShipmentBuilder {
    customer_id: CustomerId,
    tracking_number: String,
    actual_weight_kg: Decimal,
    status: ShipmentStatus,
    boxes: Vec<ShipmentBox>,
    items: Vec<ProductInvoiceItem>,
    billing_input: Option<BillingInvoiceInput>,
}

impl ShipmentBuilder {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            tracking_number: ShipmentFixtures::tracking_number(),
            actual_weight_kg: dec!(1),
            status: ShipmentStatus::Draft,
            boxes: Vec::new(),
            items: Vec::new(),
            billing_input: Some(BillingInvoiceInput::flat(dec!(100), dec!(100), PaymentMethod::Cash)),
        }
    }

    pub fn with_tracking_number(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = tracking_number.into();
        self
    }

    pub fn with_actual_weight(mut self, kg: Decimal) -> Self {
        self.actual_weight_kg = kg;
        self
    }

    pub fn with_status(mut self, status: ShipmentStatus) -> Self {
        self.status = status;
        self
    }

    /// Adds a box with the given dimensions in centimetres
    pub fn with_box(mut self, length: Decimal, width: Decimal, height: Decimal) -> Self {
        self.boxes.push(ShipmentBox::new(length, width, height));
        self
    }

    pub fn with_item(mut self, description: &str, pieces: u32, unit_value: Decimal) -> Self {
        self.items.push(ProductInvoiceItem::new(description, pieces, unit_value));
        self
    }

    pub fn with_billing_input(mut self, input: BillingInvoiceInput) -> Self {
        self.billing_input = Some(input);
        self
    }

    /// Flat-rate billing where the grand total equals the rate
    pub fn billed_flat(self, total: Decimal, method: PaymentMethod) -> Self {
        self.with_billing_input(BillingInvoiceInput::flat(total, total, method))
    }

    pub fn without_billing_input(mut self) -> Self {
        self.billing_input = None;
        self
    }

    pub fn build(self) -> Shipment {
        let mut shipment = Shipment::new(self.customer_id, self.tracking_number, self.actual_weight_kg);
        shipment.status = self.status;
        shipment.boxes = self.boxes;
        shipment.items = self.items;
        shipment.billing_input = self.billing_input;
        shipment
    }
}

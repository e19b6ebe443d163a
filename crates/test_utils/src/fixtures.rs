//! Pre-built Test Fixtures
//!
//! Ready-to-use customers and shipments. Names and tracking
//! numbers are randomized with `fake` so fixtures can be inserted repeatedly
//! into one database without tripping unique constraints; every monetary
//! value is fixed so expected totals stay predictable.

use fake::faker::company::en::CompanyName;
use fake::Fake;
use rust_decimal_macros::dec;

use core_kernel::CustomerId;
use domain_billing::{
    BillingInvoiceInput, Customer, PaymentMethod, ProductInvoiceItem, Shipment, ShipmentBox,
};

/// Customer fixtures
pub struct CustomerFixtures;

impl CustomerFixtures {
    /// A customer with a random company name and zero balance
    pub fn customer() -> Customer {
        Customer::new(CompanyName().fake::<String>())
    }
}

/// Shipment fixtures
///
/// `credit()` is the reference shipment used across the suite:
///
/// | field | value |
/// |---|---|
/// | box | 50 × 40 × 25 cm (10 kg volumetric) |
/// | actual weight | 8 kg, so charged weight is 10 kg |
/// | items | 12 × 8.50 + 2 × 15.00 = 132.00 declared |
/// | billing | 50/kg + 10 e-form, grand total 560.00, credit |
pub struct ShipmentFixtures;

impl ShipmentFixtures {
    /// A random tracking number of the form `TRK-NNNNNNNN`
    pub fn tracking_number() -> String {
        format!("TRK-{}", (10_000_000..100_000_000).fake::<u32>())
    }

    pub fn credit(customer_id: CustomerId) -> Shipment {
        Shipment::new(customer_id, Self::tracking_number(), dec!(8))
            .with_box(ShipmentBox::new(dec!(50), dec!(40), dec!(25)))
            .with_item(ProductInvoiceItem::new("Cotton shirts", 12, dec!(8.50)))
            .with_item(ProductInvoiceItem::new("Leather belt", 2, dec!(15)))
            .with_billing_input(
                BillingInvoiceInput::per_kg(dec!(50), dec!(560), PaymentMethod::Credit)
                    .with_e_form_charges(dec!(10)),
            )
    }

    /// A flat-rate shipment paid in cash with no boxes or items
    pub fn cash(customer_id: CustomerId) -> Shipment {
        Shipment::new(customer_id, Self::tracking_number(), dec!(3))
            .with_billing_input(BillingInvoiceInput::flat(dec!(250), dec!(250), PaymentMethod::Cash))
    }

    /// A draft shipment with no billing input captured yet
    pub fn without_billing_input(customer_id: CustomerId) -> Shipment {
        Shipment::new(customer_id, Self::tracking_number(), dec!(2))
            .with_box(ShipmentBox::new(dec!(30), dec!(20), dec!(10)))
    }
}

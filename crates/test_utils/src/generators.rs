//! Property-Based Test Generators
//!
//! Proptest strategies producing valid billing inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::CustomerId;
use domain_billing::{BillingInvoiceInput, PaymentMethod, ProductInvoiceItem, Shipment, ShipmentBox};

/// Positive amounts in whole cents, from 0.01 to 10,000.00
pub fn positive_money_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Box edge lengths from 1.0 to 200.0 cm in millimetre steps
pub fn dimension_strategy() -> impl Strategy<Value = Decimal> {
    (10i64..=2_000i64).prop_map(|mm| Decimal::new(mm, 1))
}

/// Actual weights from 0.1 to 100.0 kg
pub fn weight_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=1_000i64).prop_map(|tenths| Decimal::new(tenths, 1))
}

pub fn shipment_box_strategy() -> impl Strategy<Value = ShipmentBox> {
    (dimension_strategy(), dimension_strategy(), dimension_strategy())
        .prop_map(|(l, w, h)| ShipmentBox::new(l, w, h))
}

pub fn product_item_strategy() -> impl Strategy<Value = ProductInvoiceItem> {
    ("[A-Za-z ]{3,20}", 0u32..50, positive_money_strategy())
        .prop_map(|(description, pieces, unit_value)| {
            ProductInvoiceItem::new(description, pieces, unit_value)
        })
}

pub fn payment_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Cash),
        Just(PaymentMethod::Credit),
        Just(PaymentMethod::BankTransfer),
        Just(PaymentMethod::Cheque),
        Just(PaymentMethod::Card),
        Just(PaymentMethod::Online),
    ]
}

/// A draft shipment with 0-4 boxes, 0-5 items and a flat billing input
pub fn shipment_strategy(customer_id: CustomerId) -> impl Strategy<Value = Shipment> {
    (
        weight_strategy(),
        prop::collection::vec(shipment_box_strategy(), 0..5),
        prop::collection::vec(product_item_strategy(), 0..6),
        positive_money_strategy(),
        payment_method_strategy(),
    )
        .prop_map(move |(weight, boxes, items, total, method)| {
            let mut shipment = Shipment::new(customer_id, crate::fixtures::ShipmentFixtures::tracking_number(), weight)
                .with_billing_input(BillingInvoiceInput::flat(total, total, method));
            shipment.boxes = boxes;
            shipment.items = items;
            shipment
        })
}

/// One side of a ledger posting: `(debit, credit)` with exactly one positive
pub fn posting_amounts_strategy() -> impl Strategy<Value = (Decimal, Decimal)> {
    (any::<bool>(), positive_money_strategy()).prop_map(|(is_debit, amount)| {
        if is_debit {
            (amount, Decimal::ZERO)
        } else {
            (Decimal::ZERO, amount)
        }
    })
}

#[cfg(test)]
mod proptests {
    use super::*;
    use domain_billing::{ChargeCalculator, VOLUMETRIC_DIVISOR};

    proptest! {
        #[test]
        fn generated_shipments_are_chargeable(shipment in shipment_strategy(CustomerId::new())) {
            prop_assert!(shipment.validate().is_ok());
            let charges = ChargeCalculator::for_shipment(&shipment).unwrap();

            prop_assert_eq!(charges.box_volumetric_weights.len(), shipment.boxes.len());
            for (shipment_box, weight) in shipment.boxes.iter().zip(&charges.box_volumetric_weights) {
                let exact = shipment_box.length_cm * shipment_box.width_cm * shipment_box.height_cm
                    / VOLUMETRIC_DIVISOR;
                prop_assert_eq!(*weight, exact.ceil());
                prop_assert!(*weight >= exact && *weight - exact < Decimal::ONE);
            }

            let volumetric: Decimal = charges.box_volumetric_weights.iter().copied().sum();
            prop_assert_eq!(charges.volumetric_weight_kg, volumetric);
            prop_assert_eq!(charges.charged_weight_kg, shipment.actual_weight_kg.max(volumetric));

            let declared: Decimal = shipment
                .items
                .iter()
                .map(|item| (Decimal::from(item.pieces) * item.unit_value).round_dp(2))
                .sum();
            prop_assert_eq!(charges.customs_value, declared);
        }

        #[test]
        fn posting_amounts_have_one_positive_side((debit, credit) in posting_amounts_strategy()) {
            prop_assert!(debit.is_zero() != credit.is_zero());
            prop_assert!(debit >= Decimal::ZERO && credit >= Decimal::ZERO);
        }
    }
}

//! Shipment charge calculation
//!
//! Pure functions: the same boxes, weight and items always produce the same
//! breakdown. Billing correctness depends on this being reproduced exactly.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{ensure_fits, ensure_money, ensure_positive, round_money, CoreError};

use crate::error::BillingError;
use crate::shipment::{ProductInvoiceItem, Shipment, ShipmentBox, WEIGHT_DIGITS};

/// Industry volumetric divisor (cm³ per kg)
pub const VOLUMETRIC_DIVISOR: Decimal = dec!(5000);

/// Result of a charge calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    /// Volumetric weight of each box, in input order
    pub box_volumetric_weights: Vec<Decimal>,
    pub volumetric_weight_kg: Decimal,
    pub actual_weight_kg: Decimal,
    /// `max(actual, volumetric)`
    pub charged_weight_kg: Decimal,
    /// `Σ round(pieces × unit value)`, equal to the sum of the declared-value lines
    pub customs_value: Decimal,
}

/// Computes volumetric weight, charged weight and declared value
pub struct ChargeCalculator;

impl ChargeCalculator {
    /// Volumetric weight of one box: `ceil(l × w × h / 5000)`
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if any dimension is zero, negative
    /// or larger than a stored dimension can be
    pub fn volumetric_weight(shipment_box: &ShipmentBox) -> Result<Decimal, BillingError> {
        shipment_box.validate()?;
        let length = ensure_positive("box length", shipment_box.length_cm)?;
        let width = ensure_positive("box width", shipment_box.width_cm)?;
        let height = ensure_positive("box height", shipment_box.height_cm)?;

        let volume = length
            .checked_mul(width)
            .and_then(|area| area.checked_mul(height))
            .ok_or_else(|| CoreError::out_of_range("box volume", shipment_box.id))?;
        let weight = volume
            .checked_div(VOLUMETRIC_DIVISOR)
            .ok_or_else(|| CoreError::out_of_range("volumetric weight", shipment_box.id))?;
        Ok(weight.ceil())
    }

    /// Rounded declared value of one item, as it appears on its invoice line
    pub fn declared_line_total(item: &ProductInvoiceItem) -> Result<Decimal, BillingError> {
        item.validate()?;
        let total = round_money(item.line_value()?);
        Ok(ensure_money("declared line value", total)?)
    }

    /// Declared value of a set of items, zero when there are none
    ///
    /// Each line is rounded before summing so the total always equals the
    /// sum of the declared-value invoice lines.
    pub fn customs_value(items: &[ProductInvoiceItem]) -> Result<Decimal, BillingError> {
        let mut total = Decimal::ZERO;
        for item in items {
            total = total
                .checked_add(Self::declared_line_total(item)?)
                .ok_or_else(|| CoreError::out_of_range("customs value", items.len()))?;
        }
        Ok(ensure_money("customs value", total)?)
    }

    /// Calculates the full charge breakdown
    ///
    /// # Arguments
    ///
    /// * `boxes` - Boxes in the shipment (may be empty)
    /// * `actual_weight_kg` - Scale weight of the shipment
    /// * `items` - Declared-value items
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if any dimension or the actual
    /// weight is non-positive, a declared unit value is negative, or a value
    /// does not fit its stored column
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let boxes = vec![ShipmentBox::new(dec!(100), dec!(50), dec!(30))];
    /// let breakdown = ChargeCalculator::calculate(&boxes, dec!(25), &[])?;
    /// assert_eq!(breakdown.charged_weight_kg, dec!(30));
    /// ```
    pub fn calculate(
        boxes: &[ShipmentBox],
        actual_weight_kg: Decimal,
        items: &[ProductInvoiceItem],
    ) -> Result<ChargeBreakdown, BillingError> {
        let (precision, scale) = WEIGHT_DIGITS;
        let actual_weight_kg = ensure_positive("actual weight", actual_weight_kg)?;
        ensure_fits("actual weight", actual_weight_kg, precision, scale)?;

        let box_volumetric_weights = boxes
            .iter()
            .map(Self::volumetric_weight)
            .collect::<Result<Vec<_>, _>>()?;
        let mut volumetric_weight_kg = Decimal::ZERO;
        for weight in &box_volumetric_weights {
            volumetric_weight_kg = volumetric_weight_kg
                .checked_add(*weight)
                .ok_or_else(|| CoreError::out_of_range("volumetric weight", boxes.len()))?;
        }
        ensure_fits("volumetric weight", volumetric_weight_kg, precision, scale)?;

        Ok(ChargeBreakdown {
            box_volumetric_weights,
            volumetric_weight_kg,
            actual_weight_kg,
            charged_weight_kg: actual_weight_kg.max(volumetric_weight_kg),
            customs_value: Self::customs_value(items)?,
        })
    }

    /// Convenience wrapper reading the inputs from a shipment
    pub fn for_shipment(shipment: &Shipment) -> Result<ChargeBreakdown, BillingError> {
        Self::calculate(&shipment.boxes, shipment.actual_weight_kg, &shipment.items)
    }
}

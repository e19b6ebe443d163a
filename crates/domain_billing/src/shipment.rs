//! Shipment inputs consumed by the invoice factory
//!
//! Shipments are created and advanced by the shipment-lifecycle owner. This
//! engine only moves a shipment from `Draft` to `Confirmed` and reads its
//! boxes, declared items and billing input once confirmed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ensure_fits, ensure_money, ensure_non_negative, BoxId, CoreError, CustomerId, ShipmentId};

use crate::error::BillingError;
use crate::payment::PaymentMethod;

/// Stored `(precision, scale)` of box dimensions in centimetres
pub const DIMENSION_DIGITS: (u32, u32) = (10, 2);

/// Stored `(precision, scale)` of weights in kilograms
pub const WEIGHT_DIGITS: (u32, u32) = (12, 3);

/// Stored `(precision, scale)` of per-kg freight rates
pub const RATE_DIGITS: (u32, u32) = (14, 4);

/// Shipment lifecycle status
///
/// ```text
/// Draft -> Confirmed -> InTransit -> Delivered
///   \-> Cancelled
/// ```
///
/// Only `Draft -> Confirmed` is owned by the billing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Draft,
    Confirmed,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Draft => "DRAFT",
            ShipmentStatus::Confirmed => "CONFIRMED",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ShipmentStatus::Draft),
            "CONFIRMED" => Ok(ShipmentStatus::Confirmed),
            "IN_TRANSIT" => Ok(ShipmentStatus::InTransit),
            "DELIVERED" => Ok(ShipmentStatus::Delivered),
            "CANCELLED" => Ok(ShipmentStatus::Cancelled),
            other => Err(BillingError::validation(format!("unknown shipment status '{}'", other))),
        }
    }
}

/// A physical box in a shipment. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentBox {
    pub id: BoxId,
    pub length_cm: Decimal,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
}

impl ShipmentBox {
    pub fn new(length_cm: Decimal, width_cm: Decimal, height_cm: Decimal) -> Self {
        Self {
            id: BoxId::new_v7(),
            length_cm,
            width_cm,
            height_cm,
        }
    }

    /// Checks every dimension is stored exactly
    pub fn validate(&self) -> Result<(), BillingError> {
        let (precision, scale) = DIMENSION_DIGITS;
        ensure_fits("box length", self.length_cm, precision, scale)?;
        ensure_fits("box width", self.width_cm, precision, scale)?;
        ensure_fits("box height", self.height_cm, precision, scale)?;
        Ok(())
    }
}

/// A declared-value line: pieces × unit value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInvoiceItem {
    pub description: String,
    pub pieces: u32,
    pub unit_value: Decimal,
}

impl ProductInvoiceItem {
    pub fn new(description: impl Into<String>, pieces: u32, unit_value: Decimal) -> Self {
        Self {
            description: description.into(),
            pieces,
            unit_value,
        }
    }

    /// Declared value of this line, `pieces × unit_value`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the product does not fit a decimal
    pub fn line_value(&self) -> Result<Decimal, BillingError> {
        Decimal::from(self.pieces)
            .checked_mul(self.unit_value)
            .ok_or_else(|| CoreError::out_of_range("declared line value", &self.description).into())
    }

    /// Checks the item fits its stored columns
    pub fn validate(&self) -> Result<(), BillingError> {
        if i32::try_from(self.pieces).is_err() {
            return Err(CoreError::out_of_range("pieces", self.pieces).into());
        }
        ensure_non_negative("declared unit value", self.unit_value)?;
        ensure_money("declared unit value", self.unit_value)?;
        Ok(())
    }
}

/// Rate and charge fields captured at booking time
///
/// `grand_total` is authoritative: the billing invoice always totals to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInvoiceInput {
    /// Per-kg freight rate; when absent the flat `total_rate` is billed
    pub rate_per_kg: Option<Decimal>,
    pub total_rate: Decimal,
    pub e_form_charges: Decimal,
    pub remote_area_charges: Decimal,
    pub box_charges: Decimal,
    pub grand_total: Decimal,
    pub payment_method: PaymentMethod,
}

impl BillingInvoiceInput {
    /// Creates an input billed at a flat rate with no surcharges
    pub fn flat(total_rate: Decimal, grand_total: Decimal, payment_method: PaymentMethod) -> Self {
        Self {
            rate_per_kg: None,
            total_rate,
            e_form_charges: Decimal::ZERO,
            remote_area_charges: Decimal::ZERO,
            box_charges: Decimal::ZERO,
            grand_total,
            payment_method,
        }
    }

    /// Creates an input billed per kilogram of charged weight
    pub fn per_kg(rate_per_kg: Decimal, grand_total: Decimal, payment_method: PaymentMethod) -> Self {
        Self {
            rate_per_kg: Some(rate_per_kg),
            ..Self::flat(Decimal::ZERO, grand_total, payment_method)
        }
    }

    pub fn with_e_form_charges(mut self, amount: Decimal) -> Self {
        self.e_form_charges = amount;
        self
    }

    pub fn with_remote_area_charges(mut self, amount: Decimal) -> Self {
        self.remote_area_charges = amount;
        self
    }

    pub fn with_box_charges(mut self, amount: Decimal) -> Self {
        self.box_charges = amount;
        self
    }

    /// Checks every monetary field is non-negative and stored exactly
    pub fn validate(&self) -> Result<(), BillingError> {
        if let Some(rate) = self.rate_per_kg {
            let (precision, scale) = RATE_DIGITS;
            ensure_non_negative("rate per kg", rate)?;
            ensure_fits("rate per kg", rate, precision, scale)?;
        }
        for (field, amount) in [
            ("total rate", self.total_rate),
            ("e-form charges", self.e_form_charges),
            ("remote area charges", self.remote_area_charges),
            ("box charges", self.box_charges),
            ("grand total", self.grand_total),
        ] {
            ensure_non_negative(field, amount)?;
            ensure_money(field, amount)?;
        }
        Ok(())
    }

    /// Applies a patch to this input
    ///
    /// Precedence: every `Some` field in the patch replaces the stored value;
    /// `None` keeps the stored value. `rate_per_kg` is doubly optional so a
    /// patch can clear it (`Some(None)`) and fall back to flat-rate billing.
    pub fn merge(self, patch: BillingInputPatch) -> Self {
        Self {
            rate_per_kg: patch.rate_per_kg.unwrap_or(self.rate_per_kg),
            total_rate: patch.total_rate.unwrap_or(self.total_rate),
            e_form_charges: patch.e_form_charges.unwrap_or(self.e_form_charges),
            remote_area_charges: patch.remote_area_charges.unwrap_or(self.remote_area_charges),
            box_charges: patch.box_charges.unwrap_or(self.box_charges),
            grand_total: patch.grand_total.unwrap_or(self.grand_total),
            payment_method: patch.payment_method.unwrap_or(self.payment_method),
        }
    }
}

/// Optional-field update for a [`BillingInvoiceInput`]. See [`BillingInvoiceInput::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingInputPatch {
    pub rate_per_kg: Option<Option<Decimal>>,
    pub total_rate: Option<Decimal>,
    pub e_form_charges: Option<Decimal>,
    pub remote_area_charges: Option<Decimal>,
    pub box_charges: Option<Decimal>,
    pub grand_total: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
}

impl BillingInputPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A shipment as seen by the billing engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub customer_id: CustomerId,
    pub tracking_number: String,
    pub actual_weight_kg: Decimal,
    /// Set by the invoice factory from the charge calculator
    pub charged_weight_kg: Option<Decimal>,
    /// Set by the invoice factory from the charge calculator
    pub customs_value: Option<Decimal>,
    pub status: ShipmentStatus,
    pub boxes: Vec<ShipmentBox>,
    pub items: Vec<ProductInvoiceItem>,
    pub billing_input: Option<BillingInvoiceInput>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Creates a new draft shipment
    pub fn new(
        customer_id: CustomerId,
        tracking_number: impl Into<String>,
        actual_weight_kg: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ShipmentId::new_v7(),
            customer_id,
            tracking_number: tracking_number.into(),
            actual_weight_kg,
            charged_weight_kg: None,
            customs_value: None,
            status: ShipmentStatus::Draft,
            boxes: Vec::new(),
            items: Vec::new(),
            billing_input: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_box(mut self, shipment_box: ShipmentBox) -> Self {
        self.boxes.push(shipment_box);
        self
    }

    pub fn with_item(mut self, item: ProductInvoiceItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_billing_input(mut self, input: BillingInvoiceInput) -> Self {
        self.billing_input = Some(input);
        self
    }

    /// Fails with `InvalidState` naming the actual status unless it equals `expected`
    pub fn ensure_status(&self, expected: ShipmentStatus) -> Result<(), BillingError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(BillingError::invalid_state("Shipment", self.id, expected, self.status))
        }
    }

    /// Checks weights, boxes, items and billing input fit their stored columns
    ///
    /// Stores run this before persisting a shipment so that nothing is
    /// rounded on the way in.
    pub fn validate(&self) -> Result<(), BillingError> {
        let (precision, scale) = WEIGHT_DIGITS;
        ensure_fits("actual weight", self.actual_weight_kg, precision, scale)?;
        for shipment_box in &self.boxes {
            shipment_box.validate()?;
        }
        for item in &self.items {
            item.validate()?;
        }
        if let Some(input) = &self.billing_input {
            input.validate()?;
        }
        Ok(())
    }

    /// Returns the billing input or a validation error if none was captured
    pub fn require_billing_input(&self) -> Result<&BillingInvoiceInput, BillingError> {
        self.billing_input.as_ref().ok_or_else(|| {
            BillingError::validation(format!("shipment {} has no billing input", self.id))
        })
    }
}

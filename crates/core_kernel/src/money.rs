//! Decimal money helpers
//!
//! Amounts are carried as plain `rust_decimal::Decimal` values throughout the
//! billing engine. This module pins the rounding policy and the input checks
//! that every monetary field goes through before it reaches the ledger.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::CoreError;

/// Number of decimal places stored for every monetary amount
pub const MONEY_SCALE: u32 = 2;

/// Total digits stored for a monetary amount, `NUMERIC(14, 2)`
pub const MONEY_PRECISION: u32 = 14;

/// Exclusive upper bound on the magnitude of any stored amount
pub const MONEY_LIMIT: Decimal = dec!(1000000000000);

/// Largest difference between a computed and an authoritative total that is
/// treated as equal
pub const RECONCILIATION_TOLERANCE: Decimal = dec!(0.01);

/// Rounds an amount to [`MONEY_SCALE`] places, midpoint away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Checks that `value` is strictly greater than zero
///
/// # Arguments
///
/// * `field` - Name of the field, used in the error message
/// * `value` - The value to check
///
/// # Errors
///
/// Returns `CoreError::Validation` naming the field when the value is zero or negative
pub fn ensure_positive(field: &str, value: Decimal) -> Result<Decimal, CoreError> {
    if value > Decimal::ZERO {
        Ok(value)
    } else {
        Err(CoreError::validation(format!(
            "{} must be greater than zero, got {}",
            field, value
        )))
    }
}

/// Checks that `value` is zero or greater
///
/// # Errors
///
/// Returns `CoreError::Validation` naming the field when the value is negative
pub fn ensure_non_negative(field: &str, value: Decimal) -> Result<Decimal, CoreError> {
    if value.is_sign_negative() && !value.is_zero() {
        Err(CoreError::validation(format!(
            "{} must not be negative, got {}",
            field, value
        )))
    } else {
        Ok(value)
    }
}

/// Checks that `value` fits a `NUMERIC(precision, scale)` column without rounding
///
/// Trailing zeros do not count towards the scale, so `10.500` fits scale 2.
///
/// # Errors
///
/// Returns `CoreError::Validation` naming the field when the value has more
/// than `scale` decimal places or more than `precision - scale` integer digits
pub fn ensure_fits(field: &str, value: Decimal, precision: u32, scale: u32) -> Result<Decimal, CoreError> {
    if value.normalize().scale() > scale {
        return Err(CoreError::validation(format!(
            "{} allows at most {} decimal places, got {}",
            field, scale, value
        )));
    }

    let integer_digits = precision.saturating_sub(scale).min(28);
    let limit = Decimal::from_i128_with_scale(10i128.pow(integer_digits), 0);
    if value.abs() >= limit {
        return Err(CoreError::out_of_range(field, value));
    }
    Ok(value)
}

/// Checks that a monetary amount fits the stored money columns
///
/// # Errors
///
/// Returns `CoreError::Validation` when the amount has more than
/// [`MONEY_SCALE`] decimal places or reaches [`MONEY_LIMIT`]
pub fn ensure_money(field: &str, value: Decimal) -> Result<Decimal, CoreError> {
    ensure_fits(field, value, MONEY_PRECISION, MONEY_SCALE)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn rounding_is_idempotent(minor in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..6u32) {
            let amount = Decimal::new(minor, scale);
            let once = round_money(amount);
            prop_assert_eq!(round_money(once), once);
            prop_assert!((once - amount).abs() <= dec!(0.005));
        }
    }
}

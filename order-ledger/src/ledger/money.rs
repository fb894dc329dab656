//! Rounding and proration helpers for ledger arithmetic
//!
//! Amounts flow through intermediate steps at full precision. Ratios used
//! for proration are fixed at [`CALCULATION_SCALE`] digits; only aggregates
//! are brought to the currency scale.

use rust_decimal::prelude::*;
use shared::money::Money;

/// Currency scale (2 decimal places)
pub const DECIMAL_PLACES: u32 = 2;

/// Internal scale for ratios and per-unit amounts
pub const CALCULATION_SCALE: u32 = 10;

/// Round to currency scale, half-up (away from zero on the midpoint)
#[inline]
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// `part / whole` at the internal scale, half-up; zero when `whole` is zero
pub fn ratio(part: u32, whole: u32) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) / Decimal::from(whole))
        .round_dp_with_strategy(CALCULATION_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Quantity-weighted share of `amount`, left unrounded for later aggregation
pub fn prorate(amount: Money, part: u32, whole: u32) -> Money {
    amount * ratio(part, whole)
}

/// Per-unit share of `amount` over `quantity`, half-even at the internal
/// scale and then at currency scale
pub fn per_unit(amount: Money, quantity: u32) -> Money {
    if quantity == 0 {
        return Money::zero(amount.currency());
    }
    let unit = (amount.amount() / Decimal::from(quantity))
        .round_dp_with_strategy(CALCULATION_SCALE, RoundingStrategy::MidpointNearestEven)
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven);
    Money::new(unit, amount.currency())
}

/// Sum at full precision, then round the aggregate half-up
pub fn sum_rounded<I>(currency: shared::money::Currency, values: I) -> Money
where
    I: IntoIterator<Item = Money>,
{
    let total = Money::sum(currency, values);
    Money::new(round_half_up(total.amount()), currency)
}

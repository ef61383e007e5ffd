use rust_decimal::{Decimal, RoundingStrategy};

/// All monetary amounts are exact decimals, persisted already rounded to cents.
pub type Money = Decimal;

/// Round to two decimal places, half away from zero.
///
/// Apply once, to the final value of a computation. Rounding intermediate
/// values lets cent errors accumulate across line items.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `round2(amount * rate)`
pub fn apply_rate(amount: Decimal, rate: Decimal) -> Decimal {
    round2(amount * rate)
}

/// True when the value carries no more than two decimal places.
pub fn is_cents(value: Decimal) -> bool {
    value == round2(value)
}

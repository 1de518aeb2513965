//! Decimal arithmetic utilities for price and volume calculations.

use rust_decimal::Decimal;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Price step to divide by when converting price moves into points.
///
/// Unknown or non-positive steps fall back to 1.
pub fn effective_step(price_step: Decimal) -> Decimal {
    if price_step > Decimal::ZERO {
        price_step
    } else {
        Decimal::ONE
    }
}

/// Midpoint of a high/low range.
pub fn midpoint(high: Decimal, low: Decimal) -> Decimal {
    (high + low) / Decimal::TWO
}

/// Sum `items` without panicking on overflow.
pub fn checked_sum<I>(items: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    items
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
}

/// Convert a sample count into a decimal.
pub fn from_count(n: usize) -> Decimal {
    Decimal::from(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(round_down_to_lot(dec!(1.567), Decimal::ZERO), dec!(1.567));
    }

    #[test]
    fn test_effective_step() {
        assert_eq!(effective_step(dec!(0.0001)), dec!(0.0001));
        assert_eq!(effective_step(Decimal::ZERO), Decimal::ONE);
        assert_eq!(effective_step(dec!(-1)), Decimal::ONE);
    }

    #[test]
    fn test_midpoint() {
        assert_eq!(midpoint(dec!(1.2), dec!(1.0)), dec!(1.1));
    }

    #[test]
    fn test_checked_sum_overflow() {
        assert_eq!(checked_sum(vec![dec!(1), dec!(2)]), Some(dec!(3)));
        assert_eq!(checked_sum(vec![Decimal::MAX, Decimal::MAX]), None);
    }
}

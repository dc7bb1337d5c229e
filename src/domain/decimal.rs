//! Lossless money/point-value type backed by rust_decimal.
//!
//! Amounts are persisted as canonical strings and summed in Rust, never in SQL.

use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Number of fractional digits kept for monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Lossless decimal for money and PV arithmetic.
///
/// Serializes to a JSON string so clients never see float drift; accepts
/// either strings or numbers on input.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Format without exponent notation and without trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Round to cents, midpoint away from zero.
    pub fn round_money(&self) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// `self * percentage / 100`, unrounded.
    pub fn percent(&self, percentage: Decimal) -> Self {
        Decimal(self.0 * percentage.0 / RustDecimal::ONE_HUNDRED)
    }

    /// `self * other`, or None on overflow.
    pub fn checked_mul(&self, other: Decimal) -> Option<Self> {
        self.0.checked_mul(other.0).map(Decimal)
    }

    /// [`percent`](Self::percent), or None on overflow.
    pub fn checked_percent(&self, percentage: Decimal) -> Option<Self> {
        self.0
            .checked_mul(percentage.0)
            .and_then(|v| v.checked_div(RustDecimal::ONE_HUNDRED))
            .map(Decimal)
    }

    /// `self / other` clamped to `[0, 1]`; zero when `other` is not positive.
    pub fn ratio_capped(&self, other: Decimal) -> Self {
        if !other.is_positive() || self.is_negative() {
            return Decimal::zero();
        }
        let ratio = self.0 / other.0;
        Decimal(ratio.min(RustDecimal::ONE))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

impl<'a> Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_canonical_string_drops_trailing_zeros() {
        assert_eq!(d("100.00").to_canonical_string(), "100");
        assert_eq!(d("12.50").to_canonical_string(), "12.5");
        assert!(!d("0.0001").to_canonical_string().contains('e'));
    }

    #[test]
    fn test_round_money_midpoint_away_from_zero() {
        assert_eq!(d("1.005").round_money(), d("1.01"));
        assert_eq!(d("1.004").round_money(), d("1"));
        assert_eq!(d("-1.005").round_money(), d("-1.01"));
    }

    #[test]
    fn test_percent() {
        assert_eq!(d("1000").percent(d("10")), d("100"));
        assert_eq!(d("1000").percent(d("2.5")), d("25"));
        assert_eq!(d("1000").checked_percent(d("2.5")), Some(d("25")));
        let huge = Decimal::from(RustDecimal::MAX);
        assert_eq!(huge.checked_mul(d("2")), None);
        assert_eq!(huge.checked_percent(d("200")), None);
        assert_eq!(d("1.5").checked_mul(d("4")), Some(d("6")));
    }

    #[test]
    fn test_ratio_capped() {
        assert_eq!(d("50").ratio_capped(d("100")), d("0.5"));
        assert_eq!(d("500").ratio_capped(d("100")), Decimal::one());
        assert_eq!(d("5").ratio_capped(Decimal::zero()), Decimal::zero());
        assert_eq!(d("-5").ratio_capped(d("10")), Decimal::zero());
    }

    #[test]
    fn test_sum() {
        let values = vec![d("1.10"), d("2.20"), d("3.30")];
        let total: Decimal = values.iter().sum();
        assert_eq!(total, d("6.6"));
    }

    #[test]
    fn test_json_serializes_as_string() {
        let json = serde_json::to_value(d("123.45")).unwrap();
        assert_eq!(json, serde_json::json!("123.45"));
        let back: Decimal = serde_json::from_value(json).unwrap();
        assert_eq!(back, d("123.45"));
    }
}

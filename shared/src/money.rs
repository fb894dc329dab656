//! Money type: a fixed-point decimal amount tagged with a currency
//!
//! Amounts are kept at full `Decimal` precision while they flow through
//! intermediate arithmetic; [`Money::rounded`] brings them to the currency
//! scale (2 decimal places, half away from zero).
//!
//! Combining two values of different currencies with the operators
//! (`+`, `-`, `+=`, `-=`) is a programming error and panics. Callers that
//! handle amounts coming from outside the ledger use [`Money::try_add`] /
//! [`Money::try_sub`] instead.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use thiserror::Error;

/// Currency scale used when rounding to a payable amount
pub const CURRENCY_SCALE: u32 = 2;

/// ISO-4217 style three-letter currency code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");
    pub const GBP: Currency = Currency(*b"GBP");
    pub const CAD: Currency = Currency(*b"CAD");

    /// Parse a currency code; accepts exactly three ASCII letters
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        let mut buf = [0u8; 3];
        for (dst, src) in buf.iter_mut().zip(bytes) {
            *dst = src.to_ascii_uppercase();
        }
        Ok(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        // Only constructed from ASCII letters
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Currency({})", self.as_str())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

/// Money errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),
}

/// A decimal amount in a specific currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    #[inline]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    #[inline]
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Round to the currency scale, half away from zero
    pub fn rounded(&self) -> Self {
        Self::new(
            self.amount
                .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero),
            self.currency,
        )
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Clamp negative amounts to zero
    pub fn max_zero(self) -> Self {
        if self.is_negative() {
            Self::zero(self.currency)
        } else {
            self
        }
    }

    pub fn try_add(self, other: Money) -> Result<Money, MoneyError> {
        self.check_currency(&other)?;
        Ok(Self::new(self.amount + other.amount, self.currency))
    }

    pub fn try_sub(self, other: Money) -> Result<Money, MoneyError> {
        self.check_currency(&other)?;
        Ok(Self::new(self.amount - other.amount, self.currency))
    }

    /// Sum an iterator of money values; an empty iterator yields zero in `currency`
    pub fn sum<I>(currency: Currency, values: I) -> Money
    where
        I: IntoIterator<Item = Money>,
    {
        values
            .into_iter()
            .fold(Money::zero(currency), |acc, value| acc + value)
    }

    fn check_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    fn expect_same_currency(&self, other: &Money, op: &str) {
        assert!(
            self.currency == other.currency,
            "cannot {} {} and {}",
            op,
            self.currency,
            other.currency
        );
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.rounded().amount, self.currency)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        self.expect_same_currency(&rhs, "add");
        Money::new(self.amount + rhs.amount, self.currency)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        self.expect_same_currency(&rhs, "subtract");
        Money::new(self.amount - rhs.amount, self.currency)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        *self = *self - rhs;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money::new(-self.amount, self.currency)
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;

    fn mul(self, rhs: Decimal) -> Money {
        Money::new(self.amount * rhs, self.currency)
    }
}

impl PartialOrd for Money {
    /// Values of different currencies are unordered
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(s: &str) -> Money {
        Money::new(s.parse().unwrap(), Currency::USD)
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("usd").unwrap(), Currency::USD);
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("U$D").is_err());
        assert_eq!(Currency::EUR.to_string(), "EUR");
    }

    #[test]
    fn test_add_sub_same_currency() {
        let total = usd("10.10") + usd("0.20") - usd("0.05");
        assert_eq!(total, usd("10.25"));
    }

    #[test]
    #[should_panic(expected = "cannot add USD and EUR")]
    fn test_add_mixed_currency_panics() {
        let _ = usd("1.00") + Money::new(Decimal::ONE, Currency::EUR);
    }

    #[test]
    fn test_try_add_mixed_currency_errors() {
        let err = usd("1.00")
            .try_add(Money::new(Decimal::ONE, Currency::EUR))
            .unwrap_err();
        assert_eq!(
            err,
            MoneyError::CurrencyMismatch {
                left: Currency::USD,
                right: Currency::EUR
            }
        );
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(usd("1.005").rounded(), usd("1.01"));
        assert_eq!(usd("-1.005").rounded(), usd("-1.01"));
        assert_eq!(usd("1.004").rounded(), usd("1.00"));
    }

    #[test]
    fn test_max_zero() {
        assert_eq!(usd("-3.00").max_zero(), usd("0"));
        assert_eq!(usd("3.00").max_zero(), usd("3.00"));
    }

    #[test]
    fn test_sum_empty_is_zero() {
        assert!(Money::sum(Currency::USD, Vec::new()).is_zero());
        assert_eq!(
            Money::sum(Currency::USD, vec![usd("1.10"), usd("2.20")]),
            usd("3.30")
        );
    }

    #[test]
    fn test_ordering_requires_same_currency() {
        assert!(usd("2") > usd("1"));
        assert_eq!(
            usd("1").partial_cmp(&Money::new(Decimal::ONE, Currency::EUR)),
            None
        );
    }

    #[test]
    fn test_serde_uses_string_currency() {
        let json = serde_json::to_value(usd("12.50")).unwrap();
        assert_eq!(json["currency"], "USD");
        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back, usd("12.50"));
    }
}

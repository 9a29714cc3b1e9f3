use crate::error::LedgerError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of minor-unit digits of the ledger currency (paise).
pub const MINOR_UNITS: u32 = 2;

/// Rounds to the currency's minor unit, half-up (midpoint away from zero).
pub fn round_minor(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MINOR_UNITS, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns `percent` % of `base`, rounded to the minor unit.
pub fn percent_of(base: Decimal, percent: Decimal) -> Decimal {
    round_minor(base * percent / Decimal::ONE_HUNDRED)
}

/// A wallet balance. Never negative once persisted.
///
/// Wraps `rust_decimal::Decimal` so that balances and transaction amounts
/// cannot be mixed up by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(pub Decimal);

/// A strictly positive monetary amount carried by orders, requests and entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, LedgerError> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if value.scale() > MINOR_UNITS && round_minor(value) != value {
            return Err(LedgerError::ValidationError(format!(
                "Amount {value} has more than {MINOR_UNITS} decimal places"
            )));
        }
        Ok(Self(value.normalize()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Applies a signed delta, refusing to go below zero.
    pub fn checked_apply(self, delta: Decimal) -> Option<Balance> {
        let next = self.0 + delta;
        (next >= Decimal::ZERO).then_some(Balance(next))
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(Amount::new(dec!(10.50)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(1.005)),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_round_minor_half_up() {
        assert_eq!(round_minor(dec!(1.005)), dec!(1.01));
        assert_eq!(round_minor(dec!(1.004)), dec!(1.00));
        assert_eq!(round_minor(dec!(2.675)), dec!(2.68));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec!(100), dec!(2)), dec!(2.00));
        assert_eq!(percent_of(dec!(99.99), dec!(18)), dec!(18.00));
        assert_eq!(percent_of(dec!(10.25), dec!(2)), dec!(0.21));
    }

    #[test]
    fn test_balance_checked_apply() {
        let b = Balance::new(dec!(10));
        assert_eq!(b.checked_apply(dec!(-10)), Some(Balance::ZERO));
        assert_eq!(b.checked_apply(dec!(-10.01)), None);
        assert_eq!(b.checked_apply(dec!(5)), Some(Balance::new(dec!(15))));
    }

    #[test]
    fn test_amount_serde_rejects_negative() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), dec!(12.5));
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }
}

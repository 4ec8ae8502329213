//! Fixed-point monetary amounts in minor currency units
//!
//! All matching arithmetic runs on [`Amount`], a signed integer count of
//! minor units (cents, centimes...). Decimal values only appear at the
//! storage adapter boundary, where [`Amount::from_decimal`] and
//! [`Amount::to_decimal`] perform the conversion.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::types::{ReconciliationError, ReconciliationResult};

/// Largest supported number of decimal places for a currency
pub const MAX_MINOR_DIGITS: u32 = 18;

/// Largest debit or credit a single line may carry, in minor units
///
/// Keeps every sum the engine builds far from the `i64` bounds.
pub const MAX_LINE_MINOR_UNITS: i64 = 1_000_000_000_000_000;

/// Signed amount expressed in minor currency units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Create an amount from a count of minor units
    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    /// Number of minor units
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    /// Convert a decimal value coming from storage
    ///
    /// Fails when the value carries precision below one minor unit or does
    /// not fit in 64 bits once scaled.
    pub fn from_decimal(value: &BigDecimal, minor_digits: u32) -> ReconciliationResult<Self> {
        if minor_digits > MAX_MINOR_DIGITS {
            return Err(ReconciliationError::InvalidAmount(format!(
                "{} minor digits is not supported",
                minor_digits
            )));
        }

        let scaled = value * BigDecimal::from(10i64.pow(minor_digits));
        if !scaled.is_integer() {
            return Err(ReconciliationError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value, minor_digits
            )));
        }

        scaled
            .to_i64()
            .map(Self)
            .filter(Amount::is_within_line_limit)
            .ok_or_else(|| {
                ReconciliationError::InvalidAmount(format!("{} is out of range", value))
            })
    }

    /// Convert back to a decimal value for storage
    pub fn to_decimal(&self, minor_digits: u32) -> BigDecimal {
        BigDecimal::new(BigInt::from(self.0), i64::from(minor_digits))
    }

    /// Whether the magnitude fits on a single line
    pub fn is_within_line_limit(&self) -> bool {
        self.0.unsigned_abs() <= MAX_LINE_MINOR_UNITS.unsigned_abs()
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn abs(&self) -> Self {
        Self(self.0.saturating_abs())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Debit side of a signed value
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Credit side of a signed value
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Amount {
    fn from(minor_units: i64) -> Self {
        Self(minor_units)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

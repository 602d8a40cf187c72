//! Money in minor currency units.

use serde::{Deserialize, Serialize};

/// Money amount in minor units (cents, paise) to avoid floating point issues.
///
/// The engine runs in a single store currency, so the currency code lives in
/// the checkout settings rather than on every amount.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Creates a money amount from minor units.
    pub const fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Creates a money amount from whole major units.
    pub const fn from_major(major: i64) -> Self {
        Self { minor: major * 100 }
    }

    /// Returns zero money.
    pub const fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Returns the amount in minor units.
    pub const fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.minor < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            minor: self.minor * i64::from(quantity),
        }
    }

    /// Returns `percent`% of this amount, truncated towards zero.
    pub fn percent(&self, percent: i64) -> Money {
        Money {
            minor: self.minor * percent / 100,
        }
    }

    /// Returns `bps` basis points of this amount, truncated towards zero.
    pub fn basis_points(&self, bps: u32) -> Money {
        Money {
            minor: self.minor * i64::from(bps) / 10_000,
        }
    }

    /// Subtracts `other`, flooring the result at zero.
    pub fn saturating_sub(&self, other: Money) -> Money {
        Money {
            minor: (self.minor - other.minor).max(0),
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            minor: self.minor + rhs.minor,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            minor: self.minor - rhs.minor,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.minor += rhs.minor;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

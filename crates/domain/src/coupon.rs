//! Coupon rules: validity window, minimum spend and discount arithmetic.
//!
//! Usage limits are not checked here. They are claimed inside the order
//! commit so that checking and recording a usage cannot race.

use chrono::{DateTime, Utc};
use common::CouponId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Money;
use crate::error::ParseEnumError;

/// How a coupon's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is an amount in minor units.
    Flat,
    /// `value` is a whole percentage of the subtotal.
    Percentage,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Flat => "flat",
            DiscountKind::Percentage => "percentage",
        }
    }
}

impl std::fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DiscountKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(DiscountKind::Flat),
            "percentage" => Ok(DiscountKind::Percentage),
            other => Err(ParseEnumError::new("discount kind", other)),
        }
    }
}

/// A named, time-bounded discount rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub name: String,
    pub kind: DiscountKind,
    /// Flat amount in minor units, or a percentage.
    pub value: i64,
    /// Smallest subtotal the coupon applies to.
    pub minimum_spent: Money,
    pub valid_from: DateTime<Utc>,
    pub valid_till: DateTime<Utc>,
    /// How many orders a single customer may place with this coupon.
    pub per_person_limit: u32,
    /// How many orders may use this coupon in total, if bounded.
    pub usage_limit: Option<u32>,
}

/// Reasons a coupon cannot be applied to a subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("Coupon '{name}' is not valid until {valid_from}")]
    NotYetValid {
        name: String,
        valid_from: DateTime<Utc>,
    },

    #[error("Coupon '{name}' expired at {valid_till}")]
    Expired {
        name: String,
        valid_till: DateTime<Utc>,
    },

    #[error("Coupon '{name}' requires a minimum spend of {minimum}, order subtotal is {subtotal}")]
    MinimumNotMet {
        name: String,
        minimum: Money,
        subtotal: Money,
    },
}

impl Coupon {
    /// Checks the validity window against the time of application.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), CouponError> {
        if now < self.valid_from {
            return Err(CouponError::NotYetValid {
                name: self.name.clone(),
                valid_from: self.valid_from,
            });
        }
        if now > self.valid_till {
            return Err(CouponError::Expired {
                name: self.name.clone(),
                valid_till: self.valid_till,
            });
        }
        Ok(())
    }

    /// Returns the discount for `subtotal`, never more than the subtotal itself.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let raw = match self.kind {
            DiscountKind::Flat => Money::from_minor(self.value),
            DiscountKind::Percentage => subtotal.percent(self.value),
        };
        raw.max(Money::zero()).min(subtotal.max(Money::zero()))
    }

    /// Validates the coupon for `subtotal` at `now` and returns the discount.
    pub fn apply(&self, subtotal: Money, now: DateTime<Utc>) -> Result<Money, CouponError> {
        self.check_window(now)?;
        if subtotal < self.minimum_spent {
            return Err(CouponError::MinimumNotMet {
                name: self.name.clone(),
                minimum: self.minimum_spent,
                subtotal,
            });
        }
        Ok(self.discount_for(subtotal))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn coupon(kind: DiscountKind, value: i64, minimum: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: CouponId::new(),
            name: "SAVE".to_string(),
            kind,
            value,
            minimum_spent: Money::from_minor(minimum),
            valid_from: now - Duration::days(1),
            valid_till: now + Duration::days(1),
            per_person_limit: 1,
            usage_limit: None,
        }
    }

    #[test]
    fn minimum_spend_is_inclusive() {
        let c = coupon(DiscountKind::Flat, 50, 500);
        let now = Utc::now();

        assert!(matches!(
            c.apply(Money::from_minor(499), now),
            Err(CouponError::MinimumNotMet { .. })
        ));
        assert_eq!(c.apply(Money::from_minor(500), now).unwrap().minor(), 50);
    }

    #[test]
    fn flat_discount_never_exceeds_subtotal() {
        let c = coupon(DiscountKind::Flat, 50, 0);
        let discount = c.apply(Money::from_minor(10), Utc::now()).unwrap();
        assert_eq!(discount.minor(), 10);
        assert_eq!(Money::from_minor(10).saturating_sub(discount), Money::zero());
    }

    #[test]
    fn percentage_discount() {
        let c = coupon(DiscountKind::Percentage, 15, 0);
        let discount = c.apply(Money::from_minor(2000), Utc::now()).unwrap();
        assert_eq!(discount.minor(), 300);
    }

    #[test]
    fn window_is_checked_at_application_time() {
        let c = coupon(DiscountKind::Flat, 50, 0);

        let before = c.valid_from - Duration::seconds(1);
        assert!(matches!(
            c.apply(Money::from_minor(100), before),
            Err(CouponError::NotYetValid { .. })
        ));

        let after = c.valid_till + Duration::seconds(1);
        assert!(matches!(
            c.apply(Money::from_minor(100), after),
            Err(CouponError::Expired { .. })
        ));
    }

    #[test]
    fn discount_kind_round_trips_through_str() {
        for kind in [DiscountKind::Flat, DiscountKind::Percentage] {
            assert_eq!(kind.as_str().parse::<DiscountKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<DiscountKind>().is_err());
    }
}

//! Checkout totals.

use serde::{Deserialize, Serialize};

use crate::{Money, OrderItem};

/// The monetary breakdown of a checkout, snapshotted onto the order.
///
/// `total == subtotal - discount + shipping + tax` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckoutTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
}

impl CheckoutTotals {
    /// Computes totals from their components.
    ///
    /// The discount is capped at the subtotal so the discounted amount never
    /// goes below zero. Tax is charged on the discounted amount.
    pub fn compute(subtotal: Money, discount: Money, shipping: Money, tax_rate_bps: u32) -> Self {
        let discount = discount.max(Money::zero()).min(subtotal);
        let net = subtotal.saturating_sub(discount);
        let tax = net.basis_points(tax_rate_bps);
        Self {
            subtotal,
            discount,
            shipping,
            tax,
            total: net + shipping + tax,
        }
    }

    /// Amount owed for the goods after the discount, before shipping and tax.
    pub fn net_amount(&self) -> Money {
        self.subtotal.saturating_sub(self.discount)
    }

    /// Returns the total implied by the components.
    pub fn expected_total(&self) -> Money {
        self.subtotal - self.discount + self.shipping + self.tax
    }

    /// Returns true if `total` matches its components.
    pub fn is_consistent(&self) -> bool {
        self.total == self.expected_total()
    }
}

/// Sums `discounted_price * quantity` over the line items.
pub fn subtotal_of(items: &[OrderItem]) -> Money {
    items.iter().map(OrderItem::line_total).sum()
}

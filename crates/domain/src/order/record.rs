//! The order record and its line items.

use chrono::{DateTime, Utc};
use common::{AddressId, CouponId, CustomerId, OrderId, ProductId, VariationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Product, Variation};
use crate::pricing::{CheckoutTotals, subtotal_of};
use crate::{CartLineTarget, Money};

use super::{OrderError, OrderStatus, PaymentMethod, PaymentStatus};

/// Human-readable, unique order number, e.g. `ORD-20260114-3F9A1C2B`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Generates a new order number stamped with the order date.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "ORD-{}-{}",
            now.format("%Y%m%d"),
            suffix[..8].to_uppercase()
        ))
    }

    /// Wraps an existing order number.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A line item with its price snapshot.
///
/// If `variation_id` is set, `product_id` is the variation's parent product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub name: String,
    pub quantity: u32,
    /// Unit price charged, snapshotted at order time.
    pub discounted_price: Money,
    /// Unit list price, snapshotted at order time.
    pub actual_price: Money,
}

impl OrderItem {
    /// Prices `quantity` units of a base product.
    pub fn for_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            variation_id: None,
            name: product.name.clone(),
            quantity,
            discounted_price: product.discounted_price,
            actual_price: product.actual_price,
        }
    }

    /// Prices `quantity` units of a variation. The product id is taken from
    /// the variation so the two can never disagree.
    pub fn for_variation(variation: &Variation, quantity: u32) -> Self {
        Self {
            product_id: variation.product_id,
            variation_id: Some(variation.id),
            name: variation.name.clone(),
            quantity,
            discounted_price: variation.discounted_price,
            actual_price: variation.actual_price,
        }
    }

    /// The stock counter this line draws from.
    pub fn stock_target(&self) -> CartLineTarget {
        match self.variation_id {
            Some(variation_id) => CartLineTarget::Variation(variation_id),
            None => CartLineTarget::Product(self.product_id),
        }
    }

    /// Returns `discounted_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.discounted_price.multiply(self.quantity)
    }
}

/// Everything needed to place an order once pricing and payment are settled.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub totals: CheckoutTotals,
    pub payment_method: PaymentMethod,
    pub coupon_id: Option<CouponId>,
    pub payment_reference: Option<String>,
    pub shipping_address_id: AddressId,
}

/// A committed purchase with snapshotted pricing and a status lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub shipping_cost: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub coupon_id: Option<CouponId>,
    pub payment_reference: Option<String>,
    pub shipping_address_id: AddressId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a confirmed order from a settled checkout.
    ///
    /// Fails if there are no items, a quantity is zero, or the totals do not
    /// match the line items.
    pub fn place(cmd: PlaceOrder, now: DateTime<Utc>) -> Result<Self, OrderError> {
        if cmd.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = cmd.items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        let subtotal = subtotal_of(&cmd.items);
        if subtotal != cmd.totals.subtotal || !cmd.totals.is_consistent() {
            let expected = subtotal - cmd.totals.discount + cmd.totals.shipping + cmd.totals.tax;
            return Err(OrderError::TotalMismatch {
                expected,
                actual: cmd.totals.total,
            });
        }

        Ok(Self {
            id: OrderId::new(),
            order_number: OrderNumber::generate(now),
            customer_id: cmd.customer_id,
            status: OrderStatus::Confirmed,
            payment_status: cmd.payment_method.initial_payment_status(),
            payment_method: cmd.payment_method,
            items: cmd.items,
            subtotal,
            discount_amount: cmd.totals.discount,
            shipping_cost: cmd.totals.shipping,
            tax_amount: cmd.totals.tax,
            total_amount: cmd.totals.total,
            coupon_id: cmd.coupon_id,
            payment_reference: cmd.payment_reference,
            shipping_address_id: cmd.shipping_address_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns the total implied by the snapshotted items and amounts.
    pub fn expected_total(&self) -> Money {
        subtotal_of(&self.items) - self.discount_amount + self.shipping_cost + self.tax_amount
    }

    /// Returns the total number of units across all items.
    pub fn total_quantity(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |total, item| total.saturating_add(item.quantity))
    }

    /// Moves the order to `Cancelled`, returning the status it had before.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidTransition {
                current: self.status,
                action: "cancel",
            });
        }
        let previous = self.status;
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(previous)
    }
}

//! Pricing and coupon resolution.
//!
//! Everything here is read-only. Stock is checked against the catalog's
//! current counters so obviously unfillable checkouts fail early, but the
//! authoritative check is the conditional decrement in the order commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{CustomerId, ProductId, VariationId};
use domain::{CartLine, CartLineTarget, Coupon, Money, OrderItem, subtotal_of};
use serde::{Deserialize, Serialize};
use store::{CartStore, Catalog, CouponStore};

use crate::error::{EngineError, Result};
use crate::settings::MissingLinePolicy;

/// What the customer is buying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selection {
    /// A quantity of one product, optionally of one of its variations.
    SingleProduct {
        product_id: ProductId,
        #[serde(default)]
        variation_id: Option<VariationId>,
        quantity: u32,
    },
    /// Everything in the customer's cart.
    Cart,
}

impl Selection {
    /// Returns the requested quantity if it is invalid.
    pub(crate) fn invalid_quantity(&self) -> Option<u32> {
        match self {
            Selection::SingleProduct { quantity, .. } if *quantity < 1 => Some(*quantity),
            _ => None,
        }
    }
}

/// Priced line items of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedSelection {
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    /// Whether the items came from the cart, which is then cleared on commit.
    pub from_cart: bool,
}

/// A coupon that passed its window and minimum-spend checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCoupon {
    pub coupon: Coupon,
    pub discount: Money,
}

/// Running demand per stock counter, so duplicate cart lines are checked
/// against the counter as a whole.
#[derive(Default)]
struct Demand(BTreeMap<CartLineTarget, u32>);

impl Demand {
    fn take(&mut self, target: CartLineTarget, quantity: u32, available: u32) -> Result<()> {
        let requested = self.0.entry(target).or_insert(0);
        *requested = requested
            .checked_add(quantity)
            .ok_or(EngineError::InvalidQuantity { quantity })?;
        if *requested > available {
            return Err(EngineError::InsufficientStock {
                target,
                requested: *requested,
                available,
            });
        }
        Ok(())
    }
}

/// Prices `selection` for `customer_id` at current catalog prices.
#[tracing::instrument(skip(store), fields(customer_id = %customer_id))]
pub async fn price_selection<S>(
    store: &S,
    customer_id: CustomerId,
    selection: &Selection,
    policy: MissingLinePolicy,
) -> Result<PricedSelection>
where
    S: Catalog + CartStore + ?Sized,
{
    match selection {
        Selection::SingleProduct {
            product_id,
            variation_id,
            quantity,
        } => {
            let item = price_single(store, *product_id, *variation_id, *quantity).await?;
            let items = vec![item];
            Ok(PricedSelection {
                subtotal: subtotal_of(&items),
                items,
                from_cart: false,
            })
        }
        Selection::Cart => price_cart(store, customer_id, policy).await,
    }
}

async fn price_single<S>(
    store: &S,
    product_id: ProductId,
    variation_id: Option<VariationId>,
    quantity: u32,
) -> Result<OrderItem>
where
    S: Catalog + ?Sized,
{
    if quantity < 1 {
        return Err(EngineError::InvalidQuantity { quantity });
    }

    let product = store
        .get_product(product_id)
        .await?
        .ok_or(EngineError::ProductNotFound(product_id))?;

    let mut demand = Demand::default();
    match variation_id {
        Some(variation_id) => {
            let variation = store
                .get_variation(variation_id)
                .await?
                .filter(|v| v.product_id == product.id)
                .ok_or(EngineError::VariationNotFound(variation_id))?;
            demand.take(
                CartLineTarget::Variation(variation.id),
                quantity,
                variation.stock,
            )?;
            Ok(OrderItem::for_variation(&variation, quantity))
        }
        None => {
            demand.take(CartLineTarget::Product(product.id), quantity, product.stock)?;
            Ok(OrderItem::for_product(&product, quantity))
        }
    }
}

async fn price_cart<S>(
    store: &S,
    customer_id: CustomerId,
    policy: MissingLinePolicy,
) -> Result<PricedSelection>
where
    S: Catalog + CartStore + ?Sized,
{
    let lines = store.list_cart_lines(customer_id).await?;
    if lines.is_empty() {
        return Err(EngineError::EmptyCart);
    }

    let mut demand = Demand::default();
    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        if line.quantity < 1 {
            return Err(EngineError::InvalidQuantity {
                quantity: line.quantity,
            });
        }
        match price_line(store, line, &mut demand).await {
            Ok(item) => items.push(item),
            Err(err @ (EngineError::ProductNotFound(_) | EngineError::VariationNotFound(_)))
                if policy == MissingLinePolicy::Skip =>
            {
                tracing::warn!(
                    customer_id = %customer_id,
                    target = %line.target,
                    error = %err,
                    "skipping cart line with missing catalog entry"
                );
            }
            Err(err) => return Err(err),
        }
    }

    if items.is_empty() {
        return Err(EngineError::EmptyCart);
    }

    Ok(PricedSelection {
        subtotal: subtotal_of(&items),
        items,
        from_cart: true,
    })
}

async fn price_line<S>(store: &S, line: &CartLine, demand: &mut Demand) -> Result<OrderItem>
where
    S: Catalog + ?Sized,
{
    match line.target {
        CartLineTarget::Product(product_id) => {
            let product = store
                .get_product(product_id)
                .await?
                .ok_or(EngineError::ProductNotFound(product_id))?;
            demand.take(line.target, line.quantity, product.stock)?;
            Ok(OrderItem::for_product(&product, line.quantity))
        }
        CartLineTarget::Variation(variation_id) => {
            let variation = store
                .get_variation(variation_id)
                .await?
                .ok_or(EngineError::VariationNotFound(variation_id))?;
            demand.take(line.target, line.quantity, variation.stock)?;
            Ok(OrderItem::for_variation(&variation, line.quantity))
        }
    }
}

/// Looks up coupon `name` and applies it to `subtotal` at `now`.
///
/// The per-person count checked here is only a fast path; the limit is
/// enforced again when the usage is claimed during the commit.
#[tracing::instrument(skip(store), fields(customer_id = %customer_id, subtotal = %subtotal))]
pub async fn resolve_coupon<S>(
    store: &S,
    name: &str,
    customer_id: CustomerId,
    subtotal: Money,
    now: DateTime<Utc>,
) -> Result<AppliedCoupon>
where
    S: CouponStore + ?Sized,
{
    let coupon = store
        .find_coupon_by_name(name)
        .await?
        .ok_or_else(|| EngineError::CouponNotFound(name.to_string()))?;

    let discount = coupon.apply(subtotal, now)?;

    let used = store.count_usages(coupon.id, customer_id).await?;
    if used >= coupon.per_person_limit {
        return Err(EngineError::CouponPerPersonLimitReached {
            name: coupon.name.clone(),
            limit: coupon.per_person_limit,
        });
    }

    Ok(AppliedCoupon { coupon, discount })
}

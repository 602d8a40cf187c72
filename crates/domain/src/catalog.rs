//! Read-side records supplied by the catalog, cart and address collaborators.

use common::{AddressId, CustomerId, ProductId, VariationId};
use serde::{Deserialize, Serialize};

use crate::Money;

/// A sellable product with its own stock counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Price the customer pays per unit.
    pub discounted_price: Money,
    /// List price per unit, kept for the receipt.
    pub actual_price: Money,
    /// Units available for sale. Never negative.
    pub stock: u32,
}

/// A variation of a product (size, colour, ...) with a stock counter of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub id: VariationId,
    /// The product this variation belongs to.
    pub product_id: ProductId,
    pub name: String,
    pub discounted_price: Money,
    pub actual_price: Money,
    pub stock: u32,
}

/// What a cart line points at.
///
/// Ordered so that stock rows can be locked in a consistent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartLineTarget {
    Product(ProductId),
    Variation(VariationId),
}

/// One line of a customer's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub target: CartLineTarget,
    pub quantity: u32,
}

impl std::fmt::Display for CartLineTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartLineTarget::Product(id) => write!(f, "product {id}"),
            CartLineTarget::Variation(id) => write!(f, "variation {id}"),
        }
    }
}

impl CartLine {
    /// Creates a cart line for a base product.
    pub fn product(product_id: ProductId, quantity: u32) -> Self {
        Self {
            target: CartLineTarget::Product(product_id),
            quantity,
        }
    }

    /// Creates a cart line for a product variation.
    pub fn variation(variation_id: VariationId, quantity: u32) -> Self {
        Self {
            target: CartLineTarget::Variation(variation_id),
            quantity,
        }
    }
}

/// A stored shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub customer_id: CustomerId,
    pub recipient: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub phone: Option<String>,
}

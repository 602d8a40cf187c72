use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, CouponId, CustomerId, OrderId, ProductId, VariationId};
use domain::{
    Address, CartLine, CartLineTarget, Coupon, Money, Order, OrderStatus, Product,
    TrackingDetail, TrackingEntry, Variation,
};

use crate::Result;

/// Product and variation lookup.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    async fn get_variation(&self, id: VariationId) -> Result<Option<Variation>>;
}

/// Per-customer shopping carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the cart lines in the order they were added.
    async fn list_cart_lines(&self, customer_id: CustomerId) -> Result<Vec<CartLine>>;

    async fn clear_cart(&self, customer_id: CustomerId) -> Result<()>;
}

/// Coupon definitions and their usage records.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Looks up a coupon by its exact name.
    async fn find_coupon_by_name(&self, name: &str) -> Result<Option<Coupon>>;

    /// Counts how many orders `customer_id` has placed with the coupon.
    async fn count_usages(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<u32>;

    /// Records one usage outside of an order commit.
    ///
    /// Checkout never calls this; usages are claimed inside
    /// [`OrderStore::commit_order`].
    async fn record_usage(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<()>;
}

/// Stored shipping addresses.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Returns the address if it exists and belongs to `customer_id`.
    async fn get_address(
        &self,
        address_id: AddressId,
        customer_id: CustomerId,
    ) -> Result<Option<Address>>;
}

/// Delivery fee table keyed by postal code.
#[async_trait]
pub trait DeliveryFees: Send + Sync {
    /// Returns the fee, or `None` if the destination is not served.
    async fn quote(&self, postal_code: &str) -> Result<Option<Money>>;
}

/// A coupon usage to claim as part of an order commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponClaim {
    pub coupon_id: CouponId,
    pub customer_id: CustomerId,
    pub per_person_limit: u32,
}

/// All writes of a checkout, applied atomically by [`OrderStore::commit_order`].
#[derive(Debug, Clone)]
pub struct OrderCommit {
    pub order: Order,
    /// The initial tracking record.
    pub tracking: TrackingDetail,
    /// Customer whose cart is emptied, for cart checkouts.
    pub clear_cart_for: Option<CustomerId>,
    pub coupon_claim: Option<CouponClaim>,
}

impl OrderCommit {
    /// Returns the quantity to take from each stock counter, summed over
    /// duplicate lines and sorted by target.
    ///
    /// Sums saturate at `u32::MAX`, which no stock counter can satisfy.
    pub fn stock_demand(&self) -> Vec<(CartLineTarget, u32)> {
        let mut demand = std::collections::BTreeMap::new();
        for item in &self.order.items {
            let requested = demand.entry(item.stock_target()).or_insert(0u32);
            *requested = requested.saturating_add(item.quantity);
        }
        demand.into_iter().collect()
    }
}

/// A tracking transition together with the order status it maps to.
#[derive(Debug, Clone)]
pub struct TrackingChange {
    pub order_id: OrderId,
    /// History length the caller observed; the write fails if it moved.
    pub expected_history_len: usize,
    pub entry: TrackingEntry,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub order_status: OrderStatus,
}

/// Cancellation of an order, with the tracking entry that records it.
#[derive(Debug, Clone)]
pub struct OrderCancellation {
    pub order_id: OrderId,
    /// Status the caller observed; the write fails if it moved.
    pub expected_status: OrderStatus,
    /// Whether the order's quantities go back into stock.
    pub restock: bool,
    pub entry: TrackingEntry,
    pub cancelled_at: DateTime<Utc>,
}

/// Order and tracking persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Commits a checkout in one unit of work.
    ///
    /// Every stock counter is decremented only where enough stock remains,
    /// the coupon usage is claimed against its global and per-person limits,
    /// and the order, its items, its tracking record and the cart clearing
    /// are written. Any failure leaves the store unchanged.
    async fn commit_order(&self, commit: OrderCommit) -> Result<Order>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns the customer's orders, newest first.
    async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    async fn get_tracking(&self, order_id: OrderId) -> Result<Option<TrackingDetail>>;

    /// Appends a tracking entry and syncs the order status.
    ///
    /// Fails with `ConcurrentModification` if the history moved since it
    /// was read, or the order has meanwhile reached a status it may not be
    /// tracked from (see `OrderStatus::can_track_to`).
    async fn append_tracking(&self, change: TrackingChange) -> Result<TrackingDetail>;

    /// Cancels an order, optionally restocking its items, and appends the
    /// cancellation to its tracking history.
    async fn cancel_order(&self, cancellation: OrderCancellation) -> Result<Order>;
}

/// Everything the engine needs from persistence.
pub trait Store: Catalog + CartStore + CouponStore + AddressBook + DeliveryFees + OrderStore {}

impl<T> Store for T where
    T: Catalog + CartStore + CouponStore + AddressBook + DeliveryFees + OrderStore
{
}

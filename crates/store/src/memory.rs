use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AddressId, CouponId, CustomerId, OrderId, ProductId, VariationId};
use domain::{
    Address, CartLine, CartLineTarget, Coupon, Money, Order, OrderStatus, Product,
    TrackingDetail, Variation,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        AddressBook, CartStore, Catalog, CouponStore, DeliveryFees, OrderCancellation,
        OrderCommit, OrderStore, TrackingChange,
    },
};

#[derive(Debug, Clone)]
struct CouponRow {
    coupon: Coupon,
    times_used: u32,
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    variations: HashMap<VariationId, Variation>,
    carts: HashMap<CustomerId, Vec<CartLine>>,
    coupons: HashMap<CouponId, CouponRow>,
    coupon_usages: Vec<(CouponId, CustomerId)>,
    addresses: HashMap<AddressId, Address>,
    delivery_fees: HashMap<String, Money>,
    orders: HashMap<OrderId, Order>,
    tracking: HashMap<OrderId, TrackingDetail>,
    fail_on_order_insert: bool,
}

impl Tables {
    fn stock_of(&self, target: CartLineTarget) -> Option<u32> {
        match target {
            CartLineTarget::Product(id) => self.products.get(&id).map(|p| p.stock),
            CartLineTarget::Variation(id) => self.variations.get(&id).map(|v| v.stock),
        }
    }

    fn stock_mut(&mut self, target: CartLineTarget) -> Option<&mut u32> {
        match target {
            CartLineTarget::Product(id) => self.products.get_mut(&id).map(|p| &mut p.stock),
            CartLineTarget::Variation(id) => self.variations.get_mut(&id).map(|v| &mut v.stock),
        }
    }

    fn usages_of(&self, coupon_id: CouponId, customer_id: CustomerId) -> u32 {
        self.coupon_usages
            .iter()
            .filter(|(c, u)| *c == coupon_id && *u == customer_id)
            .count() as u32
    }
}

/// In-memory store for tests and local runs.
///
/// Every operation takes a single lock over all tables, so an order commit
/// is atomic with respect to every other operation. Writes are staged and
/// applied only after every check has passed.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        self.tables
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    pub async fn insert_variation(&self, variation: Variation) {
        self.tables
            .write()
            .await
            .variations
            .insert(variation.id, variation);
    }

    /// Removes a product, leaving any cart lines that point at it dangling.
    pub async fn remove_product(&self, id: ProductId) {
        self.tables.write().await.products.remove(&id);
    }

    pub async fn add_to_cart(&self, customer_id: CustomerId, line: CartLine) {
        self.tables
            .write()
            .await
            .carts
            .entry(customer_id)
            .or_default()
            .push(line);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.tables.write().await.coupons.insert(
            coupon.id,
            CouponRow {
                coupon,
                times_used: 0,
            },
        );
    }

    pub async fn insert_address(&self, address: Address) {
        self.tables
            .write()
            .await
            .addresses
            .insert(address.id, address);
    }

    pub async fn set_delivery_fee(&self, postal_code: impl Into<String>, fee: Money) {
        self.tables
            .write()
            .await
            .delivery_fees
            .insert(postal_code.into(), fee);
    }

    /// Makes every following order commit fail after its stock has been
    /// staged, as a failed order insert would.
    pub async fn set_fail_on_order_insert(&self, fail: bool) {
        self.tables.write().await.fail_on_order_insert = fail;
    }

    /// Returns the current stock of a product or variation.
    pub async fn stock_of(&self, target: CartLineTarget) -> Option<u32> {
        self.tables.read().await.stock_of(target)
    }

    /// Returns how many times a coupon has been used in total.
    pub async fn coupon_times_used(&self, coupon_id: CouponId) -> u32 {
        self.tables
            .read()
            .await
            .coupons
            .get(&coupon_id)
            .map(|row| row.times_used)
            .unwrap_or(0)
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Overwrites an order's status, bypassing the lifecycle rules.
    pub async fn force_order_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(order) = self.tables.write().await.orders.get_mut(&order_id) {
            order.status = status;
        }
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn get_variation(&self, id: VariationId) -> Result<Option<Variation>> {
        Ok(self.tables.read().await.variations.get(&id).cloned())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn list_cart_lines(&self, customer_id: CustomerId) -> Result<Vec<CartLine>> {
        Ok(self
            .tables
            .read()
            .await
            .carts
            .get(&customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_cart(&self, customer_id: CustomerId) -> Result<()> {
        self.tables.write().await.carts.remove(&customer_id);
        Ok(())
    }
}

#[async_trait]
impl CouponStore for InMemoryStore {
    async fn find_coupon_by_name(&self, name: &str) -> Result<Option<Coupon>> {
        Ok(self
            .tables
            .read()
            .await
            .coupons
            .values()
            .find(|row| row.coupon.name == name)
            .map(|row| row.coupon.clone()))
    }

    async fn count_usages(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<u32> {
        Ok(self.tables.read().await.usages_of(coupon_id, customer_id))
    }

    async fn record_usage(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(row) = tables.coupons.get_mut(&coupon_id) {
            row.times_used += 1;
        }
        tables.coupon_usages.push((coupon_id, customer_id));
        Ok(())
    }
}

#[async_trait]
impl AddressBook for InMemoryStore {
    async fn get_address(
        &self,
        address_id: AddressId,
        customer_id: CustomerId,
    ) -> Result<Option<Address>> {
        Ok(self
            .tables
            .read()
            .await
            .addresses
            .get(&address_id)
            .filter(|a| a.customer_id == customer_id)
            .cloned())
    }
}

#[async_trait]
impl DeliveryFees for InMemoryStore {
    async fn quote(&self, postal_code: &str) -> Result<Option<Money>> {
        Ok(self
            .tables
            .read()
            .await
            .delivery_fees
            .get(postal_code)
            .copied())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn commit_order(&self, commit: OrderCommit) -> Result<Order> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        if let Some(reference) = commit.order.payment_reference.as_deref()
            && tables
                .orders
                .values()
                .any(|o| o.payment_reference.as_deref() == Some(reference))
        {
            return Err(StoreError::PaymentReferenceUsed {
                reference: reference.to_string(),
            });
        }

        let mut staged_stock = Vec::new();
        for (target, requested) in commit.stock_demand() {
            let available = tables.stock_of(target).unwrap_or(0);
            if available < requested {
                return Err(StoreError::InsufficientStock {
                    target,
                    requested,
                    available,
                });
            }
            staged_stock.push((target, available - requested));
        }

        let staged_coupon = match commit.coupon_claim {
            Some(claim) => {
                let row = tables
                    .coupons
                    .get(&claim.coupon_id)
                    .ok_or(StoreError::CouponLimitReached {
                        coupon_id: claim.coupon_id,
                    })?;
                if let Some(limit) = row.coupon.usage_limit
                    && row.times_used >= limit
                {
                    return Err(StoreError::CouponLimitReached {
                        coupon_id: claim.coupon_id,
                    });
                }
                if tables.usages_of(claim.coupon_id, claim.customer_id) >= claim.per_person_limit
                {
                    return Err(StoreError::CouponPerPersonLimitReached {
                        coupon_id: claim.coupon_id,
                        customer_id: claim.customer_id,
                        limit: claim.per_person_limit,
                    });
                }
                Some((claim, row.times_used + 1))
            }
            None => None,
        };

        if tables.fail_on_order_insert {
            return Err(StoreError::Unavailable {
                operation: "order insert",
            });
        }

        for (target, remaining) in staged_stock {
            if let Some(stock) = tables.stock_mut(target) {
                *stock = remaining;
            }
        }
        if let Some((claim, times_used)) = staged_coupon {
            if let Some(row) = tables.coupons.get_mut(&claim.coupon_id) {
                row.times_used = times_used;
            }
            tables
                .coupon_usages
                .push((claim.coupon_id, claim.customer_id));
        }
        if let Some(customer_id) = commit.clear_cart_for {
            tables.carts.remove(&customer_id);
        }
        tables.tracking.insert(commit.order.id, commit.tracking);
        tables.orders.insert(commit.order.id, commit.order.clone());

        Ok(commit.order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn get_tracking(&self, order_id: OrderId) -> Result<Option<TrackingDetail>> {
        Ok(self.tables.read().await.tracking.get(&order_id).cloned())
    }

    async fn append_tracking(&self, change: TrackingChange) -> Result<TrackingDetail> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let order = tables
            .orders
            .get_mut(&change.order_id)
            .ok_or(StoreError::OrderNotFound(change.order_id))?;
        let tracking = tables
            .tracking
            .get_mut(&change.order_id)
            .ok_or(StoreError::OrderNotFound(change.order_id))?;

        if !order.status.can_track_to(change.order_status)
            || tracking.status_history.len() != change.expected_history_len
        {
            return Err(StoreError::ConcurrentModification(change.order_id));
        }

        let at = change.entry.timestamp;
        tracking.status = change.entry.status;
        tracking.status_history.push(change.entry);
        tracking.set_carrier(change.carrier, change.tracking_number);
        tracking.last_updated_at = at;

        order.status = change.order_status;
        order.updated_at = at;

        Ok(tracking.clone())
    }

    async fn cancel_order(&self, cancellation: OrderCancellation) -> Result<Order> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let order_id = cancellation.order_id;

        let order = tables
            .orders
            .get(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        if order.status != cancellation.expected_status {
            return Err(StoreError::ConcurrentModification(order_id));
        }

        if cancellation.restock {
            let returned: Vec<_> = order
                .items
                .iter()
                .map(|item| (item.stock_target(), item.quantity))
                .collect();
            for (target, quantity) in returned {
                if let Some(stock) = tables.stock_mut(target) {
                    *stock = stock.saturating_add(quantity);
                }
            }
        }

        if let Some(tracking) = tables.tracking.get_mut(&order_id) {
            tracking.status = cancellation.entry.status;
            tracking.status_history.push(cancellation.entry);
            tracking.last_updated_at = cancellation.cancelled_at;
        }

        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = cancellation.cancelled_at;
        Ok(order.clone())
    }
}

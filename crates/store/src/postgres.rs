use std::collections::HashMap;

use async_trait::async_trait;
use common::{AddressId, CouponId, CustomerId, OrderId, ProductId, VariationId};
use domain::{
    Address, CartLine, CartLineTarget, Coupon, DiscountKind, Money, Order, OrderItem,
    OrderNumber, OrderStatus, PaymentMethod, PaymentStatus, Product, TrackingDetail,
    TrackingEntry, TrackingStatus, Variation,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        AddressBook, CartStore, Catalog, CouponStore, DeliveryFees, OrderCancellation,
        OrderCommit, OrderStore, TrackingChange,
    },
};

const ORDER_COLUMNS: &str = "id, order_number, customer_id, status, payment_status, \
     payment_method, subtotal, discount_amount, shipping_cost, tax_amount, total_amount, \
     coupon_id, payment_reference, shipping_address_id, created_at, updated_at";

/// Partial unique index over `orders.payment_reference`.
const PAYMENT_REFERENCE_INDEX: &str = "unique_order_payment_reference";

const TRACKING_COLUMNS: &str =
    "order_id, status, status_history, carrier, tracking_number, last_updated_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn order_exists(tx: &mut Transaction<'_, Postgres>, order_id: OrderId) -> Result<bool> {
        let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(found.is_some())
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, variation_id, name, quantity, discounted_price, actual_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(OrderItem {
                product_id: ProductId::from_uuid(row.try_get("product_id")?),
                variation_id: row
                    .try_get::<Option<Uuid>, _>("variation_id")?
                    .map(VariationId::from_uuid),
                name: row.try_get("name")?,
                quantity: to_u32(row.try_get("quantity")?),
                discounted_price: Money::from_minor(row.try_get("discounted_price")?),
                actual_price: Money::from_minor(row.try_get("actual_price")?),
            });
        }
        Ok(items)
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            order_number: OrderNumber::new(row.try_get::<String, _>("order_number")?),
            customer_id: CustomerId::from_uuid(row.try_get("customer_id")?),
            status: row.try_get::<String, _>("status")?.parse::<OrderStatus>()?,
            payment_status: row
                .try_get::<String, _>("payment_status")?
                .parse::<PaymentStatus>()?,
            payment_method: row
                .try_get::<String, _>("payment_method")?
                .parse::<PaymentMethod>()?,
            items,
            subtotal: Money::from_minor(row.try_get("subtotal")?),
            discount_amount: Money::from_minor(row.try_get("discount_amount")?),
            shipping_cost: Money::from_minor(row.try_get("shipping_cost")?),
            tax_amount: Money::from_minor(row.try_get("tax_amount")?),
            total_amount: Money::from_minor(row.try_get("total_amount")?),
            coupon_id: row
                .try_get::<Option<Uuid>, _>("coupon_id")?
                .map(CouponId::from_uuid),
            payment_reference: row.try_get("payment_reference")?,
            shipping_address_id: AddressId::from_uuid(row.try_get("shipping_address_id")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_tracking(row: PgRow) -> Result<TrackingDetail> {
        let history: serde_json::Value = row.try_get("status_history")?;
        Ok(TrackingDetail {
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            status: row
                .try_get::<String, _>("status")?
                .parse::<TrackingStatus>()?,
            status_history: serde_json::from_value::<Vec<TrackingEntry>>(history)?,
            carrier: row.try_get("carrier")?,
            tracking_number: row.try_get("tracking_number")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    fn row_to_coupon(row: PgRow) -> Result<Coupon> {
        Ok(Coupon {
            id: CouponId::from_uuid(row.try_get("id")?),
            name: row.try_get("name")?,
            kind: row.try_get::<String, _>("kind")?.parse::<DiscountKind>()?,
            value: row.try_get("value")?,
            minimum_spent: Money::from_minor(row.try_get("minimum_spent")?),
            valid_from: row.try_get("valid_from")?,
            valid_till: row.try_get("valid_till")?,
            per_person_limit: to_u32(row.try_get("per_person_limit")?),
            usage_limit: row.try_get::<Option<i32>, _>("usage_limit")?.map(to_u32),
        })
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Table holding the stock counter for `target`, and the row id.
fn stock_row(target: CartLineTarget) -> (&'static str, Uuid) {
    match target {
        CartLineTarget::Product(id) => ("products", id.as_uuid()),
        CartLineTarget::Variation(id) => ("product_variations", id.as_uuid()),
    }
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, discounted_price, actual_price, stock FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Product> {
            Ok(Product {
                id: ProductId::from_uuid(row.try_get("id")?),
                name: row.try_get("name")?,
                discounted_price: Money::from_minor(row.try_get("discounted_price")?),
                actual_price: Money::from_minor(row.try_get("actual_price")?),
                stock: to_u32(row.try_get("stock")?),
            })
        })
        .transpose()
    }

    async fn get_variation(&self, id: VariationId) -> Result<Option<Variation>> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, name, discounted_price, actual_price, stock
            FROM product_variations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Variation> {
            Ok(Variation {
                id: VariationId::from_uuid(row.try_get("id")?),
                product_id: ProductId::from_uuid(row.try_get("product_id")?),
                name: row.try_get("name")?,
                discounted_price: Money::from_minor(row.try_get("discounted_price")?),
                actual_price: Money::from_minor(row.try_get("actual_price")?),
                stock: to_u32(row.try_get("stock")?),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn list_cart_lines(&self, customer_id: CustomerId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            "SELECT product_id, variation_id, quantity FROM cart_lines WHERE customer_id = $1 ORDER BY id",
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<CartLine> {
                let quantity = to_u32(row.try_get("quantity")?);
                let line = match row.try_get::<Option<Uuid>, _>("variation_id")? {
                    Some(variation_id) => {
                        CartLine::variation(VariationId::from_uuid(variation_id), quantity)
                    }
                    None => CartLine::product(
                        ProductId::from_uuid(row.try_get("product_id")?),
                        quantity,
                    ),
                };
                Ok(line)
            })
            .collect()
    }

    async fn clear_cart(&self, customer_id: CustomerId) -> Result<()> {
        sqlx::query("DELETE FROM cart_lines WHERE customer_id = $1")
            .bind(customer_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CouponStore for PostgresStore {
    async fn find_coupon_by_name(&self, name: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, kind, value, minimum_spent, valid_from, valid_till,
                   per_person_limit, usage_limit
            FROM coupons
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_coupon).transpose()
    }

    async fn count_usages(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND customer_id = $2",
        )
        .bind(coupon_id.as_uuid())
        .bind(customer_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn record_usage(&self, coupon_id: CouponId, customer_id: CustomerId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE coupons SET times_used = times_used + 1 WHERE id = $1")
            .bind(coupon_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO coupon_usages (coupon_id, customer_id, used_at) VALUES ($1, $2, NOW())",
        )
        .bind(coupon_id.as_uuid())
        .bind(customer_id.as_uuid())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AddressBook for PostgresStore {
    async fn get_address(
        &self,
        address_id: AddressId,
        customer_id: CustomerId,
    ) -> Result<Option<Address>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, recipient, line1, line2, city, postal_code, phone
            FROM addresses
            WHERE id = $1 AND customer_id = $2
            "#,
        )
        .bind(address_id.as_uuid())
        .bind(customer_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Address> {
            Ok(Address {
                id: AddressId::from_uuid(row.try_get("id")?),
                customer_id: CustomerId::from_uuid(row.try_get("customer_id")?),
                recipient: row.try_get("recipient")?,
                line1: row.try_get("line1")?,
                line2: row.try_get("line2")?,
                city: row.try_get("city")?,
                postal_code: row.try_get("postal_code")?,
                phone: row.try_get("phone")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl DeliveryFees for PostgresStore {
    async fn quote(&self, postal_code: &str) -> Result<Option<Money>> {
        let fee: Option<i64> =
            sqlx::query_scalar("SELECT fee FROM delivery_fees WHERE postal_code = $1")
                .bind(postal_code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(fee.map(Money::from_minor))
    }
}

fn order_insert_error(err: sqlx::Error, order: &Order) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && db.constraint() == Some(PAYMENT_REFERENCE_INDEX)
        && let Some(reference) = &order.payment_reference
    {
        return StoreError::PaymentReferenceUsed {
            reference: reference.clone(),
        };
    }
    err.into()
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[tracing::instrument(skip(self, commit), fields(order_id = %commit.order.id))]
    async fn commit_order(&self, commit: OrderCommit) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // Sorted demand keeps row locks in a consistent order across checkouts.
        for (target, requested) in commit.stock_demand() {
            let (table, id) = stock_row(target);
            let decremented = sqlx::query(&format!(
                "UPDATE {table} SET stock = stock - $2 WHERE id = $1 AND stock >= $2"
            ))
            .bind(id)
            .bind(to_i32(requested))
            .execute(&mut *tx)
            .await?;

            if decremented.rows_affected() == 0 {
                let available: Option<i32> =
                    sqlx::query_scalar(&format!("SELECT stock FROM {table} WHERE id = $1"))
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?;
                metrics::counter!("inventory_conflicts_total").increment(1);
                return Err(StoreError::InsufficientStock {
                    target,
                    requested,
                    available: available.map(to_u32).unwrap_or(0),
                });
            }
        }

        if let Some(claim) = commit.coupon_claim {
            // Also locks the coupon row, which serialises the per-person count below.
            let claimed = sqlx::query(
                r#"
                UPDATE coupons SET times_used = times_used + 1
                WHERE id = $1 AND (usage_limit IS NULL OR times_used < usage_limit)
                "#,
            )
            .bind(claim.coupon_id.as_uuid())
            .execute(&mut *tx)
            .await?;
            if claimed.rows_affected() == 0 {
                return Err(StoreError::CouponLimitReached {
                    coupon_id: claim.coupon_id,
                });
            }

            let used: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND customer_id = $2",
            )
            .bind(claim.coupon_id.as_uuid())
            .bind(claim.customer_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if used >= i64::from(claim.per_person_limit) {
                return Err(StoreError::CouponPerPersonLimitReached {
                    coupon_id: claim.coupon_id,
                    customer_id: claim.customer_id,
                    limit: claim.per_person_limit,
                });
            }

            sqlx::query(
                r#"
                INSERT INTO coupon_usages (coupon_id, customer_id, order_id, used_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(claim.coupon_id.as_uuid())
            .bind(claim.customer_id.as_uuid())
            .bind(commit.order.id.as_uuid())
            .bind(commit.order.created_at)
            .execute(&mut *tx)
            .await?;
        }

        let order = &commit.order;
        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(order.id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(order.customer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.subtotal.minor())
        .bind(order.discount_amount.minor())
        .bind(order.shipping_cost.minor())
        .bind(order.tax_amount.minor())
        .bind(order.total_amount.minor())
        .bind(order.coupon_id.map(|id| id.as_uuid()))
        .bind(order.payment_reference.as_deref())
        .bind(order.shipping_address_id.as_uuid())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| order_insert_error(err, order))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (order_id, position, product_id, variation_id, name, quantity,
                     discounted_price, actual_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(item.product_id.as_uuid())
            .bind(item.variation_id.map(|id| id.as_uuid()))
            .bind(&item.name)
            .bind(to_i32(item.quantity))
            .bind(item.discounted_price.minor())
            .bind(item.actual_price.minor())
            .execute(&mut *tx)
            .await?;
        }

        let tracking = &commit.tracking;
        sqlx::query(&format!(
            "INSERT INTO tracking_details ({TRACKING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(tracking.order_id.as_uuid())
        .bind(tracking.status.as_str())
        .bind(serde_json::to_value(&tracking.status_history)?)
        .bind(tracking.carrier.as_deref())
        .bind(tracking.tracking_number.as_deref())
        .bind(tracking.last_updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(customer_id) = commit.clear_cart_for {
            sqlx::query("DELETE FROM cart_lines WHERE customer_id = $1")
                .bind(customer_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(commit.order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let Some(row) = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let mut items = self.load_items(&[order_id.as_uuid()]).await?;
        let items = items.remove(&order_id.as_uuid()).unwrap_or_default();
        Self::row_to_order(&row, items).map(Some)
    }

    async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC"
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn get_tracking(&self, order_id: OrderId) -> Result<Option<TrackingDetail>> {
        let row = sqlx::query(&format!(
            "SELECT {TRACKING_COLUMNS} FROM tracking_details WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_tracking).transpose()
    }

    #[tracing::instrument(skip(self, change), fields(order_id = %change.order_id, status = %change.entry.status))]
    async fn append_tracking(&self, change: TrackingChange) -> Result<TrackingDetail> {
        let mut tx = self.pool.begin().await?;
        let order_id = change.order_id;

        let tracked_from: Vec<String> = OrderStatus::tracked_from(change.order_status)
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let synced = sqlx::query(
            r#"
            UPDATE orders SET status = $2, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(change.order_status.as_str())
        .bind(change.entry.timestamp)
        .bind(&tracked_from)
        .execute(&mut *tx)
        .await?;
        if synced.rows_affected() == 0 {
            return Err(if Self::order_exists(&mut tx, order_id).await? {
                StoreError::ConcurrentModification(order_id)
            } else {
                StoreError::OrderNotFound(order_id)
            });
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE tracking_details
            SET status = $2,
                status_history = status_history || jsonb_build_array($3::jsonb),
                carrier = COALESCE($4, carrier),
                tracking_number = COALESCE($5, tracking_number),
                last_updated_at = $6
            WHERE order_id = $1 AND jsonb_array_length(status_history) = $7
            RETURNING {TRACKING_COLUMNS}
            "#
        ))
        .bind(order_id.as_uuid())
        .bind(change.entry.status.as_str())
        .bind(serde_json::to_value(&change.entry)?)
        .bind(change.carrier.as_deref())
        .bind(change.tracking_number.as_deref())
        .bind(change.entry.timestamp)
        .bind(i32::try_from(change.expected_history_len).unwrap_or(i32::MAX))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::ConcurrentModification(order_id))?;

        tx.commit().await?;
        Self::row_to_tracking(row)
    }

    #[tracing::instrument(skip(self, cancellation), fields(order_id = %cancellation.order_id))]
    async fn cancel_order(&self, cancellation: OrderCancellation) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let order_id = cancellation.order_id;

        let cancelled = sqlx::query(
            r#"
            UPDATE orders SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(cancellation.expected_status.as_str())
        .bind(OrderStatus::Cancelled.as_str())
        .bind(cancellation.cancelled_at)
        .execute(&mut *tx)
        .await?;
        if cancelled.rows_affected() == 0 {
            return Err(if Self::order_exists(&mut tx, order_id).await? {
                StoreError::ConcurrentModification(order_id)
            } else {
                StoreError::OrderNotFound(order_id)
            });
        }

        if cancellation.restock {
            let rows = sqlx::query(
                "SELECT product_id, variation_id, quantity FROM order_items WHERE order_id = $1",
            )
            .bind(order_id.as_uuid())
            .fetch_all(&mut *tx)
            .await?;

            let mut returned = Vec::with_capacity(rows.len());
            for row in rows {
                let target = match row.try_get::<Option<Uuid>, _>("variation_id")? {
                    Some(id) => CartLineTarget::Variation(VariationId::from_uuid(id)),
                    None => CartLineTarget::Product(ProductId::from_uuid(row.try_get("product_id")?)),
                };
                returned.push((target, row.try_get::<i32, _>("quantity")?));
            }
            returned.sort();

            for (target, quantity) in returned {
                let (table, id) = stock_row(target);
                sqlx::query(&format!("UPDATE {table} SET stock = stock + $2 WHERE id = $1"))
                    .bind(id)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query(
            r#"
            UPDATE tracking_details
            SET status = $2,
                status_history = status_history || jsonb_build_array($3::jsonb),
                last_updated_at = $4
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(cancellation.entry.status.as_str())
        .bind(serde_json::to_value(&cancellation.entry)?)
        .bind(cancellation.cancelled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_order(order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))
    }
}

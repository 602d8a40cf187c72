//! The order engine: checkout, tracking updates and cancellation.

use std::time::Instant;

use chrono::Utc;
use common::{AddressId, CustomerId, OrderId};
use domain::{
    CheckoutTotals, Order, PaymentMethod, PlaceOrder, TrackingDetail, TrackingEntry,
    TrackingStatus, Transition,
};
use serde::{Deserialize, Serialize};
use store::{CouponClaim, OrderCancellation, OrderCommit, Store, TrackingChange};

use crate::error::{EngineError, Result};
use crate::pricing::{self, Selection};
use crate::quote;
use crate::services::{
    Notification, NotificationDispatcher, Notifier, PaymentGateway, verify_settlement,
};
use crate::settings::CheckoutSettings;

/// A checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub customer_id: CustomerId,
    pub selection: Selection,
    pub shipping_address_id: AddressId,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub coupon_name: Option<String>,
    /// Gateway reference of an online payment; required unless paying cash.
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Optional details accompanying a tracking status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
}

/// Who is asking for a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// The customer; may only cancel their own orders.
    Customer(CustomerId),
    /// Store staff, identified by name.
    Operator(String),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Customer(_) => f.write_str("customer"),
            Actor::Operator(name) => write!(f, "operator {name}"),
        }
    }
}

/// Drives orders from checkout through fulfillment.
///
/// Each operation is an independent unit of work. All writes of a checkout
/// go through a single [`OrderCommit`]; notifications are dispatched only
/// after the store has accepted the change and never affect the result.
pub struct OrderEngine<S, P, N>
where
    S: Store,
    P: PaymentGateway,
    N: Notifier,
{
    store: S,
    payments: P,
    notifications: NotificationDispatcher<N>,
    settings: CheckoutSettings,
}

impl<S, P, N> OrderEngine<S, P, N>
where
    S: Store,
    P: PaymentGateway,
    N: Notifier,
{
    /// Creates a new order engine.
    pub fn new(store: S, payments: P, notifier: N, settings: CheckoutSettings) -> Self {
        Self {
            store,
            payments,
            notifications: NotificationDispatcher::new(notifier),
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Prices, verifies and commits an order.
    ///
    /// Fails without side effects on any validation, stock, coupon, delivery
    /// or payment problem. An `InsufficientStock` failure should be retried
    /// from the start, since prices and stock may have moved.
    #[tracing::instrument(
        skip(self, request),
        fields(customer_id = %request.customer_id, method = %request.payment_method)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let result = self.run_checkout(request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                metrics::counter!("orders_committed_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = %order.total_amount,
                    "order committed"
                );
                self.notify_order_placed(order).await;
            }
            Err(err) => {
                metrics::counter!("checkout_failures_total", "reason" => err.code()).increment(1);
                tracing::warn!(error = %err, kind = ?err.kind(), "checkout failed");
            }
        }
        result
    }

    async fn run_checkout(&self, request: CheckoutRequest) -> Result<Order> {
        if let Some(quantity) = request.selection.invalid_quantity() {
            return Err(EngineError::InvalidQuantity { quantity });
        }
        let payment_reference = request
            .payment_reference
            .filter(|reference| !reference.trim().is_empty());
        if request.payment_method.requires_verification() && payment_reference.is_none() {
            return Err(EngineError::MissingPaymentReference {
                method: request.payment_method,
            });
        }

        let now = Utc::now();
        let priced = pricing::price_selection(
            &self.store,
            request.customer_id,
            &request.selection,
            self.settings.missing_line_policy,
        )
        .await?;

        let applied = match request.coupon_name.as_deref() {
            Some(name) => Some(
                pricing::resolve_coupon(&self.store, name, request.customer_id, priced.subtotal, now)
                    .await?,
            ),
            None => None,
        };

        let delivery = quote::quote_delivery(
            &self.store,
            request.shipping_address_id,
            request.customer_id,
        )
        .await?;

        let totals = CheckoutTotals::compute(
            priced.subtotal,
            applied.as_ref().map(|a| a.discount).unwrap_or_default(),
            delivery.fee,
            self.settings.tax_rate_bps,
        );

        if request.payment_method.requires_verification()
            && let Some(reference) = payment_reference.as_deref()
        {
            verify_settlement(
                &self.payments,
                reference,
                totals.total,
                &self.settings.currency,
                self.settings.payment_timeout,
            )
            .await?;
        }

        let order = Order::place(
            PlaceOrder {
                customer_id: request.customer_id,
                items: priced.items,
                totals,
                payment_method: request.payment_method,
                coupon_id: applied.as_ref().map(|a| a.coupon.id),
                payment_reference,
                shipping_address_id: delivery.address.id,
            },
            now,
        )?;

        let coupon_claim = applied.as_ref().map(|a| CouponClaim {
            coupon_id: a.coupon.id,
            customer_id: request.customer_id,
            per_person_limit: a.coupon.per_person_limit,
        });
        let commit = OrderCommit {
            tracking: TrackingDetail::new(order.id, now),
            order,
            clear_cart_for: priced.from_cart.then_some(request.customer_id),
            coupon_claim,
        };

        self.store.commit_order(commit).await.map_err(|err| {
            EngineError::from_commit(err, applied.as_ref().map(|a| a.coupon.name.as_str()))
        })
    }

    async fn notify_order_placed(&self, order: &Order) {
        let context = serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "total_amount": order.total_amount,
            "currency": self.settings.currency,
        });
        let mut notifications = vec![Notification::to_operators("new_order", context.clone())];
        notifications.extend(Notification::to_customer(
            order.customer_id,
            TrackingStatus::OrderPlaced.template(),
            context,
        ));
        self.notifications.dispatch(notifications).await;
    }

    /// Records a fulfillment status and syncs the order status from it.
    ///
    /// Re-submitting the current status changes nothing and sends nothing.
    /// Cancelled and refunded orders no longer accept updates, and a status
    /// that would move the order back to an earlier stage is rejected.
    #[tracing::instrument(skip(self, update), fields(order_id = %order_id, status = %status))]
    pub async fn update_tracking_status(
        &self,
        order_id: OrderId,
        status: TrackingStatus,
        update: TrackingUpdate,
    ) -> Result<TrackingDetail> {
        let order = self.get_order(order_id).await?;
        if !order.status.accepts_tracking_updates() {
            return Err(EngineError::TrackingClosed {
                order_id,
                status: order.status,
            });
        }
        if !order.status.can_track_to(status.order_status()) {
            return Err(EngineError::TrackingRegression {
                order_id,
                current: order.status,
                requested: status,
                target: status.order_status(),
            });
        }

        let current = self
            .store
            .get_tracking(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let mut next = current.clone();
        let previous = match next.record(status, update.notes, Utc::now()) {
            Transition::Unchanged => {
                tracing::debug!("tracking status unchanged");
                return Ok(current);
            }
            Transition::Applied { previous } => previous,
        };
        let Some(entry) = next.status_history.last().cloned() else {
            return Ok(current);
        };

        let detail = self
            .store
            .append_tracking(TrackingChange {
                order_id,
                expected_history_len: current.status_history.len(),
                entry,
                carrier: update.carrier,
                tracking_number: update.tracking_number,
                order_status: status.order_status(),
            })
            .await?;

        metrics::counter!("tracking_transitions_total", "status" => status.as_str()).increment(1);
        tracing::info!(
            previous = %previous,
            order_status = %status.order_status(),
            "tracking status recorded"
        );

        let context = serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
            "status": status,
            "carrier": detail.carrier,
            "tracking_number": detail.tracking_number,
        });
        self.notifications
            .dispatch(Notification::to_customer(
                order.customer_id,
                status.template(),
                context,
            ))
            .await;

        Ok(detail)
    }

    /// Cancels an order that has not been delivered, cancelled or refunded.
    ///
    /// Orders that have not shipped yet are restocked.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub async fn cancel_order(&self, order_id: OrderId, actor: Actor) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        if let Actor::Customer(customer_id) = &actor
            && *customer_id != order.customer_id
        {
            return Err(EngineError::OrderNotFound(order_id));
        }

        let now = Utc::now();
        let previous = order.clone().cancel(now)?;

        let cancelled = self
            .store
            .cancel_order(OrderCancellation {
                order_id,
                expected_status: previous,
                restock: previous.restocks_on_cancel(),
                entry: TrackingEntry {
                    status: TrackingStatus::Returned,
                    timestamp: now,
                    notes: Some(format!("Order cancelled by {actor}")),
                },
                cancelled_at: now,
            })
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(previous = %previous, "order cancelled");

        let context = serde_json::json!({
            "order_id": cancelled.id,
            "order_number": cancelled.order_number,
            "cancelled_by": actor.to_string(),
        });
        let mut notifications = Notification::to_customer(
            cancelled.customer_id,
            "order_cancelled",
            context.clone(),
        );
        notifications.push(Notification::to_operators("order_cancelled", context));
        self.notifications.dispatch(notifications).await;

        Ok(cancelled)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// Returns the customer's orders, newest first.
    pub async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders(customer_id).await?)
    }

    pub async fn get_tracking(&self, order_id: OrderId) -> Result<TrackingDetail> {
        self.store
            .get_tracking(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// Waits for every notification dispatched so far.
    pub async fn drain_notifications(&self) {
        self.notifications.drain().await;
    }

    /// Returns the notifier, for inspection in tests.
    pub fn notifier(&self) -> &N {
        self.notifications.notifier()
    }
}

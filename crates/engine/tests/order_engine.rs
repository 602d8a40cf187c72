//! End-to-end engine scenarios against the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{AddressId, CouponId, CustomerId, ProductId, VariationId};
use domain::{
    Address, CartLine, CartLineTarget, Coupon, DiscountKind, Money, Order, OrderStatus,
    PaymentMethod, PaymentStatus, Product, TrackingStatus, Variation,
};
use engine::{
    Actor, CheckoutRequest, CheckoutSettings, EngineError, ErrorKind, InMemoryNotifier,
    InMemoryPaymentGateway, InvoiceStatus, MissingLinePolicy, OrderEngine, PaymentConfirmation,
    Selection, TrackingUpdate, TransactionStatus,
};
use store::{CartStore, InMemoryStore};

type TestEngine = OrderEngine<InMemoryStore, InMemoryPaymentGateway, InMemoryNotifier>;

const POSTAL_CODE: &str = "411001";
const FEE: i64 = 50;

struct TestHarness {
    engine: Arc<TestEngine>,
    store: InMemoryStore,
    payments: InMemoryPaymentGateway,
    notifier: InMemoryNotifier,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_settings(CheckoutSettings::default())
    }

    fn with_settings(settings: CheckoutSettings) -> Self {
        let store = InMemoryStore::new();
        let payments = InMemoryPaymentGateway::new();
        let notifier = InMemoryNotifier::new();
        let engine = OrderEngine::new(store.clone(), payments.clone(), notifier.clone(), settings);

        Self {
            engine: Arc::new(engine),
            store,
            payments,
            notifier,
        }
    }

    async fn product(&self, price: i64, stock: u32) -> Product {
        let product = Product {
            id: ProductId::new(),
            name: "Ceramic Mug".to_string(),
            discounted_price: Money::from_minor(price),
            actual_price: Money::from_minor(price + 20),
            stock,
        };
        self.store.insert_product(product.clone()).await;
        product
    }

    async fn variation(&self, product: &Product, price: i64, stock: u32) -> Variation {
        let variation = Variation {
            id: VariationId::new(),
            product_id: product.id,
            name: format!("{} (Large)", product.name),
            discounted_price: Money::from_minor(price),
            actual_price: Money::from_minor(price + 20),
            stock,
        };
        self.store.insert_variation(variation.clone()).await;
        variation
    }

    /// Registers a served address for a fresh customer.
    async fn customer(&self) -> (CustomerId, AddressId) {
        let customer_id = CustomerId::new();
        let address = Address {
            id: AddressId::new(),
            customer_id,
            recipient: "Asha Rao".to_string(),
            line1: "12 Lake Road".to_string(),
            line2: None,
            city: "Pune".to_string(),
            postal_code: POSTAL_CODE.to_string(),
            phone: None,
        };
        self.store.insert_address(address.clone()).await;
        self.store
            .set_delivery_fee(POSTAL_CODE, Money::from_minor(FEE))
            .await;
        (customer_id, address.id)
    }

    async fn coupon(&self, name: &str, kind: DiscountKind, value: i64, minimum: i64) -> Coupon {
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(),
            name: name.to_string(),
            kind,
            value,
            minimum_spent: Money::from_minor(minimum),
            valid_from: now - Duration::days(1),
            valid_till: now + Duration::days(7),
            per_person_limit: 1,
            usage_limit: None,
        };
        self.store.insert_coupon(coupon.clone()).await;
        coupon
    }

    async fn buy(
        &self,
        customer_id: CustomerId,
        address_id: AddressId,
        product: &Product,
        quantity: u32,
    ) -> Result<Order, EngineError> {
        self.engine
            .checkout(cash_request(
                customer_id,
                address_id,
                Selection::SingleProduct {
                    product_id: product.id,
                    variation_id: None,
                    quantity,
                },
            ))
            .await
    }
}

fn cash_request(
    customer_id: CustomerId,
    shipping_address_id: AddressId,
    selection: Selection,
) -> CheckoutRequest {
    CheckoutRequest {
        customer_id,
        selection,
        shipping_address_id,
        payment_method: PaymentMethod::CashOnDelivery,
        coupon_name: None,
        payment_reference: None,
    }
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn cart_checkout_with_shipping_totals_250() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        h.store.add_to_cart(customer, CartLine::product(a.id, 2)).await;

        let order = h
            .engine
            .checkout(cash_request(customer, address, Selection::Cart))
            .await
            .unwrap();

        assert_eq!(order.total_amount.minor(), 250);
        assert_eq!(order.subtotal.minor(), 200);
        assert_eq!(order.shipping_cost.minor(), FEE);
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(3));
        assert!(h.store.list_cart_lines(customer).await.unwrap().is_empty());

        let tracking = h.engine.get_tracking(order.id).await.unwrap();
        assert_eq!(tracking.status, TrackingStatus::OrderPlaced);
        assert_eq!(tracking.status_history.len(), 1);

        h.engine.drain_notifications().await;
        assert_eq!(h.notifier.count_for("new_order"), 1);
        assert_eq!(h.notifier.count_for("order_placed"), 2);
    }

    #[tokio::test]
    async fn single_product_checkout_leaves_cart_alone() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let b = h.product(40, 5).await;
        h.store.add_to_cart(customer, CartLine::product(b.id, 1)).await;

        h.buy(customer, address, &a, 1).await.unwrap();

        assert_eq!(h.store.list_cart_lines(customer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn variation_line_draws_from_variation_stock() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let large = h.variation(&a, 130, 2).await;
        h.store
            .add_to_cart(customer, CartLine::variation(large.id, 2))
            .await;

        let order = h
            .engine
            .checkout(cash_request(customer, address, Selection::Cart))
            .await
            .unwrap();

        assert_eq!(order.items[0].product_id, a.id);
        assert_eq!(order.items[0].variation_id, Some(large.id));
        assert_eq!(order.subtotal.minor(), 260);
        assert_eq!(
            h.store.stock_of(CartLineTarget::Variation(large.id)).await,
            Some(0)
        );
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_never_oversell() {
        const BUYERS: usize = 10;
        const STOCK: u32 = 3;

        let h = TestHarness::new();
        let a = h.product(100, STOCK).await;

        let mut handles = Vec::with_capacity(BUYERS);
        for _ in 0..BUYERS {
            let (customer, address) = h.customer().await;
            let engine = Arc::clone(&h.engine);
            let product_id = a.id;
            handles.push(tokio::spawn(async move {
                engine
                    .checkout(cash_request(
                        customer,
                        address,
                        Selection::SingleProduct {
                            product_id,
                            variation_id: None,
                            quantity: 1,
                        },
                    ))
                    .await
            }));
        }

        let mut succeeded = 0;
        let mut out_of_stock = 0;
        for result in futures_util::future::join_all(handles).await {
            match result.unwrap() {
                Ok(_) => succeeded += 1,
                Err(EngineError::InsufficientStock { .. }) => out_of_stock += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(succeeded, STOCK as usize);
        assert_eq!(out_of_stock, BUYERS - STOCK as usize);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(0));
        assert_eq!(h.store.order_count().await, STOCK as usize);
    }

    #[tokio::test]
    async fn failed_order_insert_leaves_nothing_behind() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let c = h.coupon("SAVE10", DiscountKind::Flat, 10, 0).await;
        h.store.add_to_cart(customer, CartLine::product(a.id, 2)).await;
        h.store.set_fail_on_order_insert(true).await;

        let mut request = cash_request(customer, address, Selection::Cart);
        request.coupon_name = Some(c.name.clone());
        let err = h.engine.checkout(request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.store.coupon_times_used(c.id).await, 0);
        assert_eq!(h.store.list_cart_lines(customer).await.unwrap().len(), 1);

        h.engine.drain_notifications().await;
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_before_any_read() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;

        let err = h
            .engine
            .checkout(cash_request(
                customer,
                address,
                Selection::SingleProduct {
                    product_id: ProductId::new(),
                    variation_id: None,
                    quantity: 0,
                },
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidQuantity { quantity: 0 }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;

        let err = h
            .engine
            .checkout(cash_request(customer, address, Selection::Cart))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyCart));
    }

    #[tokio::test]
    async fn missing_cart_line_fails_checkout_by_default() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let gone = h.product(70, 5).await;
        h.store.add_to_cart(customer, CartLine::product(a.id, 1)).await;
        h.store.add_to_cart(customer, CartLine::product(gone.id, 1)).await;
        h.store.remove_product(gone.id).await;

        let err = h
            .engine
            .checkout(cash_request(customer, address, Selection::Cart))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ProductNotFound(id) if id == gone.id));
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test]
    async fn missing_cart_line_is_skipped_when_configured() {
        let h = TestHarness::with_settings(CheckoutSettings {
            missing_line_policy: MissingLinePolicy::Skip,
            ..CheckoutSettings::default()
        });
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let gone = h.product(70, 5).await;
        h.store.add_to_cart(customer, CartLine::product(a.id, 1)).await;
        h.store.add_to_cart(customer, CartLine::product(gone.id, 1)).await;
        h.store.remove_product(gone.id).await;

        let order = h
            .engine
            .checkout(cash_request(customer, address, Selection::Cart))
            .await
            .unwrap();

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.total_amount.minor(), 100 + FEE);
    }

    #[tokio::test]
    async fn unserved_postal_code_is_undeliverable() {
        let h = TestHarness::new();
        let customer = CustomerId::new();
        let address = Address {
            id: AddressId::new(),
            customer_id: customer,
            recipient: "Ravi Iyer".to_string(),
            line1: "4 Hill Street".to_string(),
            line2: None,
            city: "Leh".to_string(),
            postal_code: "194101".to_string(),
            phone: None,
        };
        h.store.insert_address(address.clone()).await;
        let a = h.product(100, 5).await;

        let err = h.buy(customer, address.id, &a, 1).await.unwrap_err();

        assert!(matches!(err, EngineError::Undeliverable { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test]
    async fn tax_is_charged_on_discounted_subtotal() {
        let h = TestHarness::with_settings(CheckoutSettings {
            tax_rate_bps: 1_000,
            ..CheckoutSettings::default()
        });
        let (customer, address) = h.customer().await;
        let a = h.product(1_000, 5).await;
        h.coupon("FLAT200", DiscountKind::Flat, 200, 0).await;

        let mut request = cash_request(
            customer,
            address,
            Selection::SingleProduct {
                product_id: a.id,
                variation_id: None,
                quantity: 1,
            },
        );
        request.coupon_name = Some("FLAT200".to_string());
        let order = h.engine.checkout(request).await.unwrap();

        assert_eq!(order.tax_amount.minor(), 80);
        assert_eq!(order.total_amount.minor(), 1_000 - 200 + FEE + 80);
        assert_eq!(order.expected_total(), order.total_amount);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_checkout() {
        let h = TestHarness::new();
        h.notifier.set_fail_on_notify(true);
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;

        let order = h.buy(customer, address, &a, 1).await.unwrap();
        h.engine.drain_notifications().await;

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert!(h.notifier.sent().is_empty());
    }
}

mod coupons {
    use super::*;

    async fn buy_with_coupon(
        h: &TestHarness,
        customer: CustomerId,
        address: AddressId,
        product: &Product,
        coupon: &str,
    ) -> Result<Order, EngineError> {
        let mut request = cash_request(
            customer,
            address,
            Selection::SingleProduct {
                product_id: product.id,
                variation_id: None,
                quantity: 1,
            },
        );
        request.coupon_name = Some(coupon.to_string());
        h.engine.checkout(request).await
    }

    #[tokio::test]
    async fn minimum_spend_is_inclusive() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        h.coupon("BIG500", DiscountKind::Flat, 50, 500).await;
        let cheap = h.product(499, 5).await;
        let exact = h.product(500, 5).await;

        let err = buy_with_coupon(&h, customer, address, &cheap, "BIG500")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "coupon_minimum_not_met");

        let order = buy_with_coupon(&h, customer, address, &exact, "BIG500")
            .await
            .unwrap();
        assert_eq!(order.discount_amount.minor(), 50);
        assert_eq!(order.total_amount.minor(), 450 + FEE);
    }

    #[tokio::test]
    async fn flat_discount_never_goes_below_zero() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        h.coupon("FIFTY", DiscountKind::Flat, 50, 0).await;
        let tiny = h.product(10, 5).await;

        let order = buy_with_coupon(&h, customer, address, &tiny, "FIFTY")
            .await
            .unwrap();

        assert_eq!(order.discount_amount.minor(), 10);
        assert_eq!(order.total_amount.minor(), FEE);
    }

    #[tokio::test]
    async fn expired_and_unknown_coupons_are_rejected() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let now = Utc::now();
        h.store
            .insert_coupon(Coupon {
                id: CouponId::new(),
                name: "SUMMER".to_string(),
                kind: DiscountKind::Percentage,
                value: 20,
                minimum_spent: Money::zero(),
                valid_from: now - Duration::days(30),
                valid_till: now - Duration::days(1),
                per_person_limit: 1,
                usage_limit: None,
            })
            .await;

        let err = buy_with_coupon(&h, customer, address, &a, "SUMMER")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "coupon_expired");

        let err = buy_with_coupon(&h, customer, address, &a, "WINTER")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test]
    async fn per_person_limit_allows_one_use() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let c = h.coupon("WELCOME", DiscountKind::Percentage, 10, 0).await;
        let a = h.product(100, 5).await;

        buy_with_coupon(&h, customer, address, &a, "WELCOME")
            .await
            .unwrap();
        let err = buy_with_coupon(&h, customer, address, &a, "WELCOME")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::CouponPerPersonLimitReached { limit: 1, .. }
        ));
        assert_eq!(h.store.coupon_times_used(c.id).await, 1);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(4));
    }

    #[tokio::test]
    async fn global_limit_is_claimed_at_commit() {
        let h = TestHarness::new();
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(),
            name: "FIRST1".to_string(),
            kind: DiscountKind::Flat,
            value: 25,
            minimum_spent: Money::zero(),
            valid_from: now - Duration::days(1),
            valid_till: now + Duration::days(1),
            per_person_limit: 1,
            usage_limit: Some(1),
        };
        h.store.insert_coupon(coupon.clone()).await;
        let a = h.product(100, 5).await;

        let (first, first_address) = h.customer().await;
        let (second, second_address) = h.customer().await;
        buy_with_coupon(&h, first, first_address, &a, "FIRST1")
            .await
            .unwrap();
        let err = buy_with_coupon(&h, second, second_address, &a, "FIRST1")
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::CouponLimitReached { ref name } if name == "FIRST1"));
        assert_eq!(h.store.coupon_times_used(coupon.id).await, 1);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(4));
    }
}

mod payments {
    use super::*;

    fn card_request(
        customer: CustomerId,
        address: AddressId,
        product: &Product,
        reference: Option<&str>,
    ) -> CheckoutRequest {
        CheckoutRequest {
            payment_method: PaymentMethod::Card,
            payment_reference: reference.map(str::to_string),
            ..cash_request(
                customer,
                address,
                Selection::SingleProduct {
                    product_id: product.id,
                    variation_id: None,
                    quantity: 1,
                },
            )
        }
    }

    #[tokio::test]
    async fn settled_payment_completes_the_order() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;
        h.payments.insert(
            "pay_ok",
            PaymentConfirmation::settled(Money::from_minor(200 + FEE), "INR"),
        );

        let order = h
            .engine
            .checkout(card_request(customer, address, &a, Some("pay_ok")))
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Completed);
        assert_eq!(order.payment_reference.as_deref(), Some("pay_ok"));
        assert_eq!(h.payments.call_count(), 1);
    }

    #[tokio::test]
    async fn online_payment_requires_a_reference() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;

        let err = h
            .engine
            .checkout(card_request(customer, address, &a, Some("  ")))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::MissingPaymentReference { .. }));
        assert_eq!(h.payments.call_count(), 0);
    }

    #[tokio::test]
    async fn unsettled_payment_touches_no_stock() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;
        h.payments.insert(
            "pay_pending",
            PaymentConfirmation {
                invoice_status: InvoiceStatus::Pending,
                transaction_status: TransactionStatus::Pending,
                amount: Money::from_minor(200 + FEE),
                currency: "INR".to_string(),
            },
        );

        let err = h
            .engine
            .checkout(card_request(customer, address, &a, Some("pay_pending")))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PaymentNotCompleted { .. }));
        assert_eq!(err.kind(), ErrorKind::ExternalDependency);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn underpayment_is_a_mismatch() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;
        h.payments.insert(
            "pay_short",
            PaymentConfirmation::settled(Money::from_minor(200), "INR"),
        );

        let err = h
            .engine
            .checkout(card_request(customer, address, &a, Some("pay_short")))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PaymentMismatch { .. }));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_verification() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;
        h.payments.set_fail_on_verify(true);

        let err = h
            .engine
            .checkout(card_request(customer, address, &a, Some("pay_any")))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "payment_verification_failed");
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test]
    async fn one_payment_pays_for_one_order() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(200, 5).await;
        h.payments.insert(
            "pay_once",
            PaymentConfirmation::settled(Money::from_minor(200 + FEE), "INR"),
        );

        let first = h
            .engine
            .checkout(card_request(customer, address, &a, Some("pay_once")))
            .await
            .unwrap();
        assert_eq!(first.payment_status, PaymentStatus::Completed);

        for _ in 0..2 {
            let err = h
                .engine
                .checkout(card_request(customer, address, &a, Some("pay_once")))
                .await
                .unwrap_err();
            assert!(
                matches!(err, EngineError::PaymentReferenceUsed { ref reference } if reference == "pay_once")
            );
            assert_eq!(err.kind(), ErrorKind::Conflict);
            assert!(!err.is_retryable());
        }

        assert_eq!(h.store.order_count().await, 1);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(4));
    }
}

mod fulfillment {
    use super::*;

    async fn placed_order(h: &TestHarness) -> (Order, Product) {
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 2).await.unwrap();
        h.engine.drain_notifications().await;
        (order, a)
    }

    #[tokio::test]
    async fn repeated_status_records_and_notifies_once() {
        let h = TestHarness::new();
        let (order, _) = placed_order(&h).await;

        let first = h
            .engine
            .update_tracking_status(order.id, TrackingStatus::Shipped, TrackingUpdate::default())
            .await
            .unwrap();
        let second = h
            .engine
            .update_tracking_status(order.id, TrackingStatus::Shipped, TrackingUpdate::default())
            .await
            .unwrap();
        h.engine.drain_notifications().await;

        assert_eq!(first.status_history.len(), 2);
        assert_eq!(second.status_history.len(), 2);
        assert_eq!(h.notifier.count_for("order_shipped"), 2);
        assert_eq!(
            h.engine.get_order(order.id).await.unwrap().status,
            OrderStatus::Shipped
        );
    }

    #[tokio::test]
    async fn tracking_status_drives_order_status() {
        let h = TestHarness::new();
        let (order, _) = placed_order(&h).await;

        for (tracking, expected) in [
            (TrackingStatus::Processing, OrderStatus::Processing),
            (TrackingStatus::ReadyToShip, OrderStatus::Processing),
            (TrackingStatus::InTransit, OrderStatus::Shipped),
            (TrackingStatus::OutForDelivery, OrderStatus::Shipped),
            (TrackingStatus::Delivered, OrderStatus::Delivered),
        ] {
            h.engine
                .update_tracking_status(order.id, tracking, TrackingUpdate::default())
                .await
                .unwrap();
            assert_eq!(h.engine.get_order(order.id).await.unwrap().status, expected);
        }

        let tracking = h.engine.get_tracking(order.id).await.unwrap();
        assert_eq!(tracking.status_history.len(), 6);
        assert_eq!(tracking.status, TrackingStatus::Delivered);
    }

    #[tokio::test]
    async fn returned_cancels_the_order_and_closes_tracking() {
        let h = TestHarness::new();
        let (order, a) = placed_order(&h).await;

        h.engine
            .update_tracking_status(order.id, TrackingStatus::Returned, TrackingUpdate::default())
            .await
            .unwrap();
        assert_eq!(
            h.engine.get_order(order.id).await.unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(3));

        let err = h
            .engine
            .update_tracking_status(order.id, TrackingStatus::Shipped, TrackingUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TrackingClosed { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn delivered_order_cannot_be_reopened() {
        let h = TestHarness::new();
        let (order, a) = placed_order(&h).await;
        h.engine
            .update_tracking_status(order.id, TrackingStatus::Delivered, TrackingUpdate::default())
            .await
            .unwrap();

        for status in [
            TrackingStatus::Processing,
            TrackingStatus::OrderPlaced,
            TrackingStatus::OutForDelivery,
        ] {
            let err = h
                .engine
                .update_tracking_status(order.id, status, TrackingUpdate::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EngineError::TrackingRegression {
                    current: OrderStatus::Delivered,
                    ..
                }
            ));
            assert_eq!(err.kind(), ErrorKind::Conflict);
        }

        let err = h
            .engine
            .cancel_order(order.id, Actor::Customer(order.customer_id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            h.engine.get_order(order.id).await.unwrap().status,
            OrderStatus::Delivered
        );
        assert_eq!(h.engine.get_tracking(order.id).await.unwrap().status_history.len(), 2);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(3));
    }

    #[tokio::test]
    async fn delivered_order_can_still_be_returned() {
        let h = TestHarness::new();
        let (order, a) = placed_order(&h).await;
        h.engine
            .update_tracking_status(order.id, TrackingStatus::Delivered, TrackingUpdate::default())
            .await
            .unwrap();

        h.engine
            .update_tracking_status(order.id, TrackingStatus::Returned, TrackingUpdate::default())
            .await
            .unwrap();

        assert_eq!(
            h.engine.get_order(order.id).await.unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(3));
    }

    #[tokio::test]
    async fn carrier_details_are_kept_across_updates() {
        let h = TestHarness::new();
        let (order, _) = placed_order(&h).await;

        h.engine
            .update_tracking_status(
                order.id,
                TrackingStatus::Shipped,
                TrackingUpdate {
                    notes: Some("Handed to courier".to_string()),
                    carrier: Some("BlueDart".to_string()),
                    tracking_number: Some("BD123456".to_string()),
                },
            )
            .await
            .unwrap();
        let detail = h
            .engine
            .update_tracking_status(order.id, TrackingStatus::InTransit, TrackingUpdate::default())
            .await
            .unwrap();

        assert_eq!(detail.carrier.as_deref(), Some("BlueDart"));
        assert_eq!(detail.tracking_number.as_deref(), Some("BD123456"));
        assert_eq!(
            detail.status_history[1].notes.as_deref(),
            Some("Handed to courier")
        );
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = TestHarness::new();
        let err = h
            .engine
            .update_tracking_status(
                common::OrderId::new(),
                TrackingStatus::Shipped,
                TrackingUpdate::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn confirmed_order_is_cancelled_and_restocked() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 2).await.unwrap();

        let cancelled = h
            .engine
            .cancel_order(order.id, Actor::Customer(customer))
            .await
            .unwrap();
        h.engine.drain_notifications().await;

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));

        let tracking = h.engine.get_tracking(order.id).await.unwrap();
        assert_eq!(tracking.status, TrackingStatus::Returned);
        assert_eq!(
            tracking.status_history.last().and_then(|e| e.notes.as_deref()),
            Some("Order cancelled by customer")
        );
        assert_eq!(h.notifier.count_for("order_cancelled"), 3);
    }

    #[tokio::test]
    async fn pending_order_can_be_cancelled() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 1).await.unwrap();
        h.store
            .force_order_status(order.id, OrderStatus::Pending)
            .await;

        let cancelled = h
            .engine
            .cancel_order(order.id, Actor::Operator("ops".to_string()))
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(
            h.engine.get_tracking(order.id).await.unwrap().status,
            TrackingStatus::Returned
        );
    }

    #[tokio::test]
    async fn shipped_order_is_cancelled_without_restock() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 2).await.unwrap();
        h.engine
            .update_tracking_status(order.id, TrackingStatus::Shipped, TrackingUpdate::default())
            .await
            .unwrap();

        h.engine
            .cancel_order(order.id, Actor::Operator("ops".to_string()))
            .await
            .unwrap();

        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(3));
    }

    #[tokio::test]
    async fn delivered_order_cannot_be_cancelled() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 1).await.unwrap();
        h.engine
            .update_tracking_status(order.id, TrackingStatus::Delivered, TrackingUpdate::default())
            .await
            .unwrap();

        let err = h
            .engine
            .cancel_order(order.id, Actor::Customer(customer))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            h.engine.get_order(order.id).await.unwrap().status,
            OrderStatus::Delivered
        );
    }

    #[tokio::test]
    async fn cancelling_twice_is_a_conflict() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 1).await.unwrap();

        h.engine
            .cancel_order(order.id, Actor::Customer(customer))
            .await
            .unwrap();
        let err = h
            .engine
            .cancel_order(order.id, Actor::Customer(customer))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(h.store.stock_of(CartLineTarget::Product(a.id)).await, Some(5));
    }

    #[tokio::test]
    async fn customers_cannot_cancel_each_others_orders() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let order = h.buy(customer, address, &a, 1).await.unwrap();

        let err = h
            .engine
            .cancel_order(order.id, Actor::Customer(CustomerId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn orders_are_listed_newest_first() {
        let h = TestHarness::new();
        let (customer, address) = h.customer().await;
        let a = h.product(100, 5).await;
        let first = h.buy(customer, address, &a, 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = h.buy(customer, address, &a, 1).await.unwrap();

        let orders = h.engine.list_orders(customer).await.unwrap();
        assert_eq!(
            orders.iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
    }
}

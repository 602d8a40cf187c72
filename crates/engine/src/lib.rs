//! The order lifecycle engine.
//!
//! A checkout flows through these steps:
//! 1. Price the selection (single product or whole cart) and apply a coupon
//! 2. Quote the delivery fee for the shipping address
//! 3. Verify the external payment for non-cash orders
//! 4. Commit stock, order, coupon usage and tracking in one unit of work
//! 5. Notify operators and the customer in the background
//!
//! Tracking updates and cancellations then drive the order through its
//! fulfillment states.

pub mod engine;
pub mod error;
pub mod pricing;
pub mod quote;
pub mod services;
pub mod settings;

pub use engine::{Actor, CheckoutRequest, OrderEngine, TrackingUpdate};
pub use error::{EngineError, ErrorKind, Result};
pub use pricing::{AppliedCoupon, PricedSelection, Selection};
pub use quote::DeliveryQuote;
pub use services::{
    Channel, GatewayError, HttpPaymentGateway, InMemoryNotifier, InMemoryPaymentGateway,
    InvoiceStatus, LoggingNotifier, Notification, NotificationDispatcher, Notifier, NotifyError,
    PaymentConfirmation, PaymentGateway, Recipient, TransactionStatus,
};
pub use settings::{CheckoutSettings, MissingLinePolicy};

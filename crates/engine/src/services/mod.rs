//! External service traits and in-memory implementations for checkout.

pub mod notification;
pub mod payment;

pub use notification::{
    Channel, InMemoryNotifier, LoggingNotifier, Notification, NotificationDispatcher, Notifier,
    NotifyError, Recipient,
};
pub use payment::{
    GatewayError, HttpPaymentGateway, InMemoryPaymentGateway, InvoiceStatus, PaymentConfirmation,
    PaymentGateway, TransactionStatus, verify_settlement,
};

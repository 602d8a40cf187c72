//! Customer and operator notifications.
//!
//! Delivery is best effort: the dispatcher runs each delivery as a detached
//! task, and a failed delivery is logged and counted, never returned.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::CustomerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

/// Who a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Customer(CustomerId),
    /// The store's operations staff.
    Operators,
}

/// How a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Push,
    /// The operator inbox.
    Operator,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
            Channel::Operator => "operator",
        }
    }
}

/// A single delivery on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub channel: Channel,
    pub template: String,
    pub context: serde_json::Value,
}

impl Notification {
    /// Builds one notification per customer channel (email and push).
    pub fn to_customer(
        customer_id: CustomerId,
        template: &str,
        context: serde_json::Value,
    ) -> Vec<Notification> {
        [Channel::Email, Channel::Push]
            .into_iter()
            .map(|channel| Notification {
                recipient: Recipient::Customer(customer_id),
                channel,
                template: template.to_string(),
                context: context.clone(),
            })
            .collect()
    }

    /// Builds a notification for the operator inbox.
    pub fn to_operators(template: &str, context: serde_json::Value) -> Notification {
        Notification {
            recipient: Recipient::Operators,
            channel: Channel::Operator,
            template: template.to_string(),
            context,
        }
    }
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Trait for delivering notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        (**self).notify(notification).await
    }
}

/// Notifier that only writes deliveries to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            channel = notification.channel.as_str(),
            template = %notification.template,
            recipient = ?notification.recipient,
            "notification sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail_on_notify: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    /// Creates a new in-memory notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every following delivery to fail.
    pub fn set_fail_on_notify(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on_notify = fail;
        }
    }

    /// Returns every successful delivery so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Returns how many deliveries used `template`.
    pub fn count_for(&self, template: &str) -> usize {
        self.sent()
            .iter()
            .filter(|n| n.template == template)
            .count()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| NotifyError(e.to_string()))?;
        if state.fail_on_notify {
            return Err(NotifyError(format!(
                "{} channel unavailable",
                notification.channel.as_str()
            )));
        }
        state.sent.push(notification.clone());
        Ok(())
    }
}

/// Runs deliveries in the background and keeps track of them so that they
/// can be awaited on shutdown.
pub struct NotificationDispatcher<N: Notifier> {
    notifier: Arc<N>,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl<N: Notifier> NotificationDispatcher<N> {
    pub fn new(notifier: N) -> Self {
        Self {
            notifier: Arc::new(notifier),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Returns the underlying notifier.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Schedules every notification for delivery and returns immediately.
    pub async fn dispatch(&self, notifications: Vec<Notification>) {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}

        for notification in notifications {
            let notifier = Arc::clone(&self.notifier);
            tasks.spawn(async move {
                if let Err(err) = notifier.notify(&notification).await {
                    metrics::counter!(
                        "notifications_failed_total",
                        "channel" => notification.channel.as_str()
                    )
                    .increment(1);
                    tracing::warn!(
                        error = %err,
                        channel = notification.channel.as_str(),
                        template = %notification.template,
                        "notification delivery failed"
                    );
                }
            });
        }
    }

    /// Waits for every scheduled delivery to finish.
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
    }
}

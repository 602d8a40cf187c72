//! Payment gateway trait, in-memory and HTTP implementations, and the
//! settlement check run before a paid order is committed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::Money;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;

/// Invoice-level state reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Paid,
    Pending,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Unknown => "unknown",
        }
    }
}

/// Transaction-level state reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Pending,
    Failed,
    #[serde(other)]
    Unknown,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Unknown => "unknown",
        }
    }
}

/// What the gateway knows about a payment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub invoice_status: InvoiceStatus,
    pub transaction_status: TransactionStatus,
    /// Amount paid, in minor units.
    pub amount: Money,
    pub currency: String,
}

impl PaymentConfirmation {
    /// A settled payment: invoice paid and transaction successful.
    pub fn settled(amount: Money, currency: impl Into<String>) -> Self {
        Self {
            invoice_status: InvoiceStatus::Paid,
            transaction_status: TransactionStatus::Success,
            amount,
            currency: currency.into(),
        }
    }

    /// Returns true only for a paid invoice with a successful transaction.
    pub fn is_settled(&self) -> bool {
        matches!(
            (self.invoice_status, self.transaction_status),
            (InvoiceStatus::Paid, TransactionStatus::Success)
        )
    }
}

/// Errors raised while talking to the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment reference not found")]
    NotFound,

    #[error("Gateway responded with status {status}")]
    Rejected { status: u16 },

    #[error("Gateway unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed gateway response: {0}")]
    Malformed(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid payment reference: {0:?}")]
    InvalidReference(String),
}

/// Trait for looking up external payments.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the gateway's view of `reference`.
    async fn verify(&self, reference: &str) -> Result<PaymentConfirmation, GatewayError>;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn verify(&self, reference: &str) -> Result<PaymentConfirmation, GatewayError> {
        (**self).verify(reference).await
    }
}

/// Checks that `reference` is settled for exactly `expected` in `currency`.
///
/// The gateway call is bounded by `timeout`; running out of time fails the
/// check like any other gateway error. Nothing is written either way.
#[tracing::instrument(skip(gateway), fields(expected = %expected))]
pub async fn verify_settlement<G: PaymentGateway + ?Sized>(
    gateway: &G,
    reference: &str,
    expected: Money,
    currency: &str,
    timeout: Duration,
) -> Result<PaymentConfirmation, EngineError> {
    let failed = |reason: String| EngineError::PaymentVerificationFailed {
        reference: reference.to_string(),
        reason,
    };

    let confirmation = tokio::time::timeout(timeout, gateway.verify(reference))
        .await
        .map_err(|_| failed(format!("no response within {}ms", timeout.as_millis())))?
        .map_err(|e| failed(e.to_string()))?;

    if !confirmation.is_settled() {
        return Err(EngineError::PaymentNotCompleted {
            reference: reference.to_string(),
            invoice_status: confirmation.invoice_status.as_str().to_string(),
            transaction_status: confirmation.transaction_status.as_str().to_string(),
        });
    }

    if confirmation.amount != expected || !confirmation.currency.eq_ignore_ascii_case(currency) {
        return Err(EngineError::PaymentMismatch {
            reference: reference.to_string(),
            expected,
            expected_currency: currency.to_string(),
            paid: confirmation.amount,
            paid_currency: confirmation.currency,
        });
    }

    tracing::info!("payment verified");
    Ok(confirmation)
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    payments: HashMap<String, PaymentConfirmation>,
    calls: usize,
    fail_on_verify: bool,
    delay: Option<Duration>,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway with no payments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the gateway's answer for `reference`.
    pub fn insert(&self, reference: impl Into<String>, confirmation: PaymentConfirmation) {
        if let Ok(mut state) = self.state.write() {
            state.payments.insert(reference.into(), confirmation);
        }
    }

    /// Configures the gateway to be unreachable.
    pub fn set_fail_on_verify(&self, fail: bool) {
        if let Ok(mut state) = self.state.write() {
            state.fail_on_verify = fail;
        }
    }

    /// Delays every answer by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut state) = self.state.write() {
            state.delay = delay;
        }
    }

    /// Returns how many verifications were requested.
    pub fn call_count(&self) -> usize {
        self.state.read().map(|s| s.calls).unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn verify(&self, reference: &str) -> Result<PaymentConfirmation, GatewayError> {
        let (delay, outcome) = {
            let mut state = self
                .state
                .write()
                .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
            state.calls += 1;
            let outcome = if state.fail_on_verify {
                Err(GatewayError::Unreachable("connection refused".to_string()))
            } else {
                state
                    .payments
                    .get(reference)
                    .cloned()
                    .ok_or(GatewayError::NotFound)
            };
            (state.delay, outcome)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

/// Payment gateway reached over HTTP.
///
/// Looks payments up with `GET {base_url}/payments/{reference}`, where the
/// reference is sent as a single percent-encoded path segment.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpPaymentGateway {
    /// Creates a client whose requests give up after `timeout`.
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {e}", base_url.as_ref())))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// URL of the payment resource for `reference`.
    fn payment_url(&self, reference: &str) -> Result<Url, GatewayError> {
        // Dot segments are dropped rather than encoded when pushed.
        if reference.is_empty() || reference == "." || reference == ".." {
            return Err(GatewayError::InvalidReference(reference.to_string()));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("payments")
            .push(reference);
        url.set_query(None);
        Ok(url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self))]
    async fn verify(&self, reference: &str) -> Result<PaymentConfirmation, GatewayError> {
        let mut request = self.client.get(self.payment_url(reference)?);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<PaymentConfirmation>()
                .await
                .map_err(|e| GatewayError::Malformed(e.to_string())),
            reqwest::StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
            status => Err(GatewayError::Rejected {
                status: status.as_u16(),
            }),
        }
    }
}

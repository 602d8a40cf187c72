//! Checkout settings supplied by the host application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a cart line whose product or variation no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLinePolicy {
    /// Fail the checkout with a not-found error.
    #[default]
    Reject,
    /// Drop the line and price the rest of the cart.
    Skip,
}

impl std::str::FromStr for MissingLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(MissingLinePolicy::Reject),
            "skip" => Ok(MissingLinePolicy::Skip),
            other => Err(format!("unknown missing line policy '{other}'")),
        }
    }
}

/// Store-wide checkout parameters.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// ISO 4217 code every order is charged in.
    pub currency: String,
    /// Tax on the discounted subtotal, in basis points.
    pub tax_rate_bps: u32,
    pub missing_line_policy: MissingLinePolicy,
    /// Upper bound on a payment verification call.
    pub payment_timeout: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            tax_rate_bps: 0,
            missing_line_policy: MissingLinePolicy::default(),
            payment_timeout: Duration::from_secs(10),
        }
    }
}

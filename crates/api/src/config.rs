//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use engine::{CheckoutSettings, MissingLinePolicy};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `"0.0.0.0"`) and `PORT` (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used
///   when unset
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `PAYMENT_GATEWAY_URL` and `PAYMENT_GATEWAY_API_KEY`
/// - `PAYMENT_VERIFY_TIMEOUT_MS` (default `10000`)
/// - `STORE_CURRENCY` (default `"INR"`)
/// - `TAX_RATE_BPS` (default `0`)
/// - `CART_MISSING_LINE_POLICY`: `reject` (default) or `skip`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment_gateway_url: Option<String>,
    pub payment_gateway_api_key: Option<String>,
    pub payment_verify_timeout: Duration,
    pub currency: String,
    pub tax_rate_bps: u32,
    pub missing_line_policy: MissingLinePolicy,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            payment_gateway_url: var("PAYMENT_GATEWAY_URL"),
            payment_gateway_api_key: var("PAYMENT_GATEWAY_API_KEY"),
            payment_verify_timeout: var("PAYMENT_VERIFY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_verify_timeout),
            currency: var("STORE_CURRENCY")
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(defaults.currency),
            tax_rate_bps: parsed("TAX_RATE_BPS", defaults.tax_rate_bps),
            missing_line_policy: parsed(
                "CART_MISSING_LINE_POLICY",
                defaults.missing_line_policy,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the settings handed to the order engine.
    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            currency: self.currency.clone(),
            tax_rate_bps: self.tax_rate_bps,
            missing_line_policy: self.missing_line_policy,
            payment_timeout: self.payment_verify_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let checkout = CheckoutSettings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            payment_gateway_url: None,
            payment_gateway_api_key: None,
            payment_verify_timeout: checkout.payment_timeout,
            currency: checkout.currency,
            tax_rate_bps: checkout.tax_rate_bps,
            missing_line_policy: checkout.missing_line_policy,
        }
    }
}

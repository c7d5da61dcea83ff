//! Fulfillment configuration.
//!
//! An explicit value handed to the services; nothing is cached globally.

use std::time::Duration;

use thiserror::Error;

use mesa_inventory::UnresolvedProductPolicy;

pub const ENV_TX_TIMEOUT_MS: &str = "MESA_TX_TIMEOUT_MS";
pub const ENV_MAX_SYSTEM_RETRIES: &str = "MESA_MAX_SYSTEM_RETRIES";
pub const ENV_RETRY_BACKOFF_MS: &str = "MESA_RETRY_BACKOFF_MS";
pub const ENV_STRICT_PRODUCTS: &str = "MESA_STRICT_PRODUCTS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FulfillmentConfig {
    /// Upper bound for one store call; exceeding it rolls the call back.
    pub transaction_timeout: Duration,
    /// Extra attempts after a system error. Other errors are never retried.
    pub max_system_retries: u32,
    pub retry_backoff: Duration,
    pub unresolved_products: UnresolvedProductPolicy,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(5),
            max_system_retries: 2,
            retry_backoff: Duration::from_millis(50),
            unresolved_products: UnresolvedProductPolicy::Skip,
        }
    }
}

impl FulfillmentConfig {
    /// Read overrides from the process environment; unset keys keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TX_TIMEOUT_MS) {
            let ms = parse_u64(ENV_TX_TIMEOUT_MS, &raw)?;
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: ENV_TX_TIMEOUT_MS,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.transaction_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup(ENV_MAX_SYSTEM_RETRIES) {
            config.max_system_retries =
                raw.trim().parse().map_err(|e| ConfigError::Invalid {
                    key: ENV_MAX_SYSTEM_RETRIES,
                    reason: format!("{e}"),
                })?;
        }

        if let Some(raw) = lookup(ENV_RETRY_BACKOFF_MS) {
            config.retry_backoff = Duration::from_millis(parse_u64(ENV_RETRY_BACKOFF_MS, &raw)?);
        }

        if let Some(raw) = lookup(ENV_STRICT_PRODUCTS) {
            config.unresolved_products = if parse_flag(ENV_STRICT_PRODUCTS, &raw)? {
                UnresolvedProductPolicy::Reject
            } else {
                UnresolvedProductPolicy::Skip
            };
        }

        Ok(config)
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{e}"),
    })
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

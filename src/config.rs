//! Runtime configuration.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `LEDGER__SECTION__KEY` environment variables.

use crate::domain::money::percent_of;
use crate::domain::order::FeeSchedule;
use crate::domain::recharge::ServiceType;
use crate::error::Result;
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub currency: String,
    pub fees: FeeSchedule,
    pub orders: OrdersConfig,
    pub webhook: WebhookConfig,
    pub reconciliation: ReconciliationConfig,
    pub sequence: SequenceConfig,
    pub recharge: RechargeConfig,
    pub journal: JournalConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            fees: FeeSchedule::default(),
            orders: OrdersConfig::default(),
            webhook: WebhookConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            sequence: SequenceConfig::default(),
            recharge: RechargeConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Loads defaults, then `path` (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("LEDGER").separator("__"));
        let config: LedgerConfig = builder.build()?.try_deserialize()?;
        config.fees.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrdersConfig {
    /// Gateway name stamped on orders created without an explicit provider.
    pub provider: String,
    /// CREATED orders older than this are expired by `expire_stale`.
    pub expire_after_minutes: i64,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            provider: "gateway".to_string(),
            expire_after_minutes: 30,
        }
    }
}

/// Shared secrets for webhook HMAC verification, keyed by provider name.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WebhookConfig {
    pub secrets: HashMap<String, String>,
}

impl WebhookConfig {
    pub fn secret_for(&self, provider: &str) -> Option<&str> {
        self.secrets
            .get(&provider.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Attempts per callback before a storage failure is surfaced.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 20,
        }
    }
}

impl ReconciliationConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequenceConfig {
    pub max_attempts: u32,
    pub order_namespace: String,
    pub recharge_namespace: String,
    pub request_namespace: String,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            order_namespace: "ORD".to_string(),
            recharge_namespace: "RCH".to_string(),
            request_namespace: "WRQ".to_string(),
        }
    }
}

/// Commission paid to the retailer on a successful recharge.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CommissionRule {
    Flat(Decimal),
    Percent(Decimal),
}

impl CommissionRule {
    pub fn amount_for(&self, base: Decimal) -> Decimal {
        match *self {
            CommissionRule::Flat(value) => value.max(Decimal::ZERO),
            CommissionRule::Percent(pct) => percent_of(base, pct).max(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RechargeConfig {
    pub provider: String,
    /// Keyed by lowercase service type (`mobile`, `dth`, ...).
    pub commission: HashMap<String, CommissionRule>,
}

impl Default for RechargeConfig {
    fn default() -> Self {
        Self {
            provider: "recharge".to_string(),
            commission: HashMap::new(),
        }
    }
}

impl RechargeConfig {
    pub fn commission_for(&self, service_type: ServiceType, amount: Decimal) -> Decimal {
        self.commission
            .get(service_type.as_str())
            .map_or(Decimal::ZERO, |rule| rule.amount_for(amount))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub page_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

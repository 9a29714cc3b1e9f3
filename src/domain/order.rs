use super::money::{Amount, percent_of, round_minor};
use super::{EntryId, OrderId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform fee component of a [`FeeSchedule`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFee {
    #[default]
    None,
    Flat(Decimal),
    Percent(Decimal),
}

/// Deterministic fee rules applied on top of an order's base amount.
///
/// Every component is computed on the base amount and rounded half-up to the
/// minor unit on its own, so `total == base + tax + platform` holds exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeeSchedule {
    pub tax_percent: Decimal,
    pub platform_fee: PlatformFee,
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<()> {
        let negative = match self.platform_fee {
            PlatformFee::None => false,
            PlatformFee::Flat(v) | PlatformFee::Percent(v) => v < Decimal::ZERO,
        };
        if self.tax_percent < Decimal::ZERO || negative {
            return Err(LedgerError::ValidationError(
                "Fee schedule components must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn breakdown(&self, base: Amount) -> Result<FeeBreakdown> {
        self.validate()?;
        let base_value = base.value();
        let tax = percent_of(base_value, self.tax_percent);
        let platform = match self.platform_fee {
            PlatformFee::None => Decimal::ZERO,
            PlatformFee::Flat(fee) => round_minor(fee),
            PlatformFee::Percent(pct) => percent_of(base_value, pct),
        };
        let total = Amount::new(base_value + tax + platform)?;
        Ok(FeeBreakdown {
            base,
            tax,
            platform,
            total,
        })
    }
}

/// Itemised amounts of an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub base: Amount,
    pub tax: Decimal,
    pub platform: Decimal,
    pub total: Amount,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Paid,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            OrderStatus::Created => false,
            OrderStatus::Paid | OrderStatus::Failed | OrderStatus::Expired => true,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// What a successful order does to the wallet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPurpose {
    /// Gateway-collected top-up. Credits `base` when paid; fees stay with the gateway.
    Deposit,
    /// Wallet-funded purchase. `total` is debited when the order is created and
    /// refunded once if the order fails or expires.
    Purchase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub order_ref: String,
    pub provider: String,
    pub provider_order_id: Option<String>,
    pub purpose: OrderPurpose,
    pub fees: FeeBreakdown,
    pub status: OrderStatus,
    pub callback_received: bool,
    /// Journal entry that debited the wallet up front (purchases only).
    pub debit_entry_id: Option<EntryId>,
    /// Optimistic-concurrency counter, bumped on every update.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    /// Amount the provider is expected to report for this order.
    pub fn expected_amount(&self) -> Amount {
        self.fees.total
    }

    pub fn is_processed(&self) -> bool {
        self.callback_received && self.status.is_terminal()
    }
}

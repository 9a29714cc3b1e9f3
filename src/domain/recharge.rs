use super::money::Amount;
use super::{EntryId, RechargeId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Mobile,
    Dth,
    Electricity,
    Water,
    Gas,
    Broadband,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Mobile => "mobile",
            ServiceType::Dth => "dth",
            ServiceType::Electricity => "electricity",
            ServiceType::Water => "water",
            ServiceType::Gas => "gas",
            ServiceType::Broadband => "broadband",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" | "prepaid" | "postpaid" => Ok(ServiceType::Mobile),
            "dth" => Ok(ServiceType::Dth),
            "electricity" => Ok(ServiceType::Electricity),
            "water" => Ok(ServiceType::Water),
            "gas" => Ok(ServiceType::Gas),
            "broadband" => Ok(ServiceType::Broadband),
            other => Err(format!("unknown service type '{other}'")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RechargeStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl RechargeStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            RechargeStatus::Pending => false,
            RechargeStatus::Success | RechargeStatus::Failed | RechargeStatus::Refunded => true,
        }
    }
}

impl fmt::Display for RechargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RechargeStatus::Pending => "PENDING",
            RechargeStatus::Success => "SUCCESS",
            RechargeStatus::Failed => "FAILED",
            RechargeStatus::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// What a user asks to recharge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RechargeRequest {
    pub service_type: ServiceType,
    pub operator: String,
    pub number: String,
    pub amount: Amount,
}

/// A telecom/utility recharge. The wallet is debited when the recharge is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RechargeTransaction {
    pub id: RechargeId,
    pub user_id: UserId,
    pub order_ref: String,
    pub service_type: ServiceType,
    pub operator: String,
    pub number: String,
    pub amount: Amount,
    pub commission_amount: Decimal,
    pub provider: String,
    pub provider_txn_id: Option<String>,
    pub operator_transaction_id: Option<String>,
    pub status: RechargeStatus,
    pub callback_received: bool,
    /// Journal entry that took the funds at submission, if any.
    pub debit_entry_id: Option<EntryId>,
    /// Optimistic-concurrency counter, bumped on every update.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RechargeTransaction {
    pub fn is_processed(&self) -> bool {
        self.callback_received && self.status.is_terminal()
    }

    pub fn was_debited(&self) -> bool {
        self.debit_entry_id.is_some()
    }
}

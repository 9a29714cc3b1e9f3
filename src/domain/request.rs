use super::journal::EntryKind;
use super::money::Amount;
use super::{RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Topup,
    Withdrawal,
}

impl RequestType {
    /// Journal kind written when a request of this type is approved.
    pub fn entry_kind(self) -> EntryKind {
        match self {
            RequestType::Topup => EntryKind::Deposit,
            RequestType::Withdrawal => EntryKind::Withdrawal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            RequestStatus::Pending => false,
            RequestStatus::Approved | RequestStatus::Rejected => true,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// A manually submitted top-up or withdrawal awaiting a reviewer decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletRequest {
    pub id: RequestId,
    pub request_no: String,
    pub user_id: UserId,
    pub r#type: RequestType,
    pub amount: Amount,
    pub status: RequestStatus,
    /// Reference to the uploaded proof (receipt, bank slip).
    pub evidence: Option<String>,
    pub reviewer_id: Option<UserId>,
    pub decision_note: Option<String>,
    /// Optimistic-concurrency counter, bumped on every update.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl WalletRequest {
    /// External reference of the journal entry written on approval.
    pub fn journal_reference(&self) -> String {
        format!("wallet-request:{}", self.id)
    }
}

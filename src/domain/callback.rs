use super::CallbackId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal view of a provider-reported status.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportedStatus {
    Success,
    Failed,
    Pending,
}

impl ReportedStatus {
    /// Maps a provider status string through a fixed table.
    ///
    /// Anything not listed is PENDING; an unrecognised value is never taken as success.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "successful" | "captured" | "paid" | "completed" | "credited" => {
                ReportedStatus::Success
            }
            "failed" | "failure" | "declined" | "rejected" | "cancelled" | "canceled"
            | "reversed" | "error" => ReportedStatus::Failed,
            _ => ReportedStatus::Pending,
        }
    }
}

impl fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportedStatus::Success => "SUCCESS",
            ReportedStatus::Failed => "FAILED",
            ReportedStatus::Pending => "PENDING",
        };
        f.write_str(s)
    }
}

/// An authenticated provider notification, independent of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCallback {
    /// Provider the notification came from, when the transport knows it.
    pub provider: Option<String>,
    pub external_ref: String,
    /// Status exactly as the provider sent it.
    pub reported_status: String,
    pub provider_txn_id: Option<String>,
    pub operator_txn_id: Option<String>,
    pub amount: Option<Decimal>,
    pub raw_payload: String,
}

impl ProviderCallback {
    pub fn new(external_ref: impl Into<String>, reported_status: impl Into<String>) -> Self {
        Self {
            provider: None,
            external_ref: external_ref.into(),
            reported_status: reported_status.into(),
            provider_txn_id: None,
            operator_txn_id: None,
            amount: None,
            raw_payload: String::new(),
        }
    }

    pub fn via(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn provider_txn(mut self, id: impl Into<String>) -> Self {
        self.provider_txn_id = Some(id.into());
        self
    }

    pub fn operator_txn(mut self, id: impl Into<String>) -> Self {
        self.operator_txn_id = Some(id.into());
        self
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_payload = raw.into();
        self
    }
}

/// Wire shape of a signed webhook body.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub external_ref: String,
    pub status: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub provider_txn_id: Option<String>,
    #[serde(default)]
    pub operator_txn_id: Option<String>,
}

impl WebhookPayload {
    pub fn into_callback(self, raw_payload: String) -> ProviderCallback {
        ProviderCallback {
            provider: None,
            external_ref: self.external_ref,
            reported_status: self.status,
            provider_txn_id: self.provider_txn_id,
            operator_txn_id: self.operator_txn_id,
            amount: self.amount,
            raw_payload,
        }
    }
}

/// Result of reconciling one callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackOutcome {
    /// The callback moved the transaction to SUCCESS.
    Succeeded,
    /// The callback moved the transaction to FAILED (refund applied where due).
    Failed,
    /// The provider has not decided yet; nothing changed.
    StillPending,
    /// A terminal state was already recorded; nothing changed.
    AlreadyProcessed,
    /// The callback was rejected (unknown reference, amount mismatch).
    Rejected,
}

impl CallbackOutcome {
    pub fn mutated_ledger(self) -> bool {
        matches!(self, CallbackOutcome::Succeeded | CallbackOutcome::Failed)
    }
}

/// Audit row for every callback received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub id: CallbackId,
    pub provider: String,
    pub external_ref: String,
    pub raw_payload: String,
    pub outcome: CallbackOutcome,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping_table() {
        assert_eq!(ReportedStatus::from_provider("SUCCESS"), ReportedStatus::Success);
        assert_eq!(ReportedStatus::from_provider("captured"), ReportedStatus::Success);
        assert_eq!(ReportedStatus::from_provider(" Failure "), ReportedStatus::Failed);
        assert_eq!(ReportedStatus::from_provider("declined"), ReportedStatus::Failed);
        assert_eq!(ReportedStatus::from_provider("processing"), ReportedStatus::Pending);
        assert_eq!(ReportedStatus::from_provider("ok"), ReportedStatus::Pending);
        assert_eq!(ReportedStatus::from_provider(""), ReportedStatus::Pending);
    }

    #[test]
    fn test_webhook_payload_parsing() {
        let raw = r#"{"externalRef":"RCH-2026-000001","status":"success","amount":"50.00","providerTxnId":"P1"}"#;
        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        let callback = payload.into_callback(raw.to_string());
        assert_eq!(callback.external_ref, "RCH-2026-000001");
        assert_eq!(callback.amount, Some(dec!(50)));
        assert_eq!(callback.provider_txn_id.as_deref(), Some("P1"));
        assert_eq!(callback.raw_payload, raw);
    }
}

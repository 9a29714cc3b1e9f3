use super::money::Amount;
use super::{EntryId, UserId, WalletId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    SchemePayment,
    Refund,
    Commission,
}

impl EntryKind {
    /// Whether entries of this kind add to the wallet balance.
    pub fn is_credit(self) -> bool {
        match self {
            EntryKind::Deposit | EntryKind::Refund | EntryKind::Commission => true,
            EntryKind::Withdrawal | EntryKind::SchemePayment => false,
        }
    }

    /// Signed balance delta an entry of this kind and amount represents.
    pub fn signed(self, amount: Amount) -> Decimal {
        if self.is_credit() {
            amount.value()
        } else {
            -amount.value()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Deposit => "DEPOSIT",
            EntryKind::Withdrawal => "WITHDRAWAL",
            EntryKind::SchemePayment => "SCHEME_PAYMENT",
            EntryKind::Refund => "REFUND",
            EntryKind::Commission => "COMMISSION",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            EntryStatus::Pending => false,
            EntryStatus::Completed | EntryStatus::Failed => true,
        }
    }

    /// Only PENDING may move, and only to a terminal status.
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (EntryStatus::Pending, EntryStatus::Completed) | (EntryStatus::Pending, EntryStatus::Failed)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryStatus::Pending => "PENDING",
            EntryStatus::Completed => "COMPLETED",
            EntryStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One balance-affecting event. Rows are inserted once; afterwards only
/// `status` and `completed_at` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub wallet_id: WalletId,
    pub kind: EntryKind,
    /// Unsigned; direction follows `kind`.
    pub amount: Amount,
    pub status: EntryStatus,
    pub external_reference: Option<String>,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    pub fn signed_amount(&self) -> Decimal {
        self.kind.signed(self.amount)
    }

    /// The `(external_reference, kind)` pair used to detect duplicate processing.
    pub fn idempotency_key(&self) -> Option<(&str, EntryKind)> {
        self.external_reference
            .as_deref()
            .map(|reference| (reference, self.kind))
    }
}

/// Input for appending a journal entry.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub user_id: UserId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub external_reference: Option<String>,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl NewJournalEntry {
    pub fn new(user_id: UserId, kind: EntryKind, amount: Amount) -> Self {
        Self {
            user_id,
            kind,
            amount,
            external_reference: None,
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Materialises the row. Completed entries are stamped with `now`.
    pub fn into_entry(self, wallet_id: WalletId, status: EntryStatus, now: DateTime<Utc>) -> JournalEntry {
        JournalEntry {
            id: EntryId::new(),
            user_id: self.user_id,
            wallet_id,
            kind: self.kind,
            amount: self.amount,
            status,
            external_reference: self.external_reference,
            description: self.description,
            metadata: self.metadata,
            created_at: now,
            completed_at: status.is_terminal().then_some(now),
        }
    }
}

/// Optional constraints for listing a user's journal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalFilter {
    pub kind: Option<EntryKind>,
    pub status: Option<EntryStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl JournalFilter {
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.kind.is_none_or(|k| entry.kind == k)
            && self.status.is_none_or(|s| entry.status == s)
            && self.created_from.is_none_or(|from| entry.created_at >= from)
            && self.created_to.is_none_or(|to| entry.created_at < to)
    }
}

/// Keyset position for paging `created_at desc, id desc`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JournalPosition {
    pub created_at: DateTime<Utc>,
    pub id: EntryId,
}

impl JournalPosition {
    pub fn of(entry: &JournalEntry) -> Self {
        Self {
            created_at: entry.created_at,
            id: entry.id,
        }
    }

    /// True when `entry` sorts strictly after this position in descending order.
    pub fn precedes(&self, entry: &JournalEntry) -> bool {
        (entry.created_at, entry.id) < (self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_kind_direction() {
        let amount = Amount::new(dec!(10)).unwrap();
        assert_eq!(EntryKind::Deposit.signed(amount), dec!(10));
        assert_eq!(EntryKind::Refund.signed(amount), dec!(10));
        assert_eq!(EntryKind::Commission.signed(amount), dec!(10));
        assert_eq!(EntryKind::Withdrawal.signed(amount), dec!(-10));
        assert_eq!(EntryKind::SchemePayment.signed(amount), dec!(-10));
    }

    #[test]
    fn test_status_transitions() {
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::Completed));
        assert!(EntryStatus::Pending.can_transition_to(EntryStatus::Failed));
        assert!(!EntryStatus::Pending.can_transition_to(EntryStatus::Pending));
        assert!(!EntryStatus::Completed.can_transition_to(EntryStatus::Failed));
        assert!(!EntryStatus::Failed.can_transition_to(EntryStatus::Completed));
    }

    #[test]
    fn test_completed_entries_are_stamped() {
        let now = Utc::now();
        let entry = NewJournalEntry::new(1, EntryKind::Deposit, Amount::new(dec!(5)).unwrap())
            .reference("ORD-2026-000001")
            .into_entry(WalletId::new(), EntryStatus::Completed, now);
        assert_eq!(entry.completed_at, Some(now));
        assert_eq!(
            entry.idempotency_key(),
            Some(("ORD-2026-000001", EntryKind::Deposit))
        );

        let pending = NewJournalEntry::new(1, EntryKind::Deposit, Amount::new(dec!(5)).unwrap())
            .into_entry(WalletId::new(), EntryStatus::Pending, now);
        assert_eq!(pending.completed_at, None);
        assert_eq!(pending.idempotency_key(), None);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&EntryKind::SchemePayment).unwrap();
        assert_eq!(json, "\"SCHEME_PAYMENT\"");
    }
}

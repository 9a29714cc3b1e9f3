use super::callback::CallbackRecord;
use super::journal::{EntryKind, EntryStatus, JournalEntry, JournalFilter, JournalPosition};
use super::money::{Amount, Balance};
use super::order::PaymentOrder;
use super::recharge::{RechargeTransaction, ServiceType};
use super::request::WalletRequest;
use super::sequence::SequenceClaim;
use super::wallet::Wallet;
use super::{EntryId, RequestId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One guarded write. A [`WriteBatch`] is committed all-or-nothing.
#[derive(Debug, Clone)]
pub enum Write {
    /// Fails with `DuplicateKey` if the user already has a wallet.
    InsertWallet(Wallet),
    /// Adds `delta` to the balance. Fails with `InsufficientFunds` if the
    /// result would be negative.
    AdjustBalance { user_id: UserId, delta: Decimal },
    /// Fails with `DuplicateReference` if `(external_reference, kind)` is taken.
    InsertEntry(JournalEntry),
    /// Fails with `AlreadyFinalized` unless the entry is currently PENDING.
    TransitionEntry {
        id: EntryId,
        to: EntryStatus,
        at: DateTime<Utc>,
    },
    InsertOrder(PaymentOrder),
    /// Fails with `Conflict` unless the stored revision equals `expected_revision`.
    UpdateOrder {
        order: PaymentOrder,
        expected_revision: u64,
    },
    InsertRecharge(RechargeTransaction),
    UpdateRecharge {
        recharge: RechargeTransaction,
        expected_revision: u64,
    },
    InsertRequest(WalletRequest),
    UpdateRequest {
        request: WalletRequest,
        expected_revision: u64,
    },
    /// Fails with `DuplicateKey` if the triple was already claimed.
    ClaimSequence(SequenceClaim),
    RecordCallback(CallbackRecord),
}

/// An ordered set of writes applied atomically by [`LedgerStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn insert_wallet(&mut self, wallet: Wallet) -> &mut Self {
        self.push(Write::InsertWallet(wallet))
    }

    pub fn adjust_balance(&mut self, user_id: UserId, delta: Decimal) -> &mut Self {
        self.push(Write::AdjustBalance { user_id, delta })
    }

    pub fn insert_entry(&mut self, entry: JournalEntry) -> &mut Self {
        self.push(Write::InsertEntry(entry))
    }

    pub fn transition_entry(&mut self, id: EntryId, to: EntryStatus, at: DateTime<Utc>) -> &mut Self {
        self.push(Write::TransitionEntry { id, to, at })
    }

    pub fn insert_order(&mut self, order: PaymentOrder) -> &mut Self {
        self.push(Write::InsertOrder(order))
    }

    /// Stores `order` with its revision bumped, guarded on the revision it was read at.
    pub fn update_order(&mut self, mut order: PaymentOrder) -> &mut Self {
        let expected_revision = order.revision;
        order.revision += 1;
        self.push(Write::UpdateOrder {
            order,
            expected_revision,
        })
    }

    pub fn insert_recharge(&mut self, recharge: RechargeTransaction) -> &mut Self {
        self.push(Write::InsertRecharge(recharge))
    }

    pub fn update_recharge(&mut self, mut recharge: RechargeTransaction) -> &mut Self {
        let expected_revision = recharge.revision;
        recharge.revision += 1;
        self.push(Write::UpdateRecharge {
            recharge,
            expected_revision,
        })
    }

    pub fn insert_request(&mut self, request: WalletRequest) -> &mut Self {
        self.push(Write::InsertRequest(request))
    }

    pub fn update_request(&mut self, mut request: WalletRequest) -> &mut Self {
        let expected_revision = request.revision;
        request.revision += 1;
        self.push(Write::UpdateRequest {
            request,
            expected_revision,
        })
    }

    pub fn claim_sequence(&mut self, claim: SequenceClaim) -> &mut Self {
        self.push(Write::ClaimSequence(claim))
    }

    pub fn record_callback(&mut self, record: CallbackRecord) -> &mut Self {
        self.push(Write::RecordCallback(record))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Balances after a successful commit, for every wallet the batch touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub balances: HashMap<UserId, Balance>,
}

impl CommitReceipt {
    pub fn balance_of(&self, user_id: UserId) -> Option<Balance> {
        self.balances.get(&user_id).copied()
    }
}

/// Persistence port of the ledger.
///
/// Reads are plain lookups. Every mutation goes through [`LedgerStore::commit`],
/// which validates all preconditions of the batch and applies it entirely or
/// not at all. Backends must serialise commits that touch the same rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;
    async fn all_wallets(&self) -> Result<Vec<Wallet>>;

    async fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>>;
    async fn entry_by_reference(&self, reference: &str, kind: EntryKind) -> Result<Option<JournalEntry>>;
    async fn entries_by_reference(&self, reference: &str) -> Result<Vec<JournalEntry>>;
    /// Entries of `user_id` matching `filter`, newest first, strictly after `after`.
    async fn journal_page(
        &self,
        user_id: UserId,
        filter: &JournalFilter,
        after: Option<JournalPosition>,
        limit: usize,
    ) -> Result<Vec<JournalEntry>>;

    async fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>>;
    async fn order_by_provider_id(&self, provider_order_id: &str) -> Result<Option<PaymentOrder>>;
    async fn open_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentOrder>>;

    async fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>>;

    async fn request(&self, id: RequestId) -> Result<Option<WalletRequest>>;
    async fn pending_requests(&self) -> Result<Vec<WalletRequest>>;

    async fn callbacks(&self, external_ref: &str) -> Result<Vec<CallbackRecord>>;

    async fn max_sequence(&self, namespace: &str, year: i32) -> Result<Option<u32>>;

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;

/// Who is paying, as handed to a gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub user_id: UserId,
    pub name: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayOrderRequest {
    pub order_ref: String,
    pub amount: Amount,
    pub currency: String,
    pub customer: Customer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub payment_session_ref: String,
}

/// Outbound side of a payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RechargeSubmission {
    pub order_ref: String,
    pub service_type: ServiceType,
    pub operator: String,
    pub number: String,
    pub amount: Amount,
}

/// Immediate answer of a recharge provider. `status` is provider vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAck {
    pub provider_txn_id: Option<String>,
    pub status: String,
}

/// Outbound side of a recharge/utility provider.
#[async_trait]
pub trait RechargeProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn submit(&self, submission: RechargeSubmission) -> Result<ProviderAck>;
}

/// Terminal ledger events handed to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    DepositCredited {
        user_id: UserId,
        order_ref: String,
        amount: Decimal,
    },
    PurchaseConfirmed {
        user_id: UserId,
        order_ref: String,
        amount: Decimal,
    },
    OrderFailed {
        user_id: UserId,
        order_ref: String,
        refunded: Option<Decimal>,
    },
    RechargeSucceeded {
        user_id: UserId,
        order_ref: String,
        commission: Decimal,
    },
    RechargeFailed {
        user_id: UserId,
        order_ref: String,
        refunded: Option<Decimal>,
    },
    RequestApproved {
        user_id: UserId,
        request_no: String,
        amount: Decimal,
    },
    RequestRejected {
        user_id: UserId,
        request_no: String,
        reason: String,
    },
}

impl LedgerEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            LedgerEvent::DepositCredited { user_id, .. }
            | LedgerEvent::PurchaseConfirmed { user_id, .. }
            | LedgerEvent::OrderFailed { user_id, .. }
            | LedgerEvent::RechargeSucceeded { user_id, .. }
            | LedgerEvent::RechargeFailed { user_id, .. }
            | LedgerEvent::RequestApproved { user_id, .. }
            | LedgerEvent::RequestRejected { user_id, .. } => *user_id,
        }
    }
}

/// Fire-and-forget delivery of ledger events. Failures never roll back the ledger.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: LedgerEvent) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

use super::batch::{Plan, StateView, plan};
use crate::domain::callback::CallbackRecord;
use crate::domain::journal::{EntryKind, JournalEntry, JournalFilter, JournalPosition};
use crate::domain::order::PaymentOrder;
use crate::domain::ports::{CommitReceipt, LedgerStore, WriteBatch};
use crate::domain::recharge::RechargeTransaction;
use crate::domain::request::{RequestStatus, WalletRequest};
use crate::domain::sequence::SequenceClaim;
use crate::domain::wallet::Wallet;
use crate::domain::{EntryId, RequestId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<UserId, Wallet>,
    entries: HashMap<EntryId, JournalEntry>,
    entry_keys: HashMap<(String, EntryKind), EntryId>,
    entries_by_user: HashMap<UserId, Vec<EntryId>>,
    orders: HashMap<String, PaymentOrder>,
    provider_orders: HashMap<String, String>,
    recharges: HashMap<String, RechargeTransaction>,
    requests: HashMap<RequestId, WalletRequest>,
    callbacks: Vec<CallbackRecord>,
    sequences: HashMap<(String, i32), BTreeSet<u32>>,
}

impl StateView for State {
    fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.wallets.get(&user_id).cloned())
    }

    fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        Ok(self.entries.get(&id).cloned())
    }

    fn entry_key_taken(&self, reference: &str, kind: EntryKind) -> Result<bool> {
        Ok(self.entry_keys.contains_key(&(reference.to_string(), kind)))
    }

    fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        Ok(self.orders.get(order_ref).cloned())
    }

    fn provider_order_owner(&self, provider_order_id: &str) -> Result<Option<String>> {
        Ok(self.provider_orders.get(provider_order_id).cloned())
    }

    fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        Ok(self.recharges.get(order_ref).cloned())
    }

    fn request(&self, id: RequestId) -> Result<Option<WalletRequest>> {
        Ok(self.requests.get(&id).cloned())
    }

    fn sequence_claimed(&self, claim: &SequenceClaim) -> Result<bool> {
        Ok(self
            .sequences
            .get(&(claim.namespace.clone(), claim.year))
            .is_some_and(|suffixes| suffixes.contains(&claim.suffix)))
    }
}

impl State {
    fn apply(&mut self, plan: Plan) {
        self.wallets.extend(plan.wallets);
        for (id, entry) in plan.new_entries {
            if let Some((reference, kind)) = entry.idempotency_key() {
                self.entry_keys.insert((reference.to_string(), kind), id);
            }
            self.entries_by_user.entry(entry.user_id).or_default().push(id);
            self.entries.insert(id, entry);
        }
        self.entries.extend(plan.updated_entries);
        for (order_ref, order) in plan.orders {
            if let Some(provider_order_id) = &order.provider_order_id {
                self.provider_orders
                    .insert(provider_order_id.clone(), order_ref.clone());
            }
            self.orders.insert(order_ref, order);
        }
        self.recharges.extend(plan.recharges);
        self.requests.extend(plan.requests);
        for claim in plan.sequences {
            self.sequences
                .entry((claim.namespace, claim.year))
                .or_default()
                .insert(claim.suffix);
        }
        self.callbacks.extend(plan.callbacks);
    }
}

/// A thread-safe in-memory ledger store.
///
/// All state sits behind one `Arc<RwLock<_>>`. A commit takes the write guard,
/// validates the batch and applies it, so the guard is the store's transaction.
/// Ideal for tests and single-process deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user_id).cloned())
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let state = self.state.read().await;
        let mut wallets: Vec<Wallet> = state.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| w.user_id);
        Ok(wallets)
    }

    async fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(&id).cloned())
    }

    async fn entry_by_reference(&self, reference: &str, kind: EntryKind) -> Result<Option<JournalEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entry_keys
            .get(&(reference.to_string(), kind))
            .and_then(|id| state.entries.get(id))
            .cloned())
    }

    async fn entries_by_reference(&self, reference: &str) -> Result<Vec<JournalEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<JournalEntry> = state
            .entry_keys
            .iter()
            .filter(|((r, _), _)| r == reference)
            .filter_map(|(_, id)| state.entries.get(id).cloned())
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        Ok(entries)
    }

    async fn journal_page(
        &self,
        user_id: UserId,
        filter: &JournalFilter,
        after: Option<JournalPosition>,
        limit: usize,
    ) -> Result<Vec<JournalEntry>> {
        let state = self.state.read().await;
        let mut page: Vec<JournalEntry> = state
            .entries_by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.entries.get(id))
            .filter(|entry| filter.matches(entry))
            .filter(|entry| after.is_none_or(|position| position.precedes(entry)))
            .cloned()
            .collect();
        page.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        page.truncate(limit);
        Ok(page)
    }

    async fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        let state = self.state.read().await;
        Ok(state.orders.get(order_ref).cloned())
    }

    async fn order_by_provider_id(&self, provider_order_id: &str) -> Result<Option<PaymentOrder>> {
        let state = self.state.read().await;
        Ok(state
            .provider_orders
            .get(provider_order_id)
            .and_then(|order_ref| state.orders.get(order_ref))
            .cloned())
    }

    async fn open_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentOrder>> {
        let state = self.state.read().await;
        let mut orders: Vec<PaymentOrder> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal() && o.created_at < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        let state = self.state.read().await;
        Ok(state.recharges.get(order_ref).cloned())
    }

    async fn request(&self, id: RequestId) -> Result<Option<WalletRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn pending_requests(&self) -> Result<Vec<WalletRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<WalletRequest> = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn callbacks(&self, external_ref: &str) -> Result<Vec<CallbackRecord>> {
        let state = self.state.read().await;
        Ok(state
            .callbacks
            .iter()
            .filter(|c| c.external_ref == external_ref)
            .cloned()
            .collect())
    }

    async fn max_sequence(&self, namespace: &str, year: i32) -> Result<Option<u32>> {
        let state = self.state.read().await;
        Ok(state
            .sequences
            .get(&(namespace.to_string(), year))
            .and_then(|suffixes| suffixes.last().copied()))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let mut state = self.state.write().await;
        let plan = plan(&*state, batch.into_writes(), Utc::now())?;
        let receipt = plan.receipt();
        state.apply(plan);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journal::{EntryStatus, NewJournalEntry};
    use crate::domain::money::{Amount, Balance};
    use crate::error::LedgerError;
    use rust_decimal_macros::dec;

    async fn store_with_wallet(user_id: UserId, balance: rust_decimal::Decimal) -> (InMemoryLedgerStore, Wallet) {
        let store = InMemoryLedgerStore::new();
        let mut wallet = Wallet::open(user_id, Utc::now());
        wallet.balance = Balance::new(balance);
        let mut batch = WriteBatch::new();
        batch.insert_wallet(wallet.clone());
        store.commit(batch).await.unwrap();
        (store, wallet)
    }

    #[tokio::test]
    async fn test_in_memory_wallet_roundtrip() {
        let (store, wallet) = store_with_wallet(1, dec!(100)).await;
        let retrieved = store.wallet(1).await.unwrap().unwrap();
        assert_eq!(retrieved, wallet);
        assert!(store.wallet(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_wallet_rejected() {
        let (store, _) = store_with_wallet(1, dec!(0)).await;
        let mut batch = WriteBatch::new();
        batch.insert_wallet(Wallet::open(1, Utc::now()));
        assert!(matches!(
            store.commit(batch).await,
            Err(LedgerError::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let (store, wallet) = store_with_wallet(1, dec!(10)).await;
        let entry = NewJournalEntry::new(1, EntryKind::Withdrawal, Amount::new(dec!(20)).unwrap())
            .reference("W-1")
            .into_entry(wallet.id, EntryStatus::Completed, Utc::now());

        let mut batch = WriteBatch::new();
        batch.insert_entry(entry.clone()).adjust_balance(1, dec!(-20));
        assert!(matches!(
            store.commit(batch).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        assert!(store.entry(entry.id).await.unwrap().is_none());
        assert!(
            store
                .entry_by_reference("W-1", EntryKind::Withdrawal)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.wallet(1).await.unwrap().unwrap().balance, Balance::new(dec!(10)));
    }

    #[tokio::test]
    async fn test_adjustments_within_batch_accumulate() {
        let (store, _) = store_with_wallet(1, dec!(10)).await;
        let mut batch = WriteBatch::new();
        batch.adjust_balance(1, dec!(-6)).adjust_balance(1, dec!(-6));
        assert!(matches!(
            store.commit(batch).await,
            Err(LedgerError::InsufficientFunds { .. })
        ));

        let mut batch = WriteBatch::new();
        batch.adjust_balance(1, dec!(5)).adjust_balance(1, dec!(-15));
        let receipt = store.commit(batch).await.unwrap();
        assert_eq!(receipt.balance_of(1), Some(Balance::ZERO));
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let (store, wallet) = store_with_wallet(1, dec!(0)).await;
        let make = || {
            NewJournalEntry::new(1, EntryKind::Deposit, Amount::new(dec!(5)).unwrap())
                .reference("ORD-1")
                .into_entry(wallet.id, EntryStatus::Pending, Utc::now())
        };
        let mut batch = WriteBatch::new();
        batch.insert_entry(make());
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.insert_entry(make());
        assert!(matches!(
            store.commit(batch).await,
            Err(LedgerError::DuplicateReference(_))
        ));

        // Same reference under another kind is a different key.
        let refund = NewJournalEntry::new(1, EntryKind::Refund, Amount::new(dec!(5)).unwrap())
            .reference("ORD-1")
            .into_entry(wallet.id, EntryStatus::Pending, Utc::now());
        let mut batch = WriteBatch::new();
        batch.insert_entry(refund);
        store.commit(batch).await.unwrap();
        assert_eq!(store.entries_by_reference("ORD-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sequence_claims() {
        let store = InMemoryLedgerStore::new();
        assert_eq!(store.max_sequence("ORD", 2026).await.unwrap(), None);
        let claim = SequenceClaim {
            namespace: "ORD".into(),
            year: 2026,
            suffix: 1,
        };
        let mut batch = WriteBatch::new();
        batch.claim_sequence(claim.clone());
        store.commit(batch).await.unwrap();
        assert_eq!(store.max_sequence("ORD", 2026).await.unwrap(), Some(1));
        assert_eq!(store.max_sequence("ORD", 2025).await.unwrap(), None);

        let mut batch = WriteBatch::new();
        batch.claim_sequence(claim);
        assert!(matches!(
            store.commit(batch).await,
            Err(LedgerError::DuplicateKey(_))
        ));
    }
}

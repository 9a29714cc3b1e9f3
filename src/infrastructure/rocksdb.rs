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
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const CF_WALLETS: &str = "wallets";
pub const CF_ENTRIES: &str = "journal_entries";
/// `(external_reference, kind)` -> entry id.
pub const CF_ENTRY_KEYS: &str = "journal_keys";
/// `user_id ++ entry id` -> empty.
pub const CF_USER_ENTRIES: &str = "journal_by_user";
pub const CF_ORDERS: &str = "payment_orders";
/// provider order id -> order_ref.
pub const CF_PROVIDER_ORDERS: &str = "payment_orders_by_provider";
pub const CF_RECHARGES: &str = "recharge_transactions";
pub const CF_REQUESTS: &str = "wallet_requests";
/// `external_ref ++ 0x00 ++ callback id` -> record.
pub const CF_CALLBACKS: &str = "callbacks";
/// `namespace ++ 0x00 ++ year ++ suffix` -> empty.
pub const CF_SEQUENCES: &str = "sequences";

const COLUMN_FAMILIES: [&str; 10] = [
    CF_WALLETS,
    CF_ENTRIES,
    CF_ENTRY_KEYS,
    CF_USER_ENTRIES,
    CF_ORDERS,
    CF_PROVIDER_ORDERS,
    CF_RECHARGES,
    CF_REQUESTS,
    CF_CALLBACKS,
    CF_SEQUENCES,
];

fn codec_error(e: serde_json::Error) -> LedgerError {
    LedgerError::InternalError(Box::new(e))
}

fn entry_key(reference: &str, kind: EntryKind) -> Vec<u8> {
    let mut key = reference.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(kind.as_str().as_bytes());
    key
}

fn user_entry_key(user_id: UserId, id: EntryId) -> Vec<u8> {
    let mut key = user_id.to_be_bytes().to_vec();
    key.extend_from_slice(id.0.as_bytes());
    key
}

fn sequence_prefix(namespace: &str, year: i32) -> Vec<u8> {
    let mut key = namespace.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&year.to_be_bytes());
    key
}

fn sequence_key(claim: &SequenceClaim) -> Vec<u8> {
    let mut key = sequence_prefix(&claim.namespace, claim.year);
    key.extend_from_slice(&claim.suffix.to_be_bytes());
    key
}

fn callback_prefix(external_ref: &str) -> Vec<u8> {
    let mut key = external_ref.as_bytes().to_vec();
    key.push(0);
    key
}

/// A persistent ledger store backed by RocksDB.
///
/// Each table of the ledger lives in its own column family, with secondary
/// indexes in dedicated families. Commits are serialised by a process-wide
/// guard and written with a single RocksDB `WriteBatch`, so a batch lands
/// entirely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_guard: Arc::new(Mutex::new(())),
        })
    }

    fn view(&self) -> RocksView<'_> {
        RocksView { db: &self.db }
    }

    fn write_plan(&self, plan: Plan) -> Result<()> {
        let view = self.view();
        let mut batch = rocksdb::WriteBatch::default();

        for (user_id, wallet) in &plan.wallets {
            batch.put_cf(view.cf(CF_WALLETS)?, user_id.to_be_bytes(), encode(wallet)?);
        }
        for (id, entry) in &plan.new_entries {
            if let Some((reference, kind)) = entry.idempotency_key() {
                batch.put_cf(view.cf(CF_ENTRY_KEYS)?, entry_key(reference, kind), id.0.as_bytes());
            }
            batch.put_cf(view.cf(CF_USER_ENTRIES)?, user_entry_key(entry.user_id, *id), b"");
            batch.put_cf(view.cf(CF_ENTRIES)?, id.0.as_bytes(), encode(entry)?);
        }
        for (id, entry) in &plan.updated_entries {
            batch.put_cf(view.cf(CF_ENTRIES)?, id.0.as_bytes(), encode(entry)?);
        }
        for (order_ref, order) in &plan.orders {
            if let Some(provider_order_id) = &order.provider_order_id {
                batch.put_cf(view.cf(CF_PROVIDER_ORDERS)?, provider_order_id.as_bytes(), order_ref.as_bytes());
            }
            batch.put_cf(view.cf(CF_ORDERS)?, order_ref.as_bytes(), encode(order)?);
        }
        for (order_ref, recharge) in &plan.recharges {
            batch.put_cf(view.cf(CF_RECHARGES)?, order_ref.as_bytes(), encode(recharge)?);
        }
        for (id, request) in &plan.requests {
            batch.put_cf(view.cf(CF_REQUESTS)?, id.0.as_bytes(), encode(request)?);
        }
        for claim in &plan.sequences {
            batch.put_cf(view.cf(CF_SEQUENCES)?, sequence_key(claim), b"");
        }
        for record in &plan.callbacks {
            let mut key = callback_prefix(&record.external_ref);
            key.extend_from_slice(record.id.0.as_bytes());
            batch.put_cf(view.cf(CF_CALLBACKS)?, key, encode(record)?);
        }

        self.db.write(batch)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(codec_error)
}

struct RocksView<'a> {
    db: &'a DB,
}

impl RocksView<'_> {
    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::Storage(format!("column family {name} not found")))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(codec_error),
            None => Ok(None),
        }
    }

    fn exists(&self, cf: &str, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key)?.is_some())
    }

    /// Keys and values under `prefix`, in key order.
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut items = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            items.push((key, value));
        }
        Ok(items)
    }

    fn values<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value).map_err(codec_error)?);
        }
        Ok(values)
    }
}

impl StateView for RocksView<'_> {
    fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.get(CF_WALLETS, user_id.to_be_bytes())
    }

    fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        self.get(CF_ENTRIES, id.0.as_bytes())
    }

    fn entry_key_taken(&self, reference: &str, kind: EntryKind) -> Result<bool> {
        self.exists(CF_ENTRY_KEYS, entry_key(reference, kind))
    }

    fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        self.get(CF_ORDERS, order_ref.as_bytes())
    }

    fn provider_order_owner(&self, provider_order_id: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .get_cf(self.cf(CF_PROVIDER_ORDERS)?, provider_order_id.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        self.get(CF_RECHARGES, order_ref.as_bytes())
    }

    fn request(&self, id: RequestId) -> Result<Option<WalletRequest>> {
        self.get(CF_REQUESTS, id.0.as_bytes())
    }

    fn sequence_claimed(&self, claim: &SequenceClaim) -> Result<bool> {
        self.exists(CF_SEQUENCES, sequence_key(claim))
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.view().wallet(user_id)
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        // Keys are big-endian user ids, so iteration order is user order.
        self.view().values(CF_WALLETS)
    }

    async fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        self.view().entry(id)
    }

    async fn entry_by_reference(&self, reference: &str, kind: EntryKind) -> Result<Option<JournalEntry>> {
        let view = self.view();
        let Some(id) = view.db.get_cf(view.cf(CF_ENTRY_KEYS)?, entry_key(reference, kind))? else {
            return Ok(None);
        };
        view.get(CF_ENTRIES, id)
    }

    async fn entries_by_reference(&self, reference: &str) -> Result<Vec<JournalEntry>> {
        let view = self.view();
        let mut prefix = reference.as_bytes().to_vec();
        prefix.push(0);
        let mut entries = Vec::new();
        for (_key, id) in view.scan_prefix(CF_ENTRY_KEYS, &prefix)? {
            if let Some(entry) = view.get::<JournalEntry>(CF_ENTRIES, id)? {
                entries.push(entry);
            }
        }
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
        let view = self.view();
        let prefix = user_id.to_be_bytes();
        let mut page = Vec::new();
        for (key, _) in view.scan_prefix(CF_USER_ENTRIES, &prefix)? {
            let Some(entry) = view.get::<JournalEntry>(CF_ENTRIES, &key[prefix.len()..])? else {
                continue;
            };
            if filter.matches(&entry) && after.is_none_or(|position| position.precedes(&entry)) {
                page.push(entry);
            }
        }
        page.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        page.truncate(limit);
        Ok(page)
    }

    async fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        self.view().order(order_ref)
    }

    async fn order_by_provider_id(&self, provider_order_id: &str) -> Result<Option<PaymentOrder>> {
        let view = self.view();
        match view.provider_order_owner(provider_order_id)? {
            Some(order_ref) => view.order(&order_ref),
            None => Ok(None),
        }
    }

    async fn open_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentOrder>> {
        let mut orders: Vec<PaymentOrder> = self
            .view()
            .values::<PaymentOrder>(CF_ORDERS)?
            .into_iter()
            .filter(|o| !o.status.is_terminal() && o.created_at < cutoff)
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        self.view().recharge(order_ref)
    }

    async fn request(&self, id: RequestId) -> Result<Option<WalletRequest>> {
        self.view().request(id)
    }

    async fn pending_requests(&self) -> Result<Vec<WalletRequest>> {
        let mut requests: Vec<WalletRequest> = self
            .view()
            .values::<WalletRequest>(CF_REQUESTS)?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn callbacks(&self, external_ref: &str) -> Result<Vec<CallbackRecord>> {
        let view = self.view();
        let mut records = view
            .scan_prefix(CF_CALLBACKS, &callback_prefix(external_ref))?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice::<CallbackRecord>(&value).map_err(codec_error))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.received_at);
        Ok(records)
    }

    async fn max_sequence(&self, namespace: &str, year: i32) -> Result<Option<u32>> {
        let prefix = sequence_prefix(namespace, year);
        let keys = self.view().scan_prefix(CF_SEQUENCES, &prefix)?;
        Ok(keys.last().and_then(|(key, _)| {
            let suffix: [u8; 4] = key.get(prefix.len()..)?.try_into().ok()?;
            Some(u32::from_be_bytes(suffix))
        }))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let _guard = self
            .commit_guard
            .lock()
            .map_err(|_| LedgerError::Storage("commit guard poisoned".to_string()))?;
        let plan = plan(&self.view(), batch.into_writes(), Utc::now())?;
        let receipt = plan.receipt();
        self.write_plan(plan)?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::journal::{EntryStatus, NewJournalEntry};
    use crate::domain::money::{Amount, Balance};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_and_reopen() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::open(7, Utc::now());
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let entry = NewJournalEntry::new(7, EntryKind::Deposit, Amount::new(dec!(25)).unwrap())
                .reference("ORD-2026-000001")
                .into_entry(wallet.id, EntryStatus::Completed, Utc::now());
            let mut batch = WriteBatch::new();
            batch
                .insert_wallet(wallet.clone())
                .insert_entry(entry)
                .adjust_balance(7, dec!(25));
            let receipt = store.commit(batch).await.unwrap();
            assert_eq!(receipt.balance_of(7), Some(Balance::new(dec!(25))));
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let stored = store.wallet(7).await.unwrap().unwrap();
        assert_eq!(stored.balance, Balance::new(dec!(25)));
        let entry = store
            .entry_by_reference("ORD-2026-000001", EntryKind::Deposit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.user_id, 7);
        let page = store
            .journal_page(7, &JournalFilter::default(), None, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_sequence_max() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        for suffix in [1, 2, 300] {
            let mut batch = WriteBatch::new();
            batch.claim_sequence(SequenceClaim {
                namespace: "RCH".into(),
                year: 2026,
                suffix,
            });
            store.commit(batch).await.unwrap();
        }
        assert_eq!(store.max_sequence("RCH", 2026).await.unwrap(), Some(300));
        assert_eq!(store.max_sequence("RC", 2026).await.unwrap(), None);
    }
}

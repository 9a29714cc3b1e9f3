#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use wallet_ledger::application::ledger::Ledger;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::callback::CallbackRecord;
use wallet_ledger::domain::journal::{EntryKind, JournalEntry, JournalFilter, JournalPosition, NewJournalEntry};
use wallet_ledger::domain::money::Amount;
use wallet_ledger::domain::order::PaymentOrder;
use wallet_ledger::domain::ports::{CommitReceipt, LedgerStore, SharedLedgerStore, WriteBatch};
use wallet_ledger::domain::recharge::RechargeTransaction;
use wallet_ledger::domain::request::WalletRequest;
use wallet_ledger::domain::wallet::Wallet;
use wallet_ledger::domain::{EntryId, RequestId, UserId};
use wallet_ledger::error::{LedgerError, Result};
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;
use wallet_ledger::infrastructure::notifier::TracingNotifier;

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// Opens a wallet for `user_id` and seeds it with `balance` through a DEPOSIT entry.
pub async fn funded(ledger: &Ledger, user_id: UserId, balance: Decimal) {
    ledger.wallets().open_wallet(user_id).await.unwrap();
    if balance > Decimal::ZERO {
        ledger
            .wallets()
            .charge(
                NewJournalEntry::new(user_id, EntryKind::Deposit, amount(balance))
                    .reference(format!("seed-{user_id}")),
            )
            .await
            .unwrap();
    }
}

pub fn ledger_over(store: SharedLedgerStore, config: LedgerConfig) -> Ledger {
    Ledger::new(store, config, Arc::new(TracingNotifier))
}

/// Sum of COMPLETED signed amounts in a user's journal.
pub async fn journal_total(ledger: &Ledger, user_id: UserId) -> Decimal {
    ledger
        .journal()
        .list_by_user(user_id, JournalFilter::default())
        .collect_all()
        .await
        .unwrap()
        .iter()
        .filter(|e| e.status == wallet_ledger::domain::journal::EntryStatus::Completed)
        .map(JournalEntry::signed_amount)
        .sum()
}

/// In-memory store whose next `n` commits fail with a storage error.
#[derive(Default, Clone)]
pub struct FlakyStore {
    inner: InMemoryLedgerStore,
    failures: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commits(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn remaining_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        self.inner.wallet(user_id).await
    }

    async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        self.inner.all_wallets().await
    }

    async fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        self.inner.entry(id).await
    }

    async fn entry_by_reference(&self, reference: &str, kind: EntryKind) -> Result<Option<JournalEntry>> {
        self.inner.entry_by_reference(reference, kind).await
    }

    async fn entries_by_reference(&self, reference: &str) -> Result<Vec<JournalEntry>> {
        self.inner.entries_by_reference(reference).await
    }

    async fn journal_page(
        &self,
        user_id: UserId,
        filter: &JournalFilter,
        after: Option<JournalPosition>,
        limit: usize,
    ) -> Result<Vec<JournalEntry>> {
        self.inner.journal_page(user_id, filter, after, limit).await
    }

    async fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        self.inner.order(order_ref).await
    }

    async fn order_by_provider_id(&self, provider_order_id: &str) -> Result<Option<PaymentOrder>> {
        self.inner.order_by_provider_id(provider_order_id).await
    }

    async fn open_orders_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentOrder>> {
        self.inner.open_orders_created_before(cutoff).await
    }

    async fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        self.inner.recharge(order_ref).await
    }

    async fn request(&self, id: RequestId) -> Result<Option<WalletRequest>> {
        self.inner.request(id).await
    }

    async fn pending_requests(&self) -> Result<Vec<WalletRequest>> {
        self.inner.pending_requests().await
    }

    async fn callbacks(&self, external_ref: &str) -> Result<Vec<CallbackRecord>> {
        self.inner.callbacks(external_ref).await
    }

    async fn max_sequence(&self, namespace: &str, year: i32) -> Result<Option<u32>> {
        self.inner.max_sequence(namespace, year).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LedgerError::Storage("injected write failure".into()));
        }
        self.inner.commit(batch).await
    }
}

/// Writes a command file that opens `users` wallets and runs one paid deposit each.
pub fn generate_commands_csv(path: &Path, users: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);

    wtr.write_record(["op", "user", "ref", "amount", "status", "provider_ref", "detail"])?;
    for user in 1..=users {
        let user = user.to_string();
        let label = format!("d{user}");
        wtr.write_record(["open", user.as_str()])?;
        wtr.write_record(["deposit", user.as_str(), label.as_str(), "10.00"])?;
        wtr.write_record(["callback", "", label.as_str(), "", "success"])?;
    }

    wtr.flush()?;
    Ok(())
}

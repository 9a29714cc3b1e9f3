use crate::domain::journal::{EntryStatus, NewJournalEntry};
use crate::domain::ports::{SharedLedgerStore, WriteBatch};
use crate::domain::wallet::Wallet;
use crate::domain::{EntryId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

/// Outcome of a posted balance change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub entry_id: EntryId,
    pub balance: Decimal,
}

/// Stages a COMPLETED journal entry together with the balance change it explains.
///
/// Both writes land in `batch`, so the store applies them as one unit.
pub(crate) fn stage_posting(
    batch: &mut WriteBatch,
    wallet: &Wallet,
    entry: NewJournalEntry,
    now: DateTime<Utc>,
) -> EntryId {
    let entry = entry.into_entry(wallet.id, EntryStatus::Completed, now);
    let id = entry.id;
    batch
        .adjust_balance(wallet.user_id, entry.signed_amount())
        .insert_entry(entry);
    id
}

/// Owns wallet balances. Every change goes through a journal entry.
#[derive(Clone)]
pub struct WalletService {
    store: SharedLedgerStore,
}

impl WalletService {
    pub fn new(store: SharedLedgerStore) -> Self {
        Self { store }
    }

    /// Creates the user's wallet with a zero balance. Opening twice returns the existing wallet.
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, user_id: UserId) -> Result<Wallet> {
        if let Some(wallet) = self.store.wallet(user_id).await? {
            return Ok(wallet);
        }
        let wallet = Wallet::open(user_id, Utc::now());
        let mut batch = WriteBatch::new();
        batch.insert_wallet(wallet.clone());
        match self.store.commit(batch).await {
            Ok(_) => {
                info!(wallet_id = %wallet.id, "wallet opened");
                Ok(wallet)
            }
            // Lost a race with another opener.
            Err(LedgerError::DuplicateKey(_)) => self.wallet(user_id).await,
            Err(e) => Err(e),
        }
    }

    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.store
            .wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<Decimal> {
        Ok(self.wallet(user_id).await?.balance.value())
    }

    /// Completes a PENDING journal entry and applies its delta in one commit.
    ///
    /// `delta` must equal the entry's signed amount. A debit that would take the
    /// balance below zero is refused and the entry stays PENDING.
    #[instrument(skip(self))]
    pub async fn apply_delta(&self, user_id: UserId, delta: Decimal, entry_id: EntryId) -> Result<Decimal> {
        let entry = self
            .store
            .entry(entry_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(format!("journal entry {entry_id}")))?;
        if entry.user_id != user_id {
            return Err(LedgerError::ValidationError(format!(
                "journal entry {entry_id} belongs to user {}",
                entry.user_id
            )));
        }
        if entry.signed_amount() != delta {
            return Err(LedgerError::ValidationError(format!(
                "delta {delta} does not match {} entry of {}",
                entry.kind, entry.amount
            )));
        }
        if entry.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized(format!(
                "journal entry {entry_id} is {}",
                entry.status
            )));
        }

        let mut batch = WriteBatch::new();
        batch
            .adjust_balance(user_id, delta)
            .transition_entry(entry_id, EntryStatus::Completed, Utc::now());
        let receipt = self.store.commit(batch).await?;
        let balance = receipt
            .balance_of(user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        debug!(%balance, "delta applied");
        Ok(balance.value())
    }

    /// Posts a COMPLETED entry and its balance change atomically.
    ///
    /// Used for synchronous internal charges such as service-application fees.
    #[instrument(skip(self, entry), fields(user_id = entry.user_id, kind = %entry.kind, amount = %entry.amount))]
    pub async fn charge(&self, entry: NewJournalEntry) -> Result<Posting> {
        let wallet = self.wallet(entry.user_id).await?;
        let user_id = wallet.user_id;
        let mut batch = WriteBatch::new();
        let entry_id = stage_posting(&mut batch, &wallet, entry, Utc::now());
        let receipt = self.store.commit(batch).await?;
        let balance = receipt
            .balance_of(user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        info!(%entry_id, %balance, "posting committed");
        Ok(Posting {
            entry_id,
            balance: balance.value(),
        })
    }
}

use crate::domain::journal::{EntryKind, EntryStatus, JournalEntry, JournalFilter, JournalPosition, NewJournalEntry};
use crate::domain::ports::{SharedLedgerStore, WriteBatch};
use crate::domain::{EntryId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// Append-only record of balance-affecting events.
#[derive(Clone)]
pub struct JournalService {
    store: SharedLedgerStore,
    page_size: usize,
}

impl JournalService {
    pub fn new(store: SharedLedgerStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Inserts a new entry as PENDING or COMPLETED.
    ///
    /// A COMPLETED entry appended here does not move the balance; callers that
    /// need both use [`crate::application::wallet::WalletService::charge`].
    #[instrument(skip(self, entry), fields(user_id = entry.user_id, kind = %entry.kind))]
    pub async fn append(&self, entry: NewJournalEntry, status: EntryStatus) -> Result<EntryId> {
        if status == EntryStatus::Failed {
            return Err(LedgerError::ValidationError(
                "journal entries cannot be created as FAILED".to_string(),
            ));
        }
        let wallet = self
            .store
            .wallet(entry.user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(entry.user_id))?;
        let entry = entry.into_entry(wallet.id, status, Utc::now());
        let id = entry.id;
        let mut batch = WriteBatch::new();
        batch.insert_entry(entry);
        self.store.commit(batch).await?;
        debug!(entry_id = %id, "journal entry appended");
        Ok(id)
    }

    /// Moves a PENDING entry to COMPLETED or FAILED, stamping `completed_at`.
    #[instrument(skip(self))]
    pub async fn transition(&self, id: EntryId, status: EntryStatus, completed_at: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                from: "PENDING".to_string(),
                to: status.to_string(),
            });
        }
        let mut batch = WriteBatch::new();
        batch.transition_entry(id, status, completed_at);
        self.store.commit(batch).await?;
        Ok(())
    }

    pub async fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>> {
        self.store.entry(id).await
    }

    pub async fn find_by_reference(&self, reference: &str, kind: EntryKind) -> Result<Option<JournalEntry>> {
        self.store.entry_by_reference(reference, kind).await
    }

    /// Every entry written under `reference`, oldest first.
    pub async fn entries_for_reference(&self, reference: &str) -> Result<Vec<JournalEntry>> {
        self.store.entries_by_reference(reference).await
    }

    /// Lazily pages through a user's entries, newest first.
    pub fn list_by_user(&self, user_id: UserId, filter: JournalFilter) -> JournalCursor {
        JournalCursor {
            store: self.store.clone(),
            user_id,
            filter,
            page_size: self.page_size,
            position: None,
            exhausted: false,
        }
    }
}

/// Keyset cursor over a user's journal. Each page is fetched on demand.
pub struct JournalCursor {
    store: SharedLedgerStore,
    user_id: UserId,
    filter: JournalFilter,
    page_size: usize,
    position: Option<JournalPosition>,
    exhausted: bool,
}

impl JournalCursor {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The next page, or `None` once every matching entry has been returned.
    pub async fn next_page(&mut self) -> Result<Option<Vec<JournalEntry>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .store
            .journal_page(self.user_id, &self.filter, self.position, self.page_size)
            .await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.position = Some(JournalPosition::of(last));
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        while let Some(page) = self.next_page().await? {
            entries.extend(page);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::wallet::WalletService;
    use crate::domain::money::Amount;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (JournalService, WalletService) {
        let store: SharedLedgerStore = Arc::new(InMemoryLedgerStore::new());
        let wallets = WalletService::new(store.clone());
        wallets.open_wallet(1).await.unwrap();
        (JournalService::new(store, 2), wallets)
    }

    fn deposit(reference: &str, value: rust_decimal::Decimal) -> NewJournalEntry {
        NewJournalEntry::new(1, EntryKind::Deposit, Amount::new(value).unwrap()).reference(reference)
    }

    #[tokio::test]
    async fn test_append_and_transition() {
        let (journal, wallets) = setup().await;
        let id = journal.append(deposit("r-1", dec!(10)), EntryStatus::Pending).await.unwrap();

        let now = Utc::now();
        journal.transition(id, EntryStatus::Failed, now).await.unwrap();
        let entry = journal.entry(id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.completed_at, Some(now));

        assert!(matches!(
            journal.transition(id, EntryStatus::Completed, now).await,
            Err(LedgerError::AlreadyFinalized(_))
        ));
        // Appending alone never moves the balance.
        assert_eq!(wallets.get_balance(1).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_append_rejects_failed_and_duplicates() {
        let (journal, _) = setup().await;
        assert!(matches!(
            journal.append(deposit("r-1", dec!(10)), EntryStatus::Failed).await,
            Err(LedgerError::ValidationError(_))
        ));
        journal.append(deposit("r-1", dec!(10)), EntryStatus::Pending).await.unwrap();
        assert!(matches!(
            journal.append(deposit("r-1", dec!(10)), EntryStatus::Pending).await,
            Err(LedgerError::DuplicateReference(_))
        ));
        let found = journal.find_by_reference("r-1", EntryKind::Deposit).await.unwrap();
        assert!(found.is_some());
        assert!(journal.find_by_reference("r-1", EntryKind::Refund).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_pages_newest_first() {
        let (journal, wallets) = setup().await;
        for i in 0..5 {
            wallets
                .charge(deposit(&format!("r-{i}"), dec!(1)))
                .await
                .unwrap();
        }

        let mut cursor = journal.list_by_user(1, JournalFilter::default());
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        while let Some(page) = cursor.next_page().await.unwrap() {
            sizes.push(page.len());
            seen.extend(page);
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(seen.len(), 5);
        for pair in seen.windows(2) {
            assert!((pair[0].created_at, pair[0].id) > (pair[1].created_at, pair[1].id));
        }
    }

    #[tokio::test]
    async fn test_cursor_applies_filter() {
        let (journal, wallets) = setup().await;
        wallets.charge(deposit("d-1", dec!(50))).await.unwrap();
        wallets
            .charge(
                NewJournalEntry::new(1, EntryKind::SchemePayment, Amount::new(dec!(20)).unwrap())
                    .reference("s-1"),
            )
            .await
            .unwrap();

        let debits = journal
            .list_by_user(
                1,
                JournalFilter {
                    kind: Some(EntryKind::SchemePayment),
                    ..Default::default()
                },
            )
            .collect_all()
            .await
            .unwrap();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].signed_amount(), dec!(-20));

        let future = journal
            .list_by_user(
                1,
                JournalFilter {
                    created_from: Some(Utc::now() + Duration::hours(1)),
                    ..Default::default()
                },
            )
            .collect_all()
            .await
            .unwrap();
        assert!(future.is_empty());
    }
}

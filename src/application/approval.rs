use super::sequence::SequenceGenerator;
use super::wallet::stage_posting;
use crate::domain::journal::NewJournalEntry;
use crate::domain::money::Amount;
use crate::domain::ports::{LedgerEvent, SharedLedgerStore, SharedNotifier, WriteBatch};
use crate::domain::request::{RequestStatus, RequestType, WalletRequest};
use crate::domain::{RequestId, UserId};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

const CONFLICT_RETRIES: usize = 3;

/// Manual top-up and withdrawal requests decided by a reviewer.
///
/// Submission never touches the balance. Approval writes the request status,
/// the balance change and its COMPLETED journal entry in one commit; a
/// withdrawal the wallet cannot cover is refused and stays PENDING.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: SharedLedgerStore,
    sequence: SequenceGenerator,
    notifier: SharedNotifier,
    namespace: String,
}

impl ApprovalWorkflow {
    pub fn new(
        store: SharedLedgerStore,
        sequence: SequenceGenerator,
        notifier: SharedNotifier,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sequence,
            notifier,
            namespace: namespace.into(),
        }
    }

    #[instrument(skip(self, evidence))]
    pub async fn submit(
        &self,
        user_id: UserId,
        kind: RequestType,
        amount: Amount,
        evidence: Option<String>,
    ) -> Result<WalletRequest> {
        if self.store.wallet(user_id).await?.is_none() {
            return Err(LedgerError::WalletNotFound(user_id));
        }
        let request_no = self.sequence.next_for_current_year(&self.namespace).await?;
        let request = WalletRequest {
            id: RequestId::new(),
            request_no,
            user_id,
            r#type: kind,
            amount,
            status: RequestStatus::Pending,
            evidence,
            reviewer_id: None,
            decision_note: None,
            revision: 0,
            created_at: Utc::now(),
            decided_at: None,
        };
        let mut batch = WriteBatch::new();
        batch.insert_request(request.clone());
        self.store.commit(batch).await?;
        info!(request_no = %request.request_no, "wallet request submitted");
        Ok(request)
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, request_id: RequestId, reviewer_id: UserId) -> Result<WalletRequest> {
        let mut last_conflict = None;
        for _ in 0..CONFLICT_RETRIES {
            let request = self.pending(request_id).await?;
            if request.user_id == reviewer_id {
                return Err(LedgerError::ValidationError(
                    "reviewers cannot approve their own requests".to_string(),
                ));
            }
            let wallet = self
                .store
                .wallet(request.user_id)
                .await?
                .ok_or(LedgerError::WalletNotFound(request.user_id))?;

            let now = Utc::now();
            let mut updated = request.clone();
            updated.status = RequestStatus::Approved;
            updated.reviewer_id = Some(reviewer_id);
            updated.decided_at = Some(now);

            let verb = match request.r#type {
                RequestType::Topup => "Top-up",
                RequestType::Withdrawal => "Withdrawal",
            };
            let entry = NewJournalEntry::new(request.user_id, request.r#type.entry_kind(), request.amount)
                .reference(request.journal_reference())
                .description(format!("{verb} request {}", request.request_no))
                .meta("request_no", request.request_no.clone())
                .meta("reviewer_id", reviewer_id.to_string());

            let mut batch = WriteBatch::new();
            batch.update_request(updated.clone());
            stage_posting(&mut batch, &wallet, entry, now);

            match self.store.commit(batch).await {
                Ok(receipt) => {
                    let balance = receipt.balance_of(request.user_id);
                    info!(request_no = %request.request_no, balance = ?balance, "wallet request approved");
                    self.dispatch(LedgerEvent::RequestApproved {
                        user_id: request.user_id,
                        request_no: request.request_no.clone(),
                        amount: request.amount.value(),
                    });
                    updated.revision += 1;
                    return Ok(updated);
                }
                Err(e @ LedgerError::InsufficientFunds { .. }) => {
                    warn!(request_no = %request.request_no, "withdrawal exceeds balance, request left pending");
                    return Err(e);
                }
                Err(e @ LedgerError::Conflict(_)) => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| LedgerError::Conflict(request_id.to_string())))
    }

    #[instrument(skip(self, reason))]
    pub async fn reject(&self, request_id: RequestId, reviewer_id: UserId, reason: &str) -> Result<WalletRequest> {
        if reason.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "a rejection needs a reason".to_string(),
            ));
        }
        let mut last_conflict = None;
        for _ in 0..CONFLICT_RETRIES {
            let request = self.pending(request_id).await?;
            let mut updated = request.clone();
            updated.status = RequestStatus::Rejected;
            updated.reviewer_id = Some(reviewer_id);
            updated.decision_note = Some(reason.to_string());
            updated.decided_at = Some(Utc::now());

            let mut batch = WriteBatch::new();
            batch.update_request(updated.clone());
            match self.store.commit(batch).await {
                Ok(_) => {
                    info!(request_no = %request.request_no, "wallet request rejected");
                    self.dispatch(LedgerEvent::RequestRejected {
                        user_id: request.user_id,
                        request_no: request.request_no,
                        reason: reason.to_string(),
                    });
                    updated.revision += 1;
                    return Ok(updated);
                }
                Err(e @ LedgerError::Conflict(_)) => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| LedgerError::Conflict(request_id.to_string())))
    }

    /// Requests awaiting a decision, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<WalletRequest>> {
        self.store.pending_requests().await
    }

    pub async fn get(&self, request_id: RequestId) -> Result<Option<WalletRequest>> {
        self.store.request(request_id).await
    }

    async fn pending(&self, request_id: RequestId) -> Result<WalletRequest> {
        let request = self
            .store
            .request(request_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(format!("wallet request {request_id}")))?;
        if request.status.is_terminal() {
            return Err(LedgerError::AlreadyFinalized(format!(
                "wallet request {} is {}",
                request.request_no, request.status
            )));
        }
        Ok(request)
    }

    fn dispatch(&self, event: LedgerEvent) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(event).await {
                warn!(error = %e, "notification dispatch failed");
            }
        });
    }
}

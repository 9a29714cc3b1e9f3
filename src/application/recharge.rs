use super::reconciliation::ReconciliationEngine;
use super::sequence::SequenceGenerator;
use super::wallet::stage_posting;
use crate::config::{LedgerConfig, RechargeConfig};
use crate::domain::callback::{CallbackOutcome, ProviderCallback, ReportedStatus};
use crate::domain::journal::{EntryKind, NewJournalEntry};
use crate::domain::ports::{RechargeProvider, RechargeSubmission, SharedLedgerStore, WriteBatch};
use crate::domain::recharge::{RechargeRequest, RechargeStatus, RechargeTransaction};
use crate::domain::{RechargeId, UserId};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

const CONFLICT_RETRIES: usize = 3;

/// Telecom and utility recharges paid from the wallet.
///
/// The amount is debited when the recharge is opened. The provider's verdict
/// arrives later through the reconciliation engine, which either pays the
/// commission or refunds the debit.
#[derive(Clone)]
pub struct RechargeService {
    store: SharedLedgerStore,
    sequence: SequenceGenerator,
    reconciliation: ReconciliationEngine,
    namespace: String,
    config: RechargeConfig,
}

impl RechargeService {
    pub fn new(
        store: SharedLedgerStore,
        sequence: SequenceGenerator,
        reconciliation: ReconciliationEngine,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            store,
            sequence,
            reconciliation,
            namespace: config.sequence.recharge_namespace.clone(),
            config: config.recharge.clone(),
        }
    }

    /// Debits the wallet and creates a PENDING recharge in one commit.
    pub async fn open(&self, user_id: UserId, request: RechargeRequest) -> Result<RechargeTransaction> {
        let provider = self.config.provider.clone();
        self.open_with(user_id, request, provider).await
    }

    #[instrument(skip(self, request), fields(service = %request.service_type, amount = %request.amount))]
    async fn open_with(
        &self,
        user_id: UserId,
        request: RechargeRequest,
        provider: String,
    ) -> Result<RechargeTransaction> {
        if request.operator.trim().is_empty() || request.number.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "recharge needs an operator and a number".to_string(),
            ));
        }
        let wallet = self
            .store
            .wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        if wallet.balance.value() < request.amount.value() {
            return Err(LedgerError::InsufficientFunds {
                user_id,
                balance: wallet.balance.value(),
                requested: request.amount.value(),
            });
        }

        let order_ref = self.sequence.next_for_current_year(&self.namespace).await?;
        let now = Utc::now();
        let debit = NewJournalEntry::new(user_id, EntryKind::SchemePayment, request.amount)
            .reference(order_ref.clone())
            .description(format!(
                "{} recharge {} for {}",
                request.service_type, order_ref, request.number
            ))
            .meta("service_type", request.service_type.as_str())
            .meta("operator", request.operator.clone())
            .meta("number", request.number.clone());

        let mut batch = WriteBatch::new();
        let debit_entry_id = stage_posting(&mut batch, &wallet, debit, now);
        let recharge = RechargeTransaction {
            id: RechargeId::new(),
            user_id,
            order_ref,
            commission_amount: self.config.commission_for(request.service_type, request.amount.value()),
            service_type: request.service_type,
            operator: request.operator,
            number: request.number,
            amount: request.amount,
            provider,
            provider_txn_id: None,
            operator_transaction_id: None,
            status: RechargeStatus::Pending,
            callback_received: false,
            debit_entry_id: Some(debit_entry_id),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        batch.insert_recharge(recharge.clone());
        self.store.commit(batch).await?;

        info!(order_ref = %recharge.order_ref, "recharge opened");
        Ok(recharge)
    }

    /// Records the provider's transaction id. Repeating the same id is a no-op.
    #[instrument(skip(self))]
    pub async fn record_submission(&self, order_ref: &str, provider_txn_id: &str) -> Result<RechargeTransaction> {
        let mut last_conflict = None;
        for _ in 0..CONFLICT_RETRIES {
            let recharge = self.require(order_ref).await?;
            match recharge.provider_txn_id.as_deref() {
                Some(existing) if existing == provider_txn_id => return Ok(recharge),
                Some(existing) => {
                    return Err(LedgerError::DuplicateReference(format!(
                        "recharge {order_ref} already submitted as {existing}"
                    )));
                }
                None => {}
            }

            let mut updated = recharge;
            updated.provider_txn_id = Some(provider_txn_id.to_string());
            updated.updated_at = Utc::now();
            let mut batch = WriteBatch::new();
            batch.update_recharge(updated.clone());
            match self.store.commit(batch).await {
                Ok(_) => {
                    updated.revision += 1;
                    return Ok(updated);
                }
                Err(e @ LedgerError::Conflict(_)) => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| LedgerError::Conflict(order_ref.to_string())))
    }

    /// Opens a recharge and hands it to `provider`.
    ///
    /// A terminal answer in the provider's immediate reply is reconciled right
    /// away, exactly like a callback. If the provider call fails the recharge
    /// stays PENDING with its debit in place until a callback settles it.
    #[instrument(skip(self, provider, request), fields(provider = provider.name()))]
    pub async fn submit(
        &self,
        provider: &dyn RechargeProvider,
        user_id: UserId,
        request: RechargeRequest,
    ) -> Result<(RechargeTransaction, CallbackOutcome)> {
        let recharge = self
            .open_with(user_id, request, provider.name().to_string())
            .await?;
        let submission = RechargeSubmission {
            order_ref: recharge.order_ref.clone(),
            service_type: recharge.service_type,
            operator: recharge.operator.clone(),
            number: recharge.number.clone(),
            amount: recharge.amount,
        };

        let ack = match provider.submit(submission).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(order_ref = %recharge.order_ref, error = %e, "recharge provider call failed");
                return Ok((recharge, CallbackOutcome::StillPending));
            }
        };
        if let Some(txn) = &ack.provider_txn_id {
            self.record_submission(&recharge.order_ref, txn).await?;
        }

        let outcome = match ReportedStatus::from_provider(&ack.status) {
            ReportedStatus::Pending => {
                debug!(status = %ack.status, "provider accepted recharge");
                CallbackOutcome::StillPending
            }
            ReportedStatus::Success | ReportedStatus::Failed => {
                let mut callback = ProviderCallback::new(recharge.order_ref.clone(), ack.status.clone())
                    .via(provider.name())
                    .raw(format!("{ack:?}"));
                callback.provider_txn_id = ack.provider_txn_id.clone();
                self.reconciliation.handle_callback(callback).await?
            }
        };
        let recharge = self.require(&recharge.order_ref).await?;
        Ok((recharge, outcome))
    }

    pub async fn get(&self, order_ref: &str) -> Result<Option<RechargeTransaction>> {
        self.store.recharge(order_ref).await
    }

    async fn require(&self, order_ref: &str) -> Result<RechargeTransaction> {
        self.store
            .recharge(order_ref)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(order_ref.to_string()))
    }
}

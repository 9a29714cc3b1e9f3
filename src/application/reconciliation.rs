use super::wallet::stage_posting;
use super::webhook::WebhookVerifier;
use crate::config::{LedgerConfig, ReconciliationConfig};
use crate::domain::UserId;
use crate::domain::callback::{CallbackOutcome, CallbackRecord, ProviderCallback, ReportedStatus, WebhookPayload};
use crate::domain::journal::{EntryKind, NewJournalEntry};
use crate::domain::money::{Amount, round_minor};
use crate::domain::order::{OrderPurpose, OrderStatus, PaymentOrder};
use crate::domain::ports::{LedgerEvent, SharedLedgerStore, SharedNotifier, WriteBatch};
use crate::domain::recharge::{RechargeStatus, RechargeTransaction};
use crate::domain::wallet::Wallet;
use crate::domain::CallbackId;
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

const UNKNOWN_PROVIDER: &str = "unknown";
const CONFLICT_RETRIES: usize = 3;

/// A gateway capture event, identified by the gateway's own ids.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPayment {
    pub provider: String,
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub amount: Option<Decimal>,
    pub raw_payload: String,
}

struct Resolution {
    outcome: CallbackOutcome,
    provider: String,
    event: Option<LedgerEvent>,
}

impl Resolution {
    fn unchanged(outcome: CallbackOutcome, provider: String) -> Self {
        Self {
            outcome,
            provider,
            event: None,
        }
    }
}

/// Applies asynchronous provider results to orders, recharges and the wallet.
///
/// Every callback is safe to deliver any number of times: a transaction that
/// already reached a terminal state with `callback_received` set is left alone,
/// and the status change, flag and money movement of a fresh callback are
/// committed together.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: SharedLedgerStore,
    notifier: SharedNotifier,
    verifier: WebhookVerifier,
    retry: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(store: SharedLedgerStore, notifier: SharedNotifier, config: &LedgerConfig) -> Self {
        Self {
            store,
            notifier,
            verifier: WebhookVerifier::new(config.webhook.clone()),
            retry: config.reconciliation.clone(),
        }
    }

    /// Reconciles one authenticated callback.
    ///
    /// Transient storage failures and lost races are retried with backoff; the
    /// next attempt re-reads state, so a duplicate that lost the race resolves
    /// to `AlreadyProcessed`. The raw payload is recorded whatever the result.
    #[instrument(skip(self, callback), fields(external_ref = %callback.external_ref, status = %callback.reported_status))]
    pub async fn handle_callback(&self, callback: ProviderCallback) -> Result<CallbackOutcome> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.reconcile(&callback).await {
                Ok(resolution) => break Ok(resolution),
                Err(e) if (e.is_retryable() || e.is_idempotent_noop()) && attempt < max_attempts => {
                    warn!(attempt, error = %e, "reconciliation attempt failed, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(resolution) => {
                self.record(&callback, &resolution.provider, resolution.outcome)
                    .await;
                if let Some(event) = resolution.event {
                    self.dispatch(event);
                }
                info!(outcome = ?resolution.outcome, "callback reconciled");
                Ok(resolution.outcome)
            }
            Err(e) => {
                let outcome = if e.is_retryable() {
                    CallbackOutcome::StillPending
                } else {
                    CallbackOutcome::Rejected
                };
                let provider = callback.provider.as_deref().unwrap_or(UNKNOWN_PROVIDER);
                self.record(&callback, provider, outcome).await;
                Err(e)
            }
        }
    }

    /// Reconciles a capture reported against the gateway's order id.
    pub async fn handle_captured_payment(&self, payment: CapturedPayment) -> Result<CallbackOutcome> {
        let external_ref = match self.store.order_by_provider_id(&payment.provider_order_id).await? {
            Some(order) => order.order_ref,
            None => payment.provider_order_id.clone(),
        };
        let mut callback = ProviderCallback::new(external_ref, "captured")
            .via(payment.provider)
            .provider_txn(payment.provider_payment_id)
            .raw(payment.raw_payload);
        callback.amount = payment.amount;
        self.handle_callback(callback).await
    }

    /// Verifies a signed webhook body and reconciles it.
    ///
    /// Nothing is read or written for a body whose signature does not check out.
    #[instrument(skip(self, body, signature))]
    pub async fn verify_and_handle(&self, provider: &str, body: &[u8], signature: &str) -> Result<CallbackOutcome> {
        if let Err(e) = self.verifier.verify(provider, body, signature) {
            error!(alert = true, "webhook signature verification failed");
            return Err(e);
        }
        let payload: WebhookPayload = serde_json::from_slice(body)
            .inspect_err(|e| warn!(error = %e, "malformed webhook payload"))?;
        let raw = String::from_utf8_lossy(body).into_owned();
        self.handle_callback(payload.into_callback(raw).via(provider))
            .await
    }

    /// Moves a FAILED recharge to REFUNDED, crediting the debit back if it was
    /// not refunded already.
    #[instrument(skip(self))]
    pub async fn refund_failed(&self, order_ref: &str, reviewer_id: UserId) -> Result<RechargeTransaction> {
        let mut last_conflict = None;
        for _ in 0..CONFLICT_RETRIES {
            let recharge = self
                .store
                .recharge(order_ref)
                .await?
                .ok_or_else(|| LedgerError::UnknownReference(order_ref.to_string()))?;
            match recharge.status {
                RechargeStatus::Failed => {}
                RechargeStatus::Refunded => {
                    return Err(LedgerError::AlreadyFinalized(format!(
                        "recharge {order_ref} is already refunded"
                    )));
                }
                other => {
                    return Err(LedgerError::InvalidTransition {
                        from: other.to_string(),
                        to: RechargeStatus::Refunded.to_string(),
                    });
                }
            }

            let now = Utc::now();
            let mut updated = recharge.clone();
            updated.status = RechargeStatus::Refunded;
            updated.updated_at = now;
            let mut batch = WriteBatch::new();
            batch.update_recharge(updated.clone());
            let refunded = if recharge.was_debited() {
                self.stage_refund(
                    &mut batch,
                    recharge.user_id,
                    order_ref,
                    recharge.amount,
                    format!("Refund for recharge {order_ref} approved by reviewer {reviewer_id}"),
                    now,
                )
                .await?
            } else {
                None
            };

            match self.store.commit(batch).await {
                Ok(_) => {
                    info!(refunded = ?refunded, "recharge refunded");
                    if refunded.is_some() {
                        self.dispatch(LedgerEvent::RechargeFailed {
                            user_id: recharge.user_id,
                            order_ref: order_ref.to_string(),
                            refunded,
                        });
                    }
                    updated.revision += 1;
                    return Ok(updated);
                }
                Err(e @ LedgerError::Conflict(_)) => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| LedgerError::Conflict(order_ref.to_string())))
    }

    /// Audit trail of callbacks received for `external_ref`, oldest first.
    pub async fn callbacks_for(&self, external_ref: &str) -> Result<Vec<CallbackRecord>> {
        self.store.callbacks(external_ref).await
    }

    async fn reconcile(&self, callback: &ProviderCallback) -> Result<Resolution> {
        if let Some(order) = self.store.order(&callback.external_ref).await? {
            return self.reconcile_order(order, callback).await;
        }
        if let Some(recharge) = self.store.recharge(&callback.external_ref).await? {
            return self.reconcile_recharge(recharge, callback).await;
        }
        warn!("callback for unknown reference");
        Err(LedgerError::UnknownReference(callback.external_ref.clone()))
    }

    async fn reconcile_order(&self, order: PaymentOrder, callback: &ProviderCallback) -> Result<Resolution> {
        let provider = order.provider.clone();
        check_sender(callback, &provider)?;
        if order.is_processed() {
            debug!(status = %order.status, "order already settled");
            if order.purpose == OrderPurpose::Deposit {
                self.flag_second_capture(&order.order_ref, callback).await?;
            }
            return Ok(Resolution::unchanged(CallbackOutcome::AlreadyProcessed, provider));
        }
        if order.status.is_terminal() {
            return self.reconcile_closed_order(order, callback).await;
        }
        let succeeded = match ReportedStatus::from_provider(&callback.reported_status) {
            ReportedStatus::Pending => {
                return Ok(Resolution::unchanged(CallbackOutcome::StillPending, provider));
            }
            ReportedStatus::Success => true,
            ReportedStatus::Failed => false,
        };
        check_amount(order.expected_amount(), callback.amount)?;

        let now = Utc::now();
        let mut updated = order.clone();
        updated.callback_received = true;
        updated.updated_at = now;
        let mut batch = WriteBatch::new();

        let (outcome, event) = if succeeded {
            updated.status = OrderStatus::Paid;
            batch.update_order(updated);
            let event = match order.purpose {
                // One DEPOSIT per order_ref. A provider payment maps to exactly one
                // provider order and so to one order_ref, so the order key also
                // keys the credit by payment id.
                OrderPurpose::Deposit => {
                    let wallet = self.wallet(order.user_id).await?;
                    let mut credit = NewJournalEntry::new(order.user_id, EntryKind::Deposit, order.fees.base)
                        .reference(order.order_ref.clone())
                        .description(format!("Wallet top-up via {provider}"))
                        .meta("provider", provider.clone());
                    if let Some(txn) = &callback.provider_txn_id {
                        credit = credit.meta("provider_txn_id", txn.clone());
                    }
                    stage_posting(&mut batch, &wallet, credit, now);
                    LedgerEvent::DepositCredited {
                        user_id: order.user_id,
                        order_ref: order.order_ref.clone(),
                        amount: order.fees.base.value(),
                    }
                }
                OrderPurpose::Purchase => LedgerEvent::PurchaseConfirmed {
                    user_id: order.user_id,
                    order_ref: order.order_ref.clone(),
                    amount: order.expected_amount().value(),
                },
            };
            (CallbackOutcome::Succeeded, event)
        } else {
            updated.status = OrderStatus::Failed;
            batch.update_order(updated);
            let refunded = if order.debit_entry_id.is_some() {
                self.stage_refund(
                    &mut batch,
                    order.user_id,
                    &order.order_ref,
                    order.expected_amount(),
                    format!("Refund for failed order {}", order.order_ref),
                    now,
                )
                .await?
            } else {
                None
            };
            let event = LedgerEvent::OrderFailed {
                user_id: order.user_id,
                order_ref: order.order_ref.clone(),
                refunded,
            };
            (CallbackOutcome::Failed, event)
        };

        self.store.commit(batch).await?;
        Ok(Resolution {
            outcome,
            provider,
            event: Some(event),
        })
    }

    async fn reconcile_recharge(
        &self,
        recharge: RechargeTransaction,
        callback: &ProviderCallback,
    ) -> Result<Resolution> {
        let provider = recharge.provider.clone();
        check_sender(callback, &provider)?;
        if recharge.is_processed() {
            debug!(status = %recharge.status, "recharge already settled");
            return Ok(Resolution::unchanged(CallbackOutcome::AlreadyProcessed, provider));
        }
        let reported = ReportedStatus::from_provider(&callback.reported_status);
        if recharge.status.is_terminal() {
            if reported == ReportedStatus::Pending {
                return Ok(Resolution::unchanged(CallbackOutcome::StillPending, provider));
            }
            let to = match reported {
                ReportedStatus::Success => RechargeStatus::Success,
                _ => RechargeStatus::Failed,
            };
            error!(alert = true, status = %recharge.status, reported = %to, "provider verdict for a recharge closed without a callback");
            return Err(LedgerError::InvalidTransition {
                from: recharge.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        let succeeded = match reported {
            ReportedStatus::Pending => {
                if recharge.provider_txn_id.is_none()
                    && let Some(txn) = &callback.provider_txn_id
                {
                    let mut updated = recharge.clone();
                    updated.provider_txn_id = Some(txn.clone());
                    updated.updated_at = now;
                    let mut batch = WriteBatch::new();
                    batch.update_recharge(updated);
                    self.store.commit(batch).await?;
                }
                return Ok(Resolution::unchanged(CallbackOutcome::StillPending, provider));
            }
            ReportedStatus::Success => true,
            ReportedStatus::Failed => false,
        };
        check_amount(recharge.amount, callback.amount)?;

        let mut updated = recharge.clone();
        updated.callback_received = true;
        updated.updated_at = now;
        if updated.provider_txn_id.is_none() {
            updated.provider_txn_id = callback.provider_txn_id.clone();
        }
        if let Some(operator_txn) = &callback.operator_txn_id {
            updated.operator_transaction_id = Some(operator_txn.clone());
        }
        let mut batch = WriteBatch::new();

        let (outcome, event) = if succeeded {
            updated.status = RechargeStatus::Success;
            batch.update_recharge(updated);
            let already_paid = self
                .store
                .entry_by_reference(&recharge.order_ref, EntryKind::Commission)
                .await?
                .is_some();
            let commission = match Amount::new(round_minor(recharge.commission_amount)) {
                Ok(commission) if !already_paid => {
                    let wallet = self.wallet(recharge.user_id).await?;
                    let credit = NewJournalEntry::new(recharge.user_id, EntryKind::Commission, commission)
                        .reference(recharge.order_ref.clone())
                        .description(format!(
                            "Commission for {} recharge {}",
                            recharge.service_type, recharge.order_ref
                        ))
                        .meta("operator", recharge.operator.clone());
                    stage_posting(&mut batch, &wallet, credit, now);
                    commission.value()
                }
                _ => Decimal::ZERO,
            };
            let event = LedgerEvent::RechargeSucceeded {
                user_id: recharge.user_id,
                order_ref: recharge.order_ref.clone(),
                commission,
            };
            (CallbackOutcome::Succeeded, event)
        } else {
            updated.status = RechargeStatus::Failed;
            batch.update_recharge(updated);
            let refunded = if recharge.was_debited() {
                self.stage_refund(
                    &mut batch,
                    recharge.user_id,
                    &recharge.order_ref,
                    recharge.amount,
                    format!("Refund for failed recharge {}", recharge.order_ref),
                    now,
                )
                .await?
            } else {
                None
            };
            let event = LedgerEvent::RechargeFailed {
                user_id: recharge.user_id,
                order_ref: recharge.order_ref.clone(),
                refunded,
            };
            (CallbackOutcome::Failed, event)
        };

        self.store.commit(batch).await?;
        Ok(Resolution {
            outcome,
            provider,
            event: Some(event),
        })
    }

    /// Handles a provider verdict for an order that was closed locally, i.e.
    /// expired, before any callback arrived.
    ///
    /// A failure agrees with the closure and is only acknowledged. A success
    /// means money was captured for an order nobody will credit, so it is
    /// refused loudly instead of being absorbed as a duplicate.
    async fn reconcile_closed_order(&self, order: PaymentOrder, callback: &ProviderCallback) -> Result<Resolution> {
        let provider = order.provider.clone();
        match ReportedStatus::from_provider(&callback.reported_status) {
            ReportedStatus::Pending => Ok(Resolution::unchanged(CallbackOutcome::StillPending, provider)),
            ReportedStatus::Failed => {
                let mut updated = order.clone();
                updated.callback_received = true;
                updated.updated_at = Utc::now();
                let mut batch = WriteBatch::new();
                batch.update_order(updated);
                self.store.commit(batch).await?;
                info!(status = %order.status, "failure acknowledged for closed order");
                Ok(Resolution::unchanged(CallbackOutcome::Failed, provider))
            }
            ReportedStatus::Success => {
                error!(
                    alert = true,
                    status = %order.status,
                    provider_txn_id = ?callback.provider_txn_id,
                    "payment captured for an order closed without a callback"
                );
                Err(LedgerError::InvalidTransition {
                    from: order.status.to_string(),
                    to: OrderStatus::Paid.to_string(),
                })
            }
        }
    }

    /// Alerts when a settled deposit is reported again under a different
    /// payment id: the gateway captured twice and only one was credited.
    async fn flag_second_capture(&self, order_ref: &str, callback: &ProviderCallback) -> Result<()> {
        let Some(reported) = callback.provider_txn_id.as_deref() else {
            return Ok(());
        };
        if ReportedStatus::from_provider(&callback.reported_status) != ReportedStatus::Success {
            return Ok(());
        }
        let credited = self.store.entry_by_reference(order_ref, EntryKind::Deposit).await?;
        let credited_txn = credited
            .as_ref()
            .and_then(|entry| entry.metadata.get("provider_txn_id"))
            .map(String::as_str);
        if let Some(credited_txn) = credited_txn
            && credited_txn != reported
        {
            error!(
                alert = true,
                credited = credited_txn,
                reported,
                "second capture on a settled deposit left uncredited"
            );
        }
        Ok(())
    }

    /// Stages a REFUND under `reference` unless one already exists.
    async fn stage_refund(
        &self,
        batch: &mut WriteBatch,
        user_id: UserId,
        reference: &str,
        amount: Amount,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>> {
        if self
            .store
            .entry_by_reference(reference, EntryKind::Refund)
            .await?
            .is_some()
        {
            debug!(reference, "refund already posted");
            return Ok(None);
        }
        let wallet = self.wallet(user_id).await?;
        let refund = NewJournalEntry::new(user_id, EntryKind::Refund, amount)
            .reference(reference)
            .description(description);
        stage_posting(batch, &wallet, refund, now);
        Ok(Some(amount.value()))
    }

    async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.store
            .wallet(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    async fn record(&self, callback: &ProviderCallback, provider: &str, outcome: CallbackOutcome) {
        let record = CallbackRecord {
            id: CallbackId::new(),
            provider: provider.to_string(),
            external_ref: callback.external_ref.clone(),
            raw_payload: callback.raw_payload.clone(),
            outcome,
            received_at: Utc::now(),
        };
        let mut batch = WriteBatch::new();
        batch.record_callback(record);
        if let Err(e) = self.store.commit(batch).await {
            error!(error = %e, "failed to persist callback payload");
        }
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

/// A signed callback may only settle transactions of the provider that signed it.
fn check_sender(callback: &ProviderCallback, owner: &str) -> Result<()> {
    match callback.provider.as_deref() {
        Some(sender) if !sender.eq_ignore_ascii_case(owner) => {
            error!(alert = true, sender, owner, "callback sender does not own the transaction");
            Err(LedgerError::InvalidSignature)
        }
        _ => Ok(()),
    }
}

fn check_amount(expected: Amount, reported: Option<Decimal>) -> Result<()> {
    match reported {
        Some(reported) if reported != expected.value() => {
            warn!(%expected, %reported, "callback amount does not match");
            Err(LedgerError::AmountMismatch {
                expected: expected.value(),
                reported,
            })
        }
        _ => Ok(()),
    }
}

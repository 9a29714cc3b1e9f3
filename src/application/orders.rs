use super::sequence::SequenceGenerator;
use super::wallet::stage_posting;
use crate::config::LedgerConfig;
use crate::domain::journal::{EntryKind, NewJournalEntry};
use crate::domain::money::Amount;
use crate::domain::order::{FeeSchedule, OrderPurpose, OrderStatus, PaymentOrder};
use crate::domain::ports::{Customer, GatewayOrderRequest, PaymentGateway, SharedLedgerStore, WriteBatch};
use crate::domain::{OrderId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

const CONFLICT_RETRIES: usize = 3;

/// Parameters for a new payment order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub base: Amount,
    pub purpose: OrderPurpose,
    /// Gateway name; the configured default when `None`.
    pub provider: Option<String>,
    /// Fee rules; the configured schedule when `None`.
    pub fees: Option<FeeSchedule>,
}

impl NewOrder {
    pub fn deposit(user_id: UserId, base: Amount) -> Self {
        Self {
            user_id,
            base,
            purpose: OrderPurpose::Deposit,
            provider: None,
            fees: None,
        }
    }

    pub fn purchase(user_id: UserId, base: Amount) -> Self {
        Self {
            purpose: OrderPurpose::Purchase,
            ..Self::deposit(user_id, base)
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = Some(fees);
        self
    }
}

/// A created order plus what the client needs to complete payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkout {
    pub order: PaymentOrder,
    pub payment_session_ref: String,
}

/// Creates and tracks orders paid through an external gateway.
///
/// Terminal PAID/FAILED transitions belong to the reconciliation engine; this
/// type only creates orders, records the gateway's id, and expires stale ones.
#[derive(Clone)]
pub struct PaymentOrderManager {
    store: SharedLedgerStore,
    sequence: SequenceGenerator,
    namespace: String,
    default_provider: String,
    default_fees: FeeSchedule,
    currency: String,
    expire_after: Duration,
}

impl PaymentOrderManager {
    pub fn new(store: SharedLedgerStore, sequence: SequenceGenerator, config: &LedgerConfig) -> Self {
        Self {
            store,
            sequence,
            namespace: config.sequence.order_namespace.clone(),
            default_provider: config.orders.provider.clone(),
            default_fees: config.fees,
            currency: config.currency.clone(),
            expire_after: Duration::minutes(config.orders.expire_after_minutes),
        }
    }

    /// Creates a CREATED order with a fresh `order_ref`.
    ///
    /// A purchase debits the total in the same commit, so the order never
    /// exists without the money being held.
    #[instrument(skip(self, request), fields(user_id = request.user_id, base = %request.base, purpose = ?request.purpose))]
    pub async fn create_order(&self, request: NewOrder) -> Result<PaymentOrder> {
        let fees = request.fees.unwrap_or(self.default_fees).breakdown(request.base)?;
        let wallet = self
            .store
            .wallet(request.user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(request.user_id))?;
        if request.purpose == OrderPurpose::Purchase && wallet.balance.value() < fees.total.value() {
            return Err(LedgerError::InsufficientFunds {
                user_id: request.user_id,
                balance: wallet.balance.value(),
                requested: fees.total.value(),
            });
        }

        let order_ref = self.sequence.next_for_current_year(&self.namespace).await?;
        let now = Utc::now();
        let mut order = PaymentOrder {
            id: OrderId::new(),
            user_id: request.user_id,
            order_ref: order_ref.clone(),
            provider: request.provider.unwrap_or_else(|| self.default_provider.clone()),
            provider_order_id: None,
            purpose: request.purpose,
            fees,
            status: OrderStatus::Created,
            callback_received: false,
            debit_entry_id: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        let mut batch = WriteBatch::new();
        if order.purpose == OrderPurpose::Purchase {
            let debit = NewJournalEntry::new(order.user_id, EntryKind::SchemePayment, fees.total)
                .reference(order_ref.clone())
                .description(format!("Wallet payment for order {order_ref}"))
                .meta("base", fees.base.to_string())
                .meta("tax", fees.tax.to_string())
                .meta("platform_fee", fees.platform.to_string());
            order.debit_entry_id = Some(stage_posting(&mut batch, &wallet, debit, now));
        }
        batch.insert_order(order.clone());
        self.store.commit(batch).await?;

        info!(order_ref = %order.order_ref, total = %fees.total, "payment order created");
        Ok(order)
    }

    /// Records the gateway's order id. Repeating the same id is a no-op.
    #[instrument(skip(self))]
    pub async fn mark_submitted(&self, order_ref: &str, provider_order_id: &str) -> Result<PaymentOrder> {
        if provider_order_id.trim().is_empty() {
            return Err(LedgerError::ValidationError(
                "provider order id must not be empty".to_string(),
            ));
        }

        let mut last_conflict = None;
        for _ in 0..CONFLICT_RETRIES {
            let order = self.require(order_ref).await?;
            match order.provider_order_id.as_deref() {
                Some(existing) if existing == provider_order_id => {
                    debug!("provider order id already recorded");
                    return Ok(order);
                }
                Some(existing) => {
                    return Err(LedgerError::DuplicateReference(format!(
                        "order {order_ref} already submitted as {existing}"
                    )));
                }
                None if order.status.is_terminal() => {
                    return Err(LedgerError::AlreadyFinalized(format!(
                        "order {order_ref} is {}",
                        order.status
                    )));
                }
                None => {}
            }

            let mut updated = order.clone();
            updated.provider_order_id = Some(provider_order_id.to_string());
            updated.updated_at = Utc::now();
            let mut batch = WriteBatch::new();
            batch.update_order(updated.clone());
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

    /// Creates an order and registers it with `gateway`.
    ///
    /// A gateway failure leaves the order CREATED; `expire_stale` cleans it up.
    #[instrument(skip(self, gateway, request, customer), fields(gateway = gateway.name(), user_id = request.user_id))]
    pub async fn start_checkout(
        &self,
        gateway: &dyn PaymentGateway,
        request: NewOrder,
        customer: Customer,
    ) -> Result<Checkout> {
        let request = match request.provider {
            Some(_) => request,
            None => request.provider(gateway.name()),
        };
        let order = self.create_order(request).await?;
        let gateway_order = gateway
            .create_order(GatewayOrderRequest {
                order_ref: order.order_ref.clone(),
                amount: order.expected_amount(),
                currency: self.currency.clone(),
                customer,
            })
            .await
            .inspect_err(|e| warn!(order_ref = %order.order_ref, error = %e, "gateway rejected order"))?;
        let order = self
            .mark_submitted(&order.order_ref, &gateway_order.gateway_order_id)
            .await?;
        Ok(Checkout {
            order,
            payment_session_ref: gateway_order.payment_session_ref,
        })
    }

    /// Expires CREATED orders older than the configured window, as of `now`.
    ///
    /// Purchases get their debit refunded in the same commit. Orders touched
    /// concurrently are skipped and picked up on the next run.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.expire_after;
        let mut expired = 0;
        for order in self.store.open_orders_created_before(cutoff).await? {
            let mut batch = WriteBatch::new();
            let mut updated = order.clone();
            updated.status = OrderStatus::Expired;
            updated.updated_at = now;
            batch.update_order(updated);

            if order.debit_entry_id.is_some()
                && self
                    .store
                    .entry_by_reference(&order.order_ref, EntryKind::Refund)
                    .await?
                    .is_none()
            {
                let wallet = self
                    .store
                    .wallet(order.user_id)
                    .await?
                    .ok_or(LedgerError::WalletNotFound(order.user_id))?;
                let refund = NewJournalEntry::new(order.user_id, EntryKind::Refund, order.expected_amount())
                    .reference(order.order_ref.clone())
                    .description(format!("Refund for expired order {}", order.order_ref));
                stage_posting(&mut batch, &wallet, refund, now);
            }

            match self.store.commit(batch).await {
                Ok(_) => {
                    info!(order_ref = %order.order_ref, "order expired");
                    expired += 1;
                }
                Err(e) if e.is_retryable() || e.is_idempotent_noop() => {
                    debug!(order_ref = %order.order_ref, error = %e, "skipping order changed concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    pub async fn get(&self, order_ref: &str) -> Result<Option<PaymentOrder>> {
        self.store.order(order_ref).await
    }

    async fn require(&self, order_ref: &str) -> Result<PaymentOrder> {
        self.store
            .order(order_ref)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(order_ref.to_string()))
    }
}

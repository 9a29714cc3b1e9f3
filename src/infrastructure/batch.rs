//! Validation of a [`WriteBatch`] against current state.
//!
//! Backends call [`plan`] while holding their commit guard, then persist the
//! resulting [`Plan`] in one atomic write. Preconditions are checked against the
//! stored rows overlaid with the effects of earlier writes in the same batch, so
//! two debits in one batch see each other.

use crate::domain::callback::CallbackRecord;
use crate::domain::journal::{EntryKind, JournalEntry};
use crate::domain::order::PaymentOrder;
use crate::domain::ports::{CommitReceipt, Write};
use crate::domain::recharge::RechargeTransaction;
use crate::domain::request::WalletRequest;
use crate::domain::sequence::SequenceClaim;
use crate::domain::wallet::Wallet;
use crate::domain::{EntryId, RequestId, UserId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Read access a backend exposes to the planner while its commit guard is held.
pub(crate) trait StateView {
    fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;
    fn entry(&self, id: EntryId) -> Result<Option<JournalEntry>>;
    fn entry_key_taken(&self, reference: &str, kind: EntryKind) -> Result<bool>;
    fn order(&self, order_ref: &str) -> Result<Option<PaymentOrder>>;
    /// `order_ref` of the order already holding `provider_order_id`, if any.
    fn provider_order_owner(&self, provider_order_id: &str) -> Result<Option<String>>;
    fn recharge(&self, order_ref: &str) -> Result<Option<RechargeTransaction>>;
    fn request(&self, id: RequestId) -> Result<Option<WalletRequest>>;
    fn sequence_claimed(&self, claim: &SequenceClaim) -> Result<bool>;
}

/// Final rows a committed batch produces.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub wallets: HashMap<UserId, Wallet>,
    pub new_entries: HashMap<EntryId, JournalEntry>,
    pub updated_entries: HashMap<EntryId, JournalEntry>,
    pub orders: HashMap<String, PaymentOrder>,
    pub recharges: HashMap<String, RechargeTransaction>,
    pub requests: HashMap<RequestId, WalletRequest>,
    pub sequences: Vec<SequenceClaim>,
    pub callbacks: Vec<CallbackRecord>,
    entry_keys: HashSet<(String, EntryKind)>,
    provider_ids: HashMap<String, String>,
}

impl Plan {
    pub fn receipt(&self) -> CommitReceipt {
        CommitReceipt {
            balances: self
                .wallets
                .iter()
                .map(|(user_id, wallet)| (*user_id, wallet.balance))
                .collect(),
        }
    }

    fn current_wallet<V: StateView>(&self, view: &V, user_id: UserId) -> Result<Option<Wallet>> {
        match self.wallets.get(&user_id) {
            Some(wallet) => Ok(Some(wallet.clone())),
            None => view.wallet(user_id),
        }
    }

    fn current_entry<V: StateView>(&self, view: &V, id: EntryId) -> Result<Option<JournalEntry>> {
        if let Some(entry) = self.new_entries.get(&id).or_else(|| self.updated_entries.get(&id)) {
            return Ok(Some(entry.clone()));
        }
        view.entry(id)
    }

    fn current_order<V: StateView>(&self, view: &V, order_ref: &str) -> Result<Option<PaymentOrder>> {
        match self.orders.get(order_ref) {
            Some(order) => Ok(Some(order.clone())),
            None => view.order(order_ref),
        }
    }

    fn check_provider_id<V: StateView>(&self, view: &V, order: &PaymentOrder) -> Result<()> {
        let Some(provider_order_id) = order.provider_order_id.as_deref() else {
            return Ok(());
        };
        let owner = match self.provider_ids.get(provider_order_id) {
            Some(owner) => Some(owner.clone()),
            None => view.provider_order_owner(provider_order_id)?,
        };
        match owner {
            Some(owner) if owner != order.order_ref => Err(LedgerError::DuplicateReference(
                format!("provider order id {provider_order_id} already belongs to {owner}"),
            )),
            _ => Ok(()),
        }
    }
}

/// Validates `writes` in order and resolves them into a [`Plan`].
pub(crate) fn plan<V: StateView>(view: &V, writes: Vec<Write>, now: DateTime<Utc>) -> Result<Plan> {
    let mut plan = Plan::default();

    for write in writes {
        match write {
            Write::InsertWallet(wallet) => {
                if plan.current_wallet(view, wallet.user_id)?.is_some() {
                    return Err(LedgerError::DuplicateKey(format!(
                        "wallet for user {}",
                        wallet.user_id
                    )));
                }
                plan.wallets.insert(wallet.user_id, wallet);
            }
            Write::AdjustBalance { user_id, delta } => {
                let mut wallet = plan
                    .current_wallet(view, user_id)?
                    .ok_or(LedgerError::WalletNotFound(user_id))?;
                let Some(next) = wallet.balance.checked_apply(delta) else {
                    return Err(LedgerError::InsufficientFunds {
                        user_id,
                        balance: wallet.balance.value(),
                        requested: -delta,
                    });
                };
                wallet.balance = next;
                wallet.updated_at = now;
                plan.wallets.insert(user_id, wallet);
            }
            Write::InsertEntry(entry) => {
                if plan.current_entry(view, entry.id)?.is_some() {
                    return Err(LedgerError::DuplicateKey(format!("journal entry {}", entry.id)));
                }
                if let Some((reference, kind)) = entry.idempotency_key() {
                    let key = (reference.to_string(), kind);
                    if plan.entry_keys.contains(&key) || view.entry_key_taken(reference, kind)? {
                        return Err(LedgerError::DuplicateReference(format!("{reference}/{kind}")));
                    }
                    plan.entry_keys.insert(key);
                }
                plan.new_entries.insert(entry.id, entry);
            }
            Write::TransitionEntry { id, to, at } => {
                let mut entry = plan
                    .current_entry(view, id)?
                    .ok_or_else(|| LedgerError::UnknownReference(format!("journal entry {id}")))?;
                if !entry.status.can_transition_to(to) {
                    if entry.status.is_terminal() {
                        return Err(LedgerError::AlreadyFinalized(format!(
                            "journal entry {id} is {}",
                            entry.status
                        )));
                    }
                    return Err(LedgerError::InvalidTransition {
                        from: entry.status.to_string(),
                        to: to.to_string(),
                    });
                }
                entry.status = to;
                entry.completed_at = Some(at);
                if plan.new_entries.contains_key(&id) {
                    plan.new_entries.insert(id, entry);
                } else {
                    plan.updated_entries.insert(id, entry);
                }
            }
            Write::InsertOrder(order) => {
                if plan.current_order(view, &order.order_ref)?.is_some() {
                    return Err(LedgerError::DuplicateKey(format!("order {}", order.order_ref)));
                }
                plan.check_provider_id(view, &order)?;
                if let Some(provider_order_id) = &order.provider_order_id {
                    plan.provider_ids
                        .insert(provider_order_id.clone(), order.order_ref.clone());
                }
                plan.orders.insert(order.order_ref.clone(), order);
            }
            Write::UpdateOrder {
                order,
                expected_revision,
            } => {
                let current = plan
                    .current_order(view, &order.order_ref)?
                    .ok_or_else(|| LedgerError::UnknownReference(order.order_ref.clone()))?;
                if current.revision != expected_revision {
                    return Err(LedgerError::Conflict(format!(
                        "order {} changed concurrently",
                        order.order_ref
                    )));
                }
                plan.check_provider_id(view, &order)?;
                if let Some(provider_order_id) = &order.provider_order_id {
                    plan.provider_ids
                        .insert(provider_order_id.clone(), order.order_ref.clone());
                }
                plan.orders.insert(order.order_ref.clone(), order);
            }
            Write::InsertRecharge(recharge) => {
                let exists = match plan.recharges.get(&recharge.order_ref) {
                    Some(_) => true,
                    None => view.recharge(&recharge.order_ref)?.is_some(),
                };
                if exists {
                    return Err(LedgerError::DuplicateKey(format!(
                        "recharge {}",
                        recharge.order_ref
                    )));
                }
                plan.recharges.insert(recharge.order_ref.clone(), recharge);
            }
            Write::UpdateRecharge {
                recharge,
                expected_revision,
            } => {
                let current = match plan.recharges.get(&recharge.order_ref) {
                    Some(current) => Some(current.clone()),
                    None => view.recharge(&recharge.order_ref)?,
                }
                .ok_or_else(|| LedgerError::UnknownReference(recharge.order_ref.clone()))?;
                if current.revision != expected_revision {
                    return Err(LedgerError::Conflict(format!(
                        "recharge {} changed concurrently",
                        recharge.order_ref
                    )));
                }
                plan.recharges.insert(recharge.order_ref.clone(), recharge);
            }
            Write::InsertRequest(request) => {
                let exists = match plan.requests.get(&request.id) {
                    Some(_) => true,
                    None => view.request(request.id)?.is_some(),
                };
                if exists {
                    return Err(LedgerError::DuplicateKey(format!("wallet request {}", request.id)));
                }
                plan.requests.insert(request.id, request);
            }
            Write::UpdateRequest {
                request,
                expected_revision,
            } => {
                let current = match plan.requests.get(&request.id) {
                    Some(current) => Some(current.clone()),
                    None => view.request(request.id)?,
                }
                .ok_or_else(|| LedgerError::UnknownReference(format!("wallet request {}", request.id)))?;
                if current.revision != expected_revision {
                    return Err(LedgerError::Conflict(format!(
                        "wallet request {} changed concurrently",
                        request.request_no
                    )));
                }
                plan.requests.insert(request.id, request);
            }
            Write::ClaimSequence(claim) => {
                if plan.sequences.contains(&claim) || view.sequence_claimed(&claim)? {
                    return Err(LedgerError::DuplicateKey(claim.number()));
                }
                plan.sequences.push(claim);
            }
            Write::RecordCallback(record) => plan.callbacks.push(record),
        }
    }

    Ok(plan)
}

use super::approval::ApprovalWorkflow;
use super::journal::JournalService;
use super::orders::PaymentOrderManager;
use super::recharge::RechargeService;
use super::reconciliation::ReconciliationEngine;
use super::sequence::SequenceGenerator;
use super::wallet::WalletService;
use crate::config::LedgerConfig;
use crate::domain::ports::{SharedLedgerStore, SharedNotifier};
use crate::domain::wallet::Wallet;
use crate::error::Result;
use crate::infrastructure::in_memory::InMemoryLedgerStore;
use crate::infrastructure::notifier::TracingNotifier;
use std::sync::Arc;

/// The wallet ledger with all of its services wired to one store.
///
/// Cloning is cheap; clones share the store and the notifier.
#[derive(Clone)]
pub struct Ledger {
    store: SharedLedgerStore,
    config: Arc<LedgerConfig>,
    wallets: WalletService,
    journal: JournalService,
    sequence: SequenceGenerator,
    orders: PaymentOrderManager,
    reconciliation: ReconciliationEngine,
    recharges: RechargeService,
    approvals: ApprovalWorkflow,
}

impl Ledger {
    pub fn new(store: SharedLedgerStore, config: LedgerConfig, notifier: SharedNotifier) -> Self {
        let sequence = SequenceGenerator::new(store.clone(), config.sequence.max_attempts);
        let reconciliation = ReconciliationEngine::new(store.clone(), notifier.clone(), &config);
        Self {
            wallets: WalletService::new(store.clone()),
            journal: JournalService::new(store.clone(), config.journal.page_size),
            orders: PaymentOrderManager::new(store.clone(), sequence.clone(), &config),
            recharges: RechargeService::new(store.clone(), sequence.clone(), reconciliation.clone(), &config),
            approvals: ApprovalWorkflow::new(
                store.clone(),
                sequence.clone(),
                notifier,
                config.sequence.request_namespace.clone(),
            ),
            reconciliation,
            sequence,
            store,
            config: Arc::new(config),
        }
    }

    /// A ledger over a fresh in-memory store that logs its notifications.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerStore::new()),
            config,
            Arc::new(TracingNotifier),
        )
    }

    pub fn store(&self) -> &SharedLedgerStore {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn wallets(&self) -> &WalletService {
        &self.wallets
    }

    pub fn journal(&self) -> &JournalService {
        &self.journal
    }

    pub fn sequence(&self) -> &SequenceGenerator {
        &self.sequence
    }

    pub fn orders(&self) -> &PaymentOrderManager {
        &self.orders
    }

    pub fn reconciliation(&self) -> &ReconciliationEngine {
        &self.reconciliation
    }

    pub fn recharges(&self) -> &RechargeService {
        &self.recharges
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    /// Every wallet, ordered by user id.
    pub async fn wallets_snapshot(&self) -> Result<Vec<Wallet>> {
        self.store.all_wallets().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::orders::NewOrder;
    use crate::domain::callback::{CallbackOutcome, ProviderCallback};
    use crate::domain::money::Amount;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_services_share_one_store() {
        let ledger = Ledger::in_memory(LedgerConfig::default());
        ledger.wallets().open_wallet(2).await.unwrap();
        ledger.wallets().open_wallet(1).await.unwrap();

        let order = ledger
            .orders()
            .create_order(NewOrder::deposit(1, Amount::new(dec!(75)).unwrap()))
            .await
            .unwrap();
        let outcome = ledger
            .reconciliation()
            .handle_callback(ProviderCallback::new(order.order_ref, "paid"))
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Succeeded);

        let wallets = ledger.wallets_snapshot().await.unwrap();
        let users: Vec<_> = wallets.iter().map(|w| w.user_id).collect();
        assert_eq!(users, vec![1, 2]);
        assert_eq!(wallets[0].balance.value(), dec!(75));
    }
}

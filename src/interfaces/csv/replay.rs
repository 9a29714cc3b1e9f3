use super::command_reader::{CommandOp, LedgerCommand};
use crate::application::ledger::Ledger;
use crate::application::orders::NewOrder;
use crate::domain::RequestId;
use crate::domain::callback::ProviderCallback;
use crate::domain::journal::{EntryKind, NewJournalEntry};
use crate::domain::money::Amount;
use crate::domain::recharge::{RechargeRequest, ServiceType};
use crate::domain::request::RequestType;
use crate::error::{LedgerError, Result};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// What a `ref` written in a command file stands for.
#[derive(Debug, Clone)]
enum Alias {
    Order(String),
    Recharge(String),
    Request(RequestId),
}

/// Applies [`LedgerCommand`]s to a [`Ledger`].
///
/// Command files name orders, recharges and requests with their own labels;
/// the replayer maps each label to the generated reference so later rows can
/// refer back to it.
pub struct CommandReplayer {
    ledger: Ledger,
    aliases: HashMap<String, Alias>,
}

impl CommandReplayer {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            aliases: HashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn apply(&mut self, command: LedgerCommand) -> Result<()> {
        debug!(op = ?command.op, "applying command");
        match command.op {
            CommandOp::Open => {
                self.ledger
                    .wallets()
                    .open_wallet(required(command.user, "user")?)
                    .await?;
            }
            CommandOp::Deposit | CommandOp::Purchase => {
                let user_id = required(command.user, "user")?;
                let base = amount(command.amount)?;
                let request = if command.op == CommandOp::Deposit {
                    NewOrder::deposit(user_id, base)
                } else {
                    NewOrder::purchase(user_id, base)
                };
                let order = self.ledger.orders().create_order(request).await?;
                self.remember(command.reference, Alias::Order(order.order_ref));
            }
            CommandOp::Submitted => {
                let order_ref = self.resolve(required(command.reference, "ref")?);
                let provider_ref = required(command.provider_ref, "provider_ref")?;
                self.ledger
                    .orders()
                    .mark_submitted(&order_ref, &provider_ref)
                    .await?;
            }
            CommandOp::Callback => {
                let external_ref = self.resolve(required(command.reference, "ref")?);
                let status = required(command.status, "status")?;
                let mut callback = ProviderCallback::new(external_ref, status)
                    .raw(command.detail.unwrap_or_default());
                callback.provider_txn_id = command.provider_ref;
                callback.amount = command.amount;
                self.ledger
                    .reconciliation()
                    .handle_callback(callback)
                    .await?;
            }
            CommandOp::Recharge => {
                let user_id = required(command.user, "user")?;
                let request = recharge_request(&required(command.detail, "detail")?, amount(command.amount)?)?;
                let recharge = self.ledger.recharges().open(user_id, request).await?;
                self.remember(command.reference, Alias::Recharge(recharge.order_ref));
            }
            CommandOp::TopupRequest | CommandOp::WithdrawalRequest => {
                let r#type = if command.op == CommandOp::TopupRequest {
                    RequestType::Topup
                } else {
                    RequestType::Withdrawal
                };
                let request = self
                    .ledger
                    .approvals()
                    .submit(
                        required(command.user, "user")?,
                        r#type,
                        amount(command.amount)?,
                        command.detail,
                    )
                    .await?;
                self.remember(command.reference, Alias::Request(request.id));
            }
            CommandOp::Approve => {
                let request_id = self.request_id(&required(command.reference, "ref")?)?;
                self.ledger
                    .approvals()
                    .approve(request_id, required(command.user, "user")?)
                    .await?;
            }
            CommandOp::Reject => {
                let request_id = self.request_id(&required(command.reference, "ref")?)?;
                let reason = required(command.detail, "detail")?;
                self.ledger
                    .approvals()
                    .reject(request_id, required(command.user, "user")?, &reason)
                    .await?;
            }
            CommandOp::Charge => {
                let user_id = required(command.user, "user")?;
                let reference = required(command.reference, "ref")?;
                let entry = NewJournalEntry::new(user_id, EntryKind::SchemePayment, amount(command.amount)?)
                    .reference(reference)
                    .description(command.detail.unwrap_or_else(|| "Service charge".to_string()));
                self.ledger.wallets().charge(entry).await?;
            }
            CommandOp::Refund => {
                let order_ref = self.resolve(required(command.reference, "ref")?);
                self.ledger
                    .reconciliation()
                    .refund_failed(&order_ref, required(command.user, "user")?)
                    .await?;
            }
        }
        Ok(())
    }

    fn remember(&mut self, label: Option<String>, alias: Alias) {
        if let Some(label) = label {
            self.aliases.insert(label, alias);
        }
    }

    /// The generated reference behind `label`, or `label` itself.
    fn resolve(&self, label: String) -> String {
        match self.aliases.get(&label) {
            Some(Alias::Order(order_ref) | Alias::Recharge(order_ref)) => order_ref.clone(),
            Some(Alias::Request(_)) | None => label,
        }
    }

    fn request_id(&self, label: &str) -> Result<RequestId> {
        match self.aliases.get(label) {
            Some(Alias::Request(id)) => Ok(*id),
            _ => Uuid::parse_str(label)
                .map(RequestId)
                .map_err(|_| LedgerError::UnknownReference(label.to_string())),
        }
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| LedgerError::ValidationError(format!("missing column '{column}'")))
}

fn amount(value: Option<rust_decimal::Decimal>) -> Result<Amount> {
    Amount::new(required(value, "amount")?)
}

fn recharge_request(detail: &str, amount: Amount) -> Result<RechargeRequest> {
    let mut parts = detail.splitn(3, ':').map(str::trim);
    let (Some(service), Some(operator), Some(number)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(LedgerError::ValidationError(format!(
            "recharge detail '{detail}' is not service:operator:number"
        )));
    };
    let service_type: ServiceType = service.parse().map_err(LedgerError::ValidationError)?;
    Ok(RechargeRequest {
        service_type,
        operator: operator.to_string(),
        number: number.to_string(),
        amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::interfaces::csv::command_reader::CommandReader;
    use rust_decimal_macros::dec;

    async fn replay(data: &str) -> (CommandReplayer, Vec<LedgerError>) {
        let mut replayer = CommandReplayer::new(Ledger::in_memory(LedgerConfig::default()));
        let mut errors = Vec::new();
        for command in CommandReader::new(data.as_bytes()).commands() {
            if let Err(e) = replayer.apply(command.unwrap()).await {
                errors.push(e);
            }
        }
        (replayer, errors)
    }

    #[tokio::test]
    async fn test_deposit_purchase_and_request_flow() {
        let data = "op,user,ref,amount,status,provider_ref,detail\n\
                    open,1\n\
                    open,900\n\
                    deposit,1,d1,100\n\
                    submitted,,d1,,,order_1\n\
                    callback,,d1,100,captured,pay_1\n\
                    callback,,d1,100,captured,pay_1\n\
                    purchase,1,p1,30\n\
                    callback,,p1,,failed\n\
                    withdrawal_request,1,w1,60\n\
                    approve,900,w1\n\
                    charge,1,app-fee-1,15,,,Scheme application fee";
        let (replayer, errors) = replay(data).await;
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(replayer.ledger().wallets().get_balance(1).await.unwrap(), dec!(25));
    }

    #[tokio::test]
    async fn test_bad_rows_are_reported_and_skipped() {
        let data = "op,user,ref,amount,status,provider_ref,detail\n\
                    open,1\n\
                    deposit,1,d1\n\
                    recharge,1,r1,10,,,satellite:X:1\n\
                    approve,900,nope\n\
                    charge,1,c1,5";
        let (replayer, errors) = replay(data).await;
        assert_eq!(errors.len(), 4);
        assert!(matches!(errors[0], LedgerError::ValidationError(_)));
        assert!(matches!(errors[2], LedgerError::UnknownReference(_)));
        assert!(matches!(errors[3], LedgerError::InsufficientFunds { .. }));
        assert_eq!(replayer.ledger().wallets().get_balance(1).await.unwrap(), dec!(0));
    }

    #[test]
    fn test_recharge_detail_parsing() {
        let request = recharge_request("dth: Tata Play :1234", Amount::new(dec!(10)).unwrap()).unwrap();
        assert_eq!(request.service_type, ServiceType::Dth);
        assert_eq!(request.operator, "Tata Play");
        assert!(recharge_request("mobile:Jio", Amount::new(dec!(10)).unwrap()).is_err());
    }
}

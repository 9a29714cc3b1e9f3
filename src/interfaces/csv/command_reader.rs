use crate::domain::UserId;
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    /// Open a wallet for `user`.
    Open,
    /// Gateway top-up order of `amount`; `ref` names it for later rows.
    Deposit,
    /// Wallet-funded purchase order of `amount`.
    Purchase,
    /// The gateway accepted order `ref` as `provider_ref`.
    Submitted,
    /// Provider callback for `ref` with `status`, optional `amount` and `provider_ref`.
    Callback,
    /// Recharge of `amount`; `detail` is `service:operator:number`.
    Recharge,
    TopupRequest,
    WithdrawalRequest,
    /// Reviewer `user` approves request `ref`.
    Approve,
    /// Reviewer `user` rejects request `ref`; `detail` is the reason.
    Reject,
    /// Synchronous service charge of `amount` under reference `ref`.
    Charge,
    /// Reviewer `user` refunds failed recharge `ref`.
    Refund,
}

/// One row of a command file.
///
/// Columns: `op, user, ref, amount, status, provider_ref, detail`. Trailing
/// columns may be omitted.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerCommand {
    pub op: CommandOp,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub provider_ref: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Reads ledger commands from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands, one per row.
    pub fn commands(self) -> impl Iterator<Item = Result<LedgerCommand>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, user, ref, amount, status, provider_ref, detail\n\
                    open, 1\n\
                    deposit, 1, d1, 100.00\n\
                    callback, , d1, 102, success, pay_1\n\
                    recharge, 1, r1, 50, , , mobile:Jio:9876543210";
        let reader = CommandReader::new(data.as_bytes());
        let commands: Vec<LedgerCommand> = reader.commands().map(|c| c.unwrap()).collect();

        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].op, CommandOp::Open);
        assert_eq!(commands[0].reference, None);
        assert_eq!(commands[1].amount, Some(dec!(100)));
        assert_eq!(commands[2].user, None);
        assert_eq!(commands[2].status.as_deref(), Some("success"));
        assert_eq!(commands[2].provider_ref.as_deref(), Some("pay_1"));
        assert_eq!(commands[3].detail.as_deref(), Some("mobile:Jio:9876543210"));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, user, ref, amount\nteleport, 1, x, 1.0\ndeposit, one, x, 1.0";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<LedgerCommand>> = reader.commands().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }
}

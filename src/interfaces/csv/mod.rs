//! CSV command replay: read ledger commands, apply them, report balances.

pub mod command_reader;
pub mod replay;
pub mod wallet_writer;

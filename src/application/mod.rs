//! Application layer: the services that orchestrate ledger use cases on top
//! of the domain ports.
//!
//! Every service is cheap to clone and shares one [`crate::domain::ports::LedgerStore`].
//! [`ledger::Ledger`] wires them together from a [`crate::config::LedgerConfig`].

pub mod approval;
pub mod journal;
pub mod ledger;
pub mod orders;
pub mod recharge;
pub mod reconciliation;
pub mod sequence;
pub mod wallet;
pub mod webhook;

//! Wallet ledger and payment reconciliation engine.
//!
//! Keeps one wallet per user, an append-only journal explaining every balance
//! change, gateway payment orders, telecom/utility recharges and manual
//! top-up/withdrawal requests. Asynchronous provider callbacks are reconciled
//! idempotently against all of them.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;

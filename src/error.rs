use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::UserId;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient funds for user {user_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),
    #[error("Already finalized: {0}")]
    AlreadyFinalized(String),
    #[error("Unknown reference: {0}")]
    UnknownReference(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Sequence exhausted for {namespace}/{year} after {attempts} attempts")]
    SequenceExhausted {
        namespace: String,
        year: i32,
        attempts: u32,
    },
    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Amount mismatch: expected {expected}, reported {reported}")]
    AmountMismatch { expected: Decimal, reported: Decimal },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    InternalError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LedgerError {
    /// Errors that signal an event was already absorbed. Callers treat these as success.
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateReference(_) | LedgerError::AlreadyFinalized(_)
        )
    }

    /// Transient failures that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_) | LedgerError::Conflict(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_classification() {
        assert!(LedgerError::DuplicateReference("x".into()).is_idempotent_noop());
        assert!(LedgerError::AlreadyFinalized("x".into()).is_idempotent_noop());
        assert!(!LedgerError::UnknownReference("x".into()).is_idempotent_noop());
        assert!(!LedgerError::InvalidSignature.is_idempotent_noop());
    }

    #[test]
    fn test_retry_classification() {
        assert!(LedgerError::Storage("disk".into()).is_retryable());
        assert!(LedgerError::Conflict("order".into()).is_retryable());
        assert!(
            !LedgerError::InsufficientFunds {
                user_id: 1,
                balance: Decimal::ZERO,
                requested: Decimal::ONE,
            }
            .is_retryable()
        );
    }
}

//! Error types for the ledger module.

use thiserror::Error;

use memproof_core::{Address, TxHash};

/// Errors that can occur while talking to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Network, timeout or nonce trouble. Safe to retry.
    #[error("transient ledger failure: {0}")]
    Transient(String),

    /// The ledger refused the transaction. Retrying will not help.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The submitting key is not an authorized relayer.
    #[error("relayer {0} is not authorized")]
    Unauthorized(Address),

    /// The submission signature does not verify.
    #[error("invalid submission signature")]
    InvalidSignature,

    /// No transaction with this hash was ever submitted.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),
}

impl LedgerError {
    /// Whether the failed operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

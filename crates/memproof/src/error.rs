//! Error types for the memproof service.

use memproof_aggregate::AggregateError;
use memproof_core::{BatchId, CoreError, ProofError, ValidationError};
use memproof_ledger::LedgerError;
use memproof_store::StoreError;
use thiserror::Error;

/// Errors that can occur during service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected before any ledger interaction.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A supplied proof does not fold to its root.
    #[error("invalid proof: {0}")]
    Proof(#[from] ProofError),

    /// Malformed identifier or key.
    #[error("invalid input: {0}")]
    Input(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Ledger error that was not retried.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Aggregation error, including ordering anomalies.
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    /// A batch ended in `Failed`; its leaves are pending again.
    #[error("batch {batch_id} failed: {reason}")]
    CommitFailed { batch_id: BatchId, reason: String },

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

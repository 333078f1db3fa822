//! Error types for the aggregate module.

use thiserror::Error;

use memproof_core::EventKey;

/// Errors that can occur while ingesting and aggregating events.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] memproof_store::StoreError),

    /// Reading the event log failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] memproof_ledger::LedgerError),

    /// An event arrived at or below the high-water mark without having been
    /// applied. Fatal for the stream.
    #[error("event {key} arrived out of order (high-water mark {high_water})")]
    Ordering { key: EventKey, high_water: EventKey },

    /// The ingestor halted on an earlier ordering anomaly.
    #[error("ingestion halted at event {key}: {reason}")]
    Halted { key: EventKey, reason: String },
}

/// Result type for aggregate operations.
pub type Result<T> = std::result::Result<T, AggregateError>;

//! # memproof Aggregate
//!
//! Event-sourced statistics over the ledger event log.
//!
//! ## Overview
//!
//! The ledger emits an ordered log of events (memories stored, gas moved,
//! relayers authorized). This crate folds that log into per-user,
//! per-relayer and system-wide aggregates with exactly-once semantics:
//!
//! - [`plan`] computes the rows an event produces from a [`Snapshot`]
//! - the store writes those rows and the event key in one transaction
//! - the [`EventIngestor`] enforces log order with a high-water mark and a
//!   bounded dedup window, halting on anomalies instead of guessing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use memproof_aggregate::{EventIngestor, IngestorConfig, LedgerSource};
//! use memproof_ledger::MemoryLedger;
//! use memproof_store::MemoryStore;
//!
//! async fn example() {
//!     let ledger = Arc::new(MemoryLedger::default());
//!     let store = Arc::new(MemoryStore::new());
//!     let mut ingestor =
//!         EventIngestor::new(store, LedgerSource::new(ledger), IngestorConfig::default());
//!     ingestor.recover().await.unwrap();
//!     ingestor.catch_up().await.unwrap();
//! }
//! ```

pub mod aggregator;
pub mod error;
pub mod ingestor;

pub use aggregator::{plan, Aggregator, ApplyOutcome, Snapshot};
pub use error::{AggregateError, Result};
pub use ingestor::{
    EventIngestor, EventSource, IngestReport, IngestorConfig, IngestorStatus, LedgerSource,
};

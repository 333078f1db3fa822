//! # memproof Store
//!
//! Persistence for memproof. Two concerns live here:
//!
//! - the durable log of committed batches and their leaf order, which is
//!   required to regenerate proofs long after commit
//! - the materialized aggregates and the set of applied event keys that give
//!   the aggregator exactly-once semantics
//!
//! ## Key Types
//!
//! - [`BatchStore`] / [`AggregateStore`] - The async storage traits
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`AggregateTransition`] - Rows written atomically for one event
//!
//! ## Usage
//!
//! ```rust,no_run
//! use memproof_store::{AggregateStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("memproof.db").unwrap();
//!     let system = store.get_system().await.unwrap();
//!     println!("{} memories", system.total_memories);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting the same batch or applying the same
//!   event key twice returns `AlreadyExists`
//! - **Atomic transitions**: the applied key and every aggregate row an event
//!   touches are written in one transaction

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AggregateStore, AggregateTransition, BatchStore, InsertResult, Store};

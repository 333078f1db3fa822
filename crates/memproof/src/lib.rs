//! # memproof
//!
//! Verifiable memory commitments.
//!
//! ## Overview
//!
//! Memories are canonicalized and hashed into leaves. Leaves are committed
//! in batches: each batch's Merkle root is anchored on an append-only
//! ledger, and any leaf can later be proven to belong to a confirmed batch
//! with an inclusion proof that third parties check offline. A separate
//! path consumes the ledger's event log and folds it into per-user and
//! system-wide statistics with exactly-once semantics.
//!
//! - **Commit**: [`BatchCommitCoordinator`] drives batches through
//!   `Pending -> Submitting -> Confirmed | Failed` with bounded retry
//! - **Prove**: proofs are pure functions of the batch's ordered leaves
//! - **Aggregate**: the event ingestor applies each ledger event once, in
//!   `(block, log index)` order
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use memproof::api::StoreMemoriesRequest;
//! use memproof::{MemoryService, ServiceConfig};
//! use memproof::ledger::MemoryLedger;
//!
//! async fn example() {
//!     let config = ServiceConfig::from_env().unwrap();
//!     let ledger = Arc::new(MemoryLedger::default());
//!     let service = MemoryService::open(&config, ledger).unwrap();
//!
//!     let response = service
//!         .store_memories(StoreMemoriesRequest {
//!             memories: vec!["prefers window seats".into()],
//!             user_address: None,
//!         })
//!         .await
//!         .unwrap();
//!     println!("root {}", response.merkle_root);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `memproof::core` - Canonicalization, hashing, Merkle trees, proofs
//! - `memproof::store` - Batch log and aggregate storage
//! - `memproof::ledger` - Ledger boundary
//! - `memproof::aggregate` - Event ingestion and aggregation

pub mod api;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod service;

// Re-export component crates
pub use memproof_aggregate as aggregate;
pub use memproof_core as core;
pub use memproof_ledger as ledger;
pub use memproof_store as store;

// Re-export main types for convenience
pub use cache::TtlCache;
pub use config::{CacheConfig, CoordinatorConfig, IngestorConfig, RetryPolicy, ServiceConfig};
pub use coordinator::BatchCommitCoordinator;
pub use error::{Result, ServiceError};
pub use service::MemoryService;

// Re-export commonly used core types
pub use memproof_core::{
    canonicalize, hash_memory, verify_proof, Address, Batch, BatchStatus, ContentHash, Proof,
};

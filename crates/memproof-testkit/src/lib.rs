//! # memproof Testkit
//!
//! Testing utilities for memproof.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Canonical forms, leaf hashes and roots other
//!   implementations must reproduce
//! - **Generators**: Proptest strategies for leaves, indexes and event logs
//! - **Fixtures**: A relayer with an in-memory store and ledger, and a
//!   hand-built event log
//!
//! ## Golden Vectors
//!
//! ```rust
//! use memproof_testkit::vectors::verify_all_vectors;
//!
//! assert!(verify_all_vectors().is_empty());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use memproof_core::{generate_proof, verify_proof};
//! use memproof_testkit::generators::leaves_with_index;
//!
//! proptest! {
//!     #[test]
//!     fn proofs_verify((leaves, index) in leaves_with_index(64)) {
//!         prop_assert!(verify_proof(&generate_proof(&leaves, index).unwrap()));
//!     }
//! }
//! ```
//!
//! ## Event Logs
//!
//! ```rust
//! use memproof_testkit::fixtures::{user, EventLog};
//!
//! let mut log = EventLog::new();
//! log.deposit(user(1), 100);
//! log.next_block();
//! log.withdraw(user(1), 40);
//! assert_eq!(log.events().len(), 2);
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{random_memories, user, EventLog, TestFixture};
pub use generators::{event_log, leaves_with_index};
pub use vectors::{canonical_vectors, root_vectors, verify_all_vectors, vectors_json};

//! # memproof Ledger
//!
//! The boundary between memproof and the append-only ledger that anchors
//! batch roots.
//!
//! ## Overview
//!
//! A batch root is sent as a [`BatchSubmission`] signed by a relayer key.
//! The ledger accepts it, mines it, and emits events into an ordered log
//! that the aggregator consumes. Failures are split into transient ones
//! (retry with backoff) and permanent ones (the batch is marked failed).
//!
//! ## Key Types
//!
//! - [`Ledger`] - The async trait for submission, receipts and the event log
//! - [`MemoryLedger`] - Deterministic in-process ledger
//! - [`BatchSubmission`] - A signed request to anchor a root
//! - [`TransactionReceipt`] - Inclusion and gas of a mined transaction
//!
//! ## Usage
//!
//! ```rust,no_run
//! use memproof_core::{Address, ContentHash, Keypair};
//! use memproof_ledger::{BatchSubmission, Ledger, MemoryLedger};
//!
//! async fn example() {
//!     let ledger = MemoryLedger::default();
//!     let relayer = Keypair::generate();
//!     ledger
//!         .set_authorized(Address::from_public_key(&relayer.public_key()), true)
//!         .await;
//!
//!     let submission = BatchSubmission::sign(
//!         &relayer,
//!         ledger.config().contract,
//!         Address::from_bytes([1; 20]),
//!         ContentHash::hash(b"root"),
//!         1,
//!     );
//!     let tx = ledger.submit_batch(&submission).await.unwrap();
//!     let receipt = ledger.transaction_receipt(&tx).await.unwrap();
//!     assert!(receipt.is_some());
//! }
//! ```

pub mod error;
pub mod ledger;
pub mod submission;

pub use error::{LedgerError, Result};
pub use ledger::{
    memory::{MemoryLedger, MemoryLedgerConfig},
    Ledger,
};
pub use submission::{BatchSubmission, TransactionReceipt};

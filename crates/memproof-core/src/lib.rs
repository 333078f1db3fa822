//! # memproof Core
//!
//! Pure primitives for memproof: canonical memory text, content hashes,
//! Merkle trees, inclusion proofs and the shared data model.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! deterministic computation that third parties can rerun offline.
//!
//! ## Key Types
//!
//! - [`ContentHash`] - 32-byte SHA-256 digest (leaf hashes, node hashes, roots)
//! - [`MemoryLeaf`] - A captured memory and its content hash
//! - [`MerkleTree`] - Binary hash tree with last-node promotion on odd levels
//! - [`Proof`] - Sibling path from a leaf to a root
//! - [`Batch`] - A set of leaves committed to the ledger as one root
//! - [`LedgerEvent`] - An ordered fact emitted by the ledger
//!
//! ## Canonicalization
//!
//! Memory text is normalized before hashing. See [`canonical`] module.

pub mod aggregate;
pub mod batch;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod event;
pub mod leaf;
pub mod merkle;
pub mod proof;
pub mod types;

pub use aggregate::{RelayerAggregate, SystemAggregate, UserAggregate};
pub use batch::{Batch, BatchStatus};
pub use canonical::{canonicalize, hash_memory, CANONICALIZATION_VERSION};
pub use crypto::{ContentHash, Keypair, PublicKey, Signature};
pub use error::{CoreError, ProofError, ValidationError};
pub use event::{EventKey, LedgerEvent, LedgerEventKind};
pub use leaf::MemoryLeaf;
pub use merkle::{build_tree, compute_root, MerkleTree};
pub use proof::{
    check_proof, check_proof_at, expected_sides, generate_proof, verify_proof, verify_proof_at,
    Proof, ProofStep, Side, MAX_PROOF_DEPTH,
};
pub use types::{Address, BatchId, TxHash};

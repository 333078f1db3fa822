//! Error types for memproof core.

use thiserror::Error;

use crate::batch::BatchStatus;

/// Errors raised while decoding identifiers and keys.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Input rejected before any ledger interaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cannot build a tree from zero leaves")]
    EmptyTree,

    #[error("no memories supplied")]
    NoMemories,

    #[error("memory at index {0} is empty after canonicalization")]
    EmptyMemory(usize),

    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },

    #[error("memory not found among the supplied memories")]
    MemoryNotInSet,

    #[error("batch cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: BatchStatus, to: BatchStatus },

    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Reasons a proof does not fold to its claimed root.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("proof path of {0} steps exceeds the maximum tree depth")]
    PathTooLong(usize),

    #[error("proof shape does not match leaf {index} of {leaf_count}")]
    ShapeMismatch { index: usize, leaf_count: usize },

    #[error("proof folds to {computed}, expected {expected}")]
    RootMismatch { expected: String, computed: String },
}

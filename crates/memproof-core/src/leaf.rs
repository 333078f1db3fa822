//! MemoryLeaf: a captured memory and its content hash.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize, hash_canonical};
use crate::crypto::ContentHash;
use crate::types::BatchId;

/// A single memory, canonicalized and hashed.
///
/// Immutable once hashed: `hash == H(canonical_text)`. The batch assignment
/// is recorded once the coordinator places the leaf into a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLeaf {
    /// The text as captured.
    pub raw_text: String,

    /// The canonical form the hash is computed over.
    pub canonical_text: String,

    /// SHA-256 of `canonical_text`.
    pub hash: ContentHash,

    /// The batch this leaf was committed in, if any.
    pub batch_id: Option<BatchId>,

    /// Position of this leaf within its batch.
    pub position: Option<u32>,
}

impl MemoryLeaf {
    /// Canonicalize and hash raw memory text.
    pub fn new(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let canonical_text = canonicalize(&raw_text);
        let hash = hash_canonical(&canonical_text);
        Self {
            raw_text,
            canonical_text,
            hash,
            batch_id: None,
            position: None,
        }
    }

    /// Whether the canonical form is empty.
    pub fn is_empty(&self) -> bool {
        self.canonical_text.is_empty()
    }

    /// Record the leaf's placement in a batch.
    pub fn assign(&mut self, batch_id: BatchId, position: u32) {
        self.batch_id = Some(batch_id);
        self.position = Some(position);
    }

    /// Clear the batch placement so the leaf can be re-batched.
    pub fn unassign(&mut self) {
        self.batch_id = None;
        self.position = None;
    }
}

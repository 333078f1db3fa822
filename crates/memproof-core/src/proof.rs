//! Inclusion proofs.
//!
//! A proof is the sibling path from one leaf up to the root. Each step
//! records the sibling hash and which side the sibling sits on. Levels where
//! the node on the path was promoted unchanged contribute no step.
//!
//! Verification needs only `(leaf_hash, siblings, root_hash)` and is fully
//! offline.

use serde::{Deserialize, Serialize};

use crate::crypto::ContentHash;
use crate::error::{ProofError, ValidationError};
use crate::merkle::parent_level;

/// Upper bound on the number of steps in any proof.
///
/// A tree of depth 64 already covers 2^64 leaves.
pub const MAX_PROOF_DEPTH: usize = 64;

/// Which side of the running hash a sibling is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is the left child: `parent = H(sibling || current)`.
    Left,
    /// Sibling is the right child: `parent = H(current || sibling)`.
    Right,
}

/// One step of a sibling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: ContentHash,
    pub side: Side,
}

impl ProofStep {
    /// Fold this step into the running hash.
    pub fn apply(&self, current: &ContentHash) -> ContentHash {
        match self.side {
            Side::Left => ContentHash::combine(&self.hash, current),
            Side::Right => ContentHash::combine(current, &self.hash),
        }
    }
}

/// An inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub leaf_hash: ContentHash,
    pub siblings: Vec<ProofStep>,
    pub root_hash: ContentHash,
}

impl Proof {
    /// Assemble a proof from parallel hash and side lists.
    pub fn from_parts(
        leaf_hash: ContentHash,
        hashes: &[ContentHash],
        sides: &[Side],
        root_hash: ContentHash,
    ) -> Result<Self, ValidationError> {
        if hashes.len() != sides.len() {
            return Err(ValidationError::Malformed(format!(
                "{} sibling hashes but {} sides",
                hashes.len(),
                sides.len()
            )));
        }
        let siblings = hashes
            .iter()
            .zip(sides)
            .map(|(hash, side)| ProofStep {
                hash: *hash,
                side: *side,
            })
            .collect();
        Ok(Self {
            leaf_hash,
            siblings,
            root_hash,
        })
    }

    /// The sibling hashes in path order.
    pub fn hashes(&self) -> Vec<ContentHash> {
        self.siblings.iter().map(|s| s.hash).collect()
    }

    /// The sibling sides in path order.
    pub fn sides(&self) -> Vec<Side> {
        self.siblings.iter().map(|s| s.side).collect()
    }

    /// Fold the leaf through every step and return the resulting hash.
    pub fn fold(&self) -> ContentHash {
        self.siblings
            .iter()
            .fold(self.leaf_hash, |current, step| step.apply(&current))
    }
}

/// Generate the proof for `leaf_hashes[index]`.
pub fn generate_proof(leaf_hashes: &[ContentHash], index: usize) -> Result<Proof, ValidationError> {
    if leaf_hashes.is_empty() {
        return Err(ValidationError::EmptyTree);
    }
    if index >= leaf_hashes.len() {
        return Err(ValidationError::IndexOutOfRange {
            index,
            leaf_count: leaf_hashes.len(),
        });
    }

    let mut siblings = Vec::new();
    let mut level = leaf_hashes.to_vec();
    let mut idx = index;

    while level.len() > 1 {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            let side = if idx % 2 == 0 { Side::Right } else { Side::Left };
            siblings.push(ProofStep {
                hash: level[sibling],
                side,
            });
        }
        level = parent_level(&level);
        idx /= 2;
    }

    Ok(Proof {
        leaf_hash: leaf_hashes[index],
        siblings,
        root_hash: level[0],
    })
}

/// The sides a valid proof for leaf `index` of `leaf_count` must carry.
///
/// Returns `None` when the index is outside the tree.
pub fn expected_sides(index: usize, leaf_count: usize) -> Option<Vec<Side>> {
    if index >= leaf_count {
        return None;
    }
    let mut sides = Vec::new();
    let mut width = leaf_count;
    let mut idx = index;
    while width > 1 {
        if idx ^ 1 < width {
            sides.push(if idx % 2 == 0 { Side::Right } else { Side::Left });
        }
        width = width.div_ceil(2);
        idx /= 2;
    }
    Some(sides)
}

/// Verify a proof, reporting why it fails.
pub fn check_proof(proof: &Proof) -> Result<(), ProofError> {
    if proof.siblings.len() > MAX_PROOF_DEPTH {
        return Err(ProofError::PathTooLong(proof.siblings.len()));
    }
    let computed = proof.fold();
    if computed != proof.root_hash {
        return Err(ProofError::RootMismatch {
            expected: proof.root_hash.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

/// Verify a proof against a known tree position.
///
/// Besides folding to the root, the path must have exactly the steps and
/// sides the tree shape dictates for `index` among `leaf_count` leaves.
pub fn check_proof_at(proof: &Proof, index: usize, leaf_count: usize) -> Result<(), ProofError> {
    let shape_ok = expected_sides(index, leaf_count)
        .map(|sides| sides == proof.sides())
        .unwrap_or(false);
    if !shape_ok {
        return Err(ProofError::ShapeMismatch { index, leaf_count });
    }
    check_proof(proof)
}

/// Returns true iff the proof folds to its root.
pub fn verify_proof(proof: &Proof) -> bool {
    check_proof(proof).is_ok()
}

/// Returns true iff the proof folds to its root and matches the tree shape.
pub fn verify_proof_at(proof: &Proof, index: usize, leaf_count: usize) -> bool {
    check_proof_at(proof, index, leaf_count).is_ok()
}

//! Merkle tree construction over ordered leaf hashes.
//!
//! Level 0 is the leaf list. Each level pairs adjacent nodes left to right
//! and hashes `left || right` into the parent. When a level has an odd
//! number of nodes the last node is promoted unchanged (never duplicated).
//! The proof engine walks the same shape, so the policy must stay in sync
//! with [`crate::proof`].

use crate::crypto::ContentHash;
use crate::error::ValidationError;

/// A fully materialized Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// `levels[0]` holds the leaves; the last level holds only the root.
    levels: Vec<Vec<ContentHash>>,
}

impl MerkleTree {
    /// The root hash.
    pub fn root(&self) -> ContentHash {
        // build_tree guarantees a non-empty top level
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(ContentHash::ZERO)
    }

    /// All levels, leaves first.
    pub fn levels(&self) -> &[Vec<ContentHash>] {
        &self.levels
    }

    /// The ordered leaf hashes.
    pub fn leaves(&self) -> &[ContentHash] {
        &self.levels[0]
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Number of pairing rounds between the leaves and the root.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }
}

/// Compute the next level up from `level`.
pub(crate) fn parent_level(level: &[ContentHash]) -> Vec<ContentHash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => ContentHash::combine(left, right),
            // odd node out: promoted as-is
            [lone] => *lone,
            _ => ContentHash::ZERO,
        })
        .collect()
}

/// Build a tree over `leaf_hashes` in the given order.
///
/// A single leaf is its own root. An empty list is rejected.
pub fn build_tree(leaf_hashes: &[ContentHash]) -> Result<MerkleTree, ValidationError> {
    if leaf_hashes.is_empty() {
        return Err(ValidationError::EmptyTree);
    }

    let mut levels = vec![leaf_hashes.to_vec()];
    while let Some(top) = levels.last() {
        if top.len() <= 1 {
            break;
        }
        let next = parent_level(top);
        levels.push(next);
    }

    Ok(MerkleTree { levels })
}

/// Compute only the root, without keeping intermediate levels.
pub fn compute_root(leaf_hashes: &[ContentHash]) -> Result<ContentHash, ValidationError> {
    if leaf_hashes.is_empty() {
        return Err(ValidationError::EmptyTree);
    }
    let mut level = leaf_hashes.to_vec();
    while level.len() > 1 {
        level = parent_level(&level);
    }
    Ok(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn h(label: &str) -> ContentHash {
        ContentHash::hash(label.as_bytes())
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(build_tree(&[]), Err(ValidationError::EmptyTree));
        assert_eq!(compute_root(&[]), Err(ValidationError::EmptyTree));
    }

    #[test]
    fn test_single_leaf_is_root() {
        let tree = build_tree(&[h("a")]).unwrap();
        assert_eq!(tree.root(), h("a"));
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_two_leaves() {
        let tree = build_tree(&[h("a"), h("b")]).unwrap();
        assert_eq!(tree.root(), ContentHash::combine(&h("a"), &h("b")));
    }

    #[test]
    fn test_three_leaves_promotes_last() {
        let (h1, h2, h3) = (h("1"), h("2"), h("3"));
        let tree = build_tree(&[h1, h2, h3]).unwrap();

        let p = ContentHash::combine(&h1, &h2);
        assert_eq!(tree.levels()[1], vec![p, h3]);
        assert_eq!(tree.root(), ContentHash::combine(&p, &h3));
    }

    #[test]
    fn test_five_leaves_promotes_twice() {
        let leaves: Vec<_> = (1..=5).map(|i| h(&i.to_string())).collect();
        let tree = build_tree(&leaves).unwrap();

        let p12 = ContentHash::combine(&leaves[0], &leaves[1]);
        let p34 = ContentHash::combine(&leaves[2], &leaves[3]);
        let p1234 = ContentHash::combine(&p12, &p34);

        assert_eq!(tree.levels()[1], vec![p12, p34, leaves[4]]);
        assert_eq!(tree.levels()[2], vec![p1234, leaves[4]]);
        assert_eq!(tree.root(), ContentHash::combine(&p1234, &leaves[4]));
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_order_matters() {
        let root_ab = build_tree(&[h("a"), h("b")]).unwrap().root();
        let root_ba = build_tree(&[h("b"), h("a")]).unwrap().root();
        assert_ne!(root_ab, root_ba);
    }

    proptest! {
        #[test]
        fn prop_root_depends_only_on_hashes(seeds in prop::collection::vec(any::<[u8; 32]>(), 1..40)) {
            let leaves: Vec<ContentHash> = seeds.iter().copied().map(ContentHash::from_bytes).collect();
            let tree = build_tree(&leaves).unwrap();
            prop_assert_eq!(tree.root(), build_tree(&leaves.clone()).unwrap().root());
            prop_assert_eq!(tree.root(), compute_root(&leaves).unwrap());
            prop_assert_eq!(tree.leaf_count(), leaves.len());
        }
    }
}

//! Golden test vectors for deterministic verification.
//!
//! Any implementation that canonicalizes, hashes and builds trees the same
//! way must reproduce these digests exactly. They can be exported as JSON
//! with [`vectors_json`].

use serde::Serialize;

use memproof_core::{canonicalize, compute_root, hash_memory, ContentHash};

/// Raw text, its canonical form, and the leaf hash.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalVector {
    pub name: &'static str,
    pub input: &'static str,
    pub canonical: &'static str,
    /// SHA-256 of `canonical`, hex.
    pub leaf_hash: &'static str,
}

/// An ordered memory list and the root of its tree.
#[derive(Debug, Clone, Serialize)]
pub struct RootVector {
    pub name: &'static str,
    pub memories: &'static [&'static str],
    /// Expected root, hex.
    pub root: &'static str,
}

pub fn canonical_vectors() -> Vec<CanonicalVector> {
    vec![
        CanonicalVector {
            name: "ascii_case",
            input: "Hello World",
            canonical: "hello world",
            leaf_hash: "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        },
        CanonicalVector {
            name: "whitespace_runs",
            input: "  Hello   World  ",
            canonical: "hello world",
            leaf_hash: "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
        },
        CanonicalVector {
            name: "fullwidth_compatibility",
            input: "ＦＵＬＬＷＩＤＴＨ",
            canonical: "fullwidth",
            leaf_hash: "39ecd459f143d7522ebfbb82080d3cc071c2fb5cf88763738cbc74f9f541142b",
        },
        CanonicalVector {
            name: "mixed_whitespace_and_accents",
            input: "Ｃａｆé\tAU\nLait",
            canonical: "café au lait",
            leaf_hash: "7c413039fbb2248e2b18b98e7a8d4d85bdcac7cd79b9477a0923f97e3a1f2b50",
        },
        CanonicalVector {
            name: "empty",
            input: "",
            canonical: "",
            leaf_hash: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        },
    ]
}

pub fn root_vectors() -> Vec<RootVector> {
    vec![
        RootVector {
            name: "single_leaf_is_root",
            memories: &["alpha"],
            root: "8ed3f6ad685b959ead7022518e1af76cd816f8e8ec7ccdda1ed4018e8f2223f8",
        },
        RootVector {
            name: "pair",
            memories: &["alpha", "beta"],
            root: "8450e9a90d144185def662fffc477da5e0325d80be5de388ec20d9c58d6c72d0",
        },
        RootVector {
            name: "odd_three_promotes_last",
            memories: &["alpha", "beta", "gamma"],
            root: "c090e94bc3a99676b532c602c1e5c68d53266dbf246e295a6b9b6a547da51fa2",
        },
        RootVector {
            name: "five",
            memories: &["alpha", "beta", "gamma", "delta", "epsilon"],
            root: "cbd797c766cb0d8e60b112e6249e142b7a0adba885032773d98e704453ddd811",
        },
        RootVector {
            name: "seven",
            memories: &["one", "two", "three", "four", "five", "six", "seven"],
            root: "cb0f3071115e995e035af2aba9e2f5912b8ef78b4191b3dc31c22bce5a3c1093",
        },
    ]
}

/// Leaf hashes of a root vector's memories, in order.
pub fn leaves_of(vector: &RootVector) -> Vec<ContentHash> {
    vector.memories.iter().map(|m| hash_memory(m)).collect()
}

/// Check every vector against this implementation.
///
/// Returns the names of the vectors that do not match.
pub fn verify_all_vectors() -> Vec<&'static str> {
    let mut failures = Vec::new();
    for v in canonical_vectors() {
        if canonicalize(v.input) != v.canonical || hash_memory(v.input).to_hex() != v.leaf_hash {
            failures.push(v.name);
        }
    }
    for v in root_vectors() {
        match compute_root(&leaves_of(&v)) {
            Ok(root) if root.to_hex() == v.root => {}
            _ => failures.push(v.name),
        }
    }
    failures
}

/// Both vector sets as pretty-printed JSON.
pub fn vectors_json() -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct All {
        canonical: Vec<CanonicalVector>,
        roots: Vec<RootVector>,
    }
    serde_json::to_string_pretty(&All {
        canonical: canonical_vectors(),
        roots: root_vectors(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        assert_eq!(verify_all_vectors(), Vec::<&str>::new());
    }

    #[test]
    fn test_vectors_export() {
        let json = vectors_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["roots"].as_array().unwrap().len(), root_vectors().len());
        assert_eq!(parsed["canonical"][0]["canonical"], "hello world");
    }
}

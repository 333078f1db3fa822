//! Canonical memory text.
//!
//! Every memory is reduced to one canonical string before hashing:
//!
//! 1. Unicode NFKC normalization
//! 2. Unicode default case folding (locale independent, so `ß` and `ss`
//!    agree), then NFKC again so that fold expansions are themselves
//!    normalized
//! 3. Trimming leading/trailing whitespace
//! 4. Collapsing internal whitespace runs to a single ASCII space
//!
//! Changing any of these steps changes every previously issued hash. Bump
//! [`CANONICALIZATION_VERSION`] if the pipeline is ever altered.

use unicode_normalization::UnicodeNormalization;

use crate::crypto::ContentHash;

/// Version of the canonicalization pipeline.
pub const CANONICALIZATION_VERSION: u32 = 1;

/// Reduce raw memory text to its canonical form.
///
/// Pure and total: empty or whitespace-only input yields `""`.
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfkc().collect();
    let folded: String = caseless::default_case_fold_str(&normalized).nfkc().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize optional input; absent text yields `""`.
pub fn canonicalize_opt(text: Option<&str>) -> String {
    text.map(canonicalize).unwrap_or_default()
}

/// Hash canonical text into its content hash (leaf identifier).
///
/// The input is expected to be canonical already; `hash_canonical("")` is
/// the SHA-256 of the empty string.
pub fn hash_canonical(canonical_text: &str) -> ContentHash {
    ContentHash::hash(canonical_text.as_bytes())
}

/// Canonicalize raw text and hash it in one step.
pub fn hash_memory(raw_text: &str) -> ContentHash {
    hash_canonical(&canonicalize(raw_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trim_and_collapse() {
        assert_eq!(canonicalize("  Hello   World \n"), "hello world");
        assert_eq!(canonicalize("a\t\tb\r\nc"), "a b c");
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize(" \t\n "), "");
        assert_eq!(canonicalize_opt(None), "");
    }

    #[test]
    fn test_unicode_normalization() {
        // Precomposed vs decomposed e-acute
        assert_eq!(canonicalize("caf\u{00e9}"), canonicalize("cafe\u{0301}"));
        // Full-width letters fold to ASCII under NFKC
        assert_eq!(canonicalize("\u{ff21}\u{ff22}\u{ff23}"), "abc");
        // Non-breaking space counts as whitespace
        assert_eq!(canonicalize("a\u{00a0}b"), "a b");
    }

    #[test]
    fn test_case_folding() {
        assert_eq!(canonicalize("MiXeD CaSe"), "mixed case");
        assert_eq!(hash_memory("ABC"), hash_memory("  abc  "));
        // Full case folding, not just lowercasing
        assert_eq!(canonicalize("Stra\u{00df}e"), canonicalize("STRASSE"));
        // Final sigma folds to sigma
        assert_eq!(canonicalize("\u{03a3}o\u{03c2}"), canonicalize("\u{03c3}o\u{03c3}"));
    }

    #[test]
    fn test_hash_memory_known_value() {
        // canonical "abc" -> SHA-256("abc")
        assert_eq!(
            hash_memory(" ABC ").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_memory(""), hash_canonical(""));
    }

    proptest! {
        #[test]
        fn prop_canonicalize_idempotent(text in "[a-zA-Z0-9 \t\n\u{00c0}-\u{00ff}]{0,64}") {
            let once = canonicalize(&text);
            prop_assert_eq!(canonicalize(&once), once.clone());
        }

        #[test]
        fn prop_hash_deterministic(text in "\\PC{0,64}") {
            prop_assert_eq!(hash_memory(&text), hash_memory(&text));
        }

        #[test]
        fn prop_no_edge_or_double_spaces(text in "[ a-zA-Z\t\n]{0,64}") {
            let c = canonicalize(&text);
            prop_assert!(!c.starts_with(' '));
            prop_assert!(!c.ends_with(' '));
            prop_assert!(!c.contains("  "));
        }
    }
}

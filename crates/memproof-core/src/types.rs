//! Strong type definitions for memproof.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{ContentHash, PublicKey};
use crate::error::CoreError;

/// Decode a fixed-size hex string, accepting an optional `0x` prefix.
pub fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], CoreError> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits)?;
    if bytes.len() != N {
        return Err(CoreError::InvalidLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

/// A 20-byte ledger account address (users, relayers, contracts).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Derive the ledger address controlled by a signing key.
    ///
    /// Address = first 20 bytes of Blake3("memproof-address-v0:" || public_key).
    pub fn from_public_key(key: &PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"memproof-address-v0:");
        hasher.update(&key.0);
        let digest = hasher.finalize();
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&digest.as_bytes()[..20]);
        Self(arr)
    }

    /// Convert to lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_fixed::<20>(s).map(Self)
    }

    /// The zero address.
    pub const ZERO: Self = Self([0u8; 20]);
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// A 32-byte ledger transaction reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// A 32-byte batch identifier.
///
/// Derived from Blake3(user || created_at || salt || leaf hashes). The salt
/// is drawn per batch, so two batches over the same leaves in the same
/// millisecond still get distinct ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub [u8; 32]);

impl BatchId {
    /// Derive a batch id from its owner, creation time, salt and ordered leaves.
    pub fn derive(user: &Address, created_at: i64, salt: &[u8; 16], leaves: &[ContentHash]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"memproof-batch-v1:");
        hasher.update(&user.0);
        hasher.update(&created_at.to_be_bytes());
        hasher.update(salt);
        for leaf in leaves {
            hasher.update(leaf.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

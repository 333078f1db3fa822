//! Cryptographic primitives for memproof.
//!
//! Wraps SHA-256 content hashing and Ed25519 submission signing with strong
//! types. SHA-256 is used for every leaf and tree node so that roots can be
//! recomputed by any ledger contract or third-party verifier.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::decode_fixed;

/// A 32-byte SHA-256 digest.
///
/// Used for leaf hashes, interior node hashes and Merkle roots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Compute the SHA-256 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash two child nodes into their parent: `H(left || right)`.
    pub fn combine(left: &ContentHash, right: &ContentHash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Self(hasher.finalize().into())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_fixed::<32>(s).map(Self)
    }

    /// The zero hash (sentinel value).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig = DalekSignature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// The signing credential used to submit batches.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create from a hex-encoded 32-byte seed.
    pub fn from_hex_seed(s: &str) -> Result<Self, CoreError> {
        decode_fixed::<32>(s).map(|seed| Self::from_seed(&seed))
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vectors() {
        assert_eq!(
            ContentHash::hash(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            ContentHash::hash(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_combine_is_hash_of_concatenation() {
        let left = ContentHash::hash(b"left");
        let right = ContentHash::hash(b"right");

        let mut concat = Vec::new();
        concat.extend_from_slice(left.as_bytes());
        concat.extend_from_slice(right.as_bytes());

        assert_eq!(ContentHash::combine(&left, &right), ContentHash::hash(&concat));
        assert_ne!(
            ContentHash::combine(&left, &right),
            ContentHash::combine(&right, &left)
        );
    }

    #[test]
    fn test_hash_hex_roundtrip_with_prefix() {
        let h = ContentHash::hash(b"memory");
        let shown = h.to_string();
        assert!(shown.starts_with("0x"));
        assert_eq!(ContentHash::from_hex(&shown).unwrap(), h);
        assert_eq!(ContentHash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn test_hash_from_hex_wrong_length() {
        assert!(matches!(
            ContentHash::from_hex("0xabcd"),
            Err(CoreError::InvalidLength { expected: 32, got: 2 })
        ));
    }

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let signature = keypair.sign(b"root");

        keypair
            .public_key()
            .verify(b"root", &signature)
            .expect("valid signature should verify");
        assert!(keypair.public_key().verify(b"r00t", &signature).is_err());
    }

    #[test]
    fn test_keypair_from_hex_seed() {
        let kp1 = Keypair::from_seed(&[0x07; 32]);
        let kp2 = Keypair::from_hex_seed(&format!("0x{}", hex::encode([0x07u8; 32]))).unwrap();
        assert_eq!(kp1.public_key(), kp2.public_key());
    }
}

//! Request and response bodies of the service operations.
//!
//! Field names are camelCase on the wire. Hashes, roots, addresses and
//! transaction hashes are `0x`-prefixed lowercase hex.

use serde::{Deserialize, Serialize};

use memproof_core::{Batch, ContentHash, Proof, Side};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemoriesRequest {
    /// Raw memory texts, committed in this order.
    pub memories: Vec<String>,
    /// Owner of the memories; the relayer address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMemoriesResponse {
    pub tx_hash: String,
    pub merkle_root: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub memory_count: usize,
    pub user_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatusResponse {
    pub hash: String,
    /// True only when the hash is a leaf of a confirmed batch.
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemoryCountResponse {
    pub user_address: String,
    pub memory_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadataResponse {
    pub merkle_root: String,
    pub user: String,
    /// Confirmation time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub hash_count: usize,
}

impl BatchMetadataResponse {
    pub(crate) fn from_batch(batch: &Batch) -> Self {
        Self {
            merkle_root: batch.root_hash.to_string(),
            user: batch.user.to_string(),
            timestamp: batch.confirmed_at.unwrap_or(batch.created_at),
            hash_count: batch.leaf_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofRequest {
    /// The memory to prove.
    pub memory: String,
    /// Every memory of the batch, in commit order.
    pub all_memories: Vec<String>,
}

/// An inclusion proof in wire form.
///
/// Self-contained: `memproof-verify` checks it with no other input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofResponse {
    /// Sibling hashes from the leaf up.
    pub proof: Vec<String>,
    /// Side of each sibling, parallel to `proof`.
    pub sides: Vec<Side>,
    pub root: String,
    pub hash: String,
}

impl GenerateProofResponse {
    /// Decode back into a [`Proof`].
    pub fn to_proof(&self) -> Result<Proof> {
        let leaf = ContentHash::from_hex(&self.hash)?;
        let root = ContentHash::from_hex(&self.root)?;
        let siblings = self
            .proof
            .iter()
            .map(|h| ContentHash::from_hex(h))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Proof::from_parts(leaf, &siblings, &self.sides, root)?)
    }
}

impl From<&Proof> for GenerateProofResponse {
    fn from(proof: &Proof) -> Self {
        Self {
            proof: proof.hashes().iter().map(ToString::to_string).collect(),
            sides: proof.sides(),
            root: proof.root_hash.to_string(),
            hash: proof.leaf_hash.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use memproof_core::{generate_proof, hash_memory, verify_proof};

    #[test]
    fn test_request_field_names() {
        let req: StoreMemoriesRequest =
            serde_json::from_str(r#"{"memories":["a","b"],"userAddress":"0x01"}"#).unwrap();
        assert_eq!(req.memories, vec!["a", "b"]);
        assert_eq!(req.user_address.as_deref(), Some("0x01"));

        let req: StoreMemoriesRequest = serde_json::from_str(r#"{"memories":[]}"#).unwrap();
        assert!(req.user_address.is_none());

        let req: GenerateProofRequest =
            serde_json::from_str(r#"{"memory":"a","allMemories":["a","b"]}"#).unwrap();
        assert_eq!(req.all_memories.len(), 2);
    }

    #[test]
    fn test_response_field_names() {
        let json = serde_json::to_value(MemoryStatusResponse {
            hash: "0xab".into(),
            is_verified: true,
        })
        .unwrap();
        assert_eq!(json["isVerified"], true);

        let json = serde_json::to_value(StoreMemoriesResponse {
            tx_hash: "0x1".into(),
            merkle_root: "0x2".into(),
            block_number: 7,
            gas_used: 21_000,
            memory_count: 2,
            user_address: "0x3".into(),
        })
        .unwrap();
        for field in ["txHash", "merkleRoot", "blockNumber", "gasUsed", "memoryCount", "userAddress"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_proof_wire_form_roundtrip() {
        let leaves: Vec<_> = ["a", "b", "c"].iter().map(|m| hash_memory(m)).collect();
        let proof = generate_proof(&leaves, 2).unwrap();

        let wire = GenerateProofResponse::from(&proof);
        assert!(wire.hash.starts_with("0x"));
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains(r#""sides":["left"]"#));

        let back: GenerateProofResponse = serde_json::from_str(&json).unwrap();
        let decoded = back.to_proof().unwrap();
        assert_eq!(decoded, proof);
        assert!(verify_proof(&decoded));
    }

    #[test]
    fn test_mismatched_sides_rejected() {
        let leaves: Vec<_> = ["a", "b"].iter().map(|m| hash_memory(m)).collect();
        let mut wire = GenerateProofResponse::from(&generate_proof(&leaves, 0).unwrap());
        wire.sides.clear();
        assert!(wire.to_proof().is_err());
    }
}

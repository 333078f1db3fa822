//! Batch: a set of leaves committed to the ledger under one root.

use serde::{Deserialize, Serialize};

use crate::crypto::ContentHash;
use crate::error::ValidationError;
use crate::merkle::compute_root;
use crate::proof::{generate_proof, Proof};
use crate::types::{Address, BatchId, TxHash};

/// Lifecycle of a batch.
///
/// ```text
/// Pending -> Submitting -> Confirmed
///                 |
///                 v
///              Failed -> Submitting (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Leaves selected, root computed, nothing sent yet.
    Pending,
    /// Ledger transaction issued, waiting for inclusion.
    Submitting,
    /// Transaction mined and observed.
    Confirmed,
    /// Rejected, or timed out after bounded retries.
    Failed,
}

impl BatchStatus {
    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: BatchStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Submitting)
                | (Self::Submitting, Self::Confirmed)
                | (Self::Submitting, Self::Failed)
                | (Self::Failed, Self::Submitting)
        )
    }

    /// Terminal unless retried.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitting => "submitting",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitting" => Some(Self::Submitting),
            "confirmed" => Some(Self::Confirmed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A batch of leaves and its ledger bookkeeping.
///
/// `root_hash` is a pure function of `leaf_hashes`; the order is fixed at
/// creation and must be kept to regenerate proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub user: Address,
    pub leaf_hashes: Vec<ContentHash>,
    pub root_hash: ContentHash,
    pub status: BatchStatus,
    pub ledger_tx_ref: Option<TxHash>,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    /// Submission attempts made so far, across retries.
    pub attempts: u32,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl Batch {
    /// Form a pending batch over `leaf_hashes` in the given order.
    pub fn new(
        user: Address,
        leaf_hashes: Vec<ContentHash>,
        created_at: i64,
    ) -> Result<Self, ValidationError> {
        let root_hash = compute_root(&leaf_hashes)?;
        let salt: [u8; 16] = rand::random();
        let batch_id = BatchId::derive(&user, created_at, &salt, &leaf_hashes);
        Ok(Self {
            batch_id,
            user,
            leaf_hashes,
            root_hash,
            status: BatchStatus::Pending,
            ledger_tx_ref: None,
            gas_used: None,
            block_number: None,
            attempts: 0,
            created_at,
            confirmed_at: None,
            last_error: None,
        })
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_hashes.len()
    }

    /// Position of the first leaf with this hash.
    pub fn position_of(&self, hash: &ContentHash) -> Option<usize> {
        self.leaf_hashes.iter().position(|h| h == hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.position_of(hash).is_some()
    }

    /// Regenerate the inclusion proof for a leaf of this batch.
    pub fn proof_for(&self, hash: &ContentHash) -> Result<Proof, ValidationError> {
        let index = self
            .position_of(hash)
            .ok_or(ValidationError::MemoryNotInSet)?;
        generate_proof(&self.leaf_hashes, index)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BatchStatus::Confirmed
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn transition(&mut self, to: BatchStatus) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(to) {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Enter `Submitting` (first attempt or retry after failure).
    pub fn begin_submission(&mut self) -> Result<(), ValidationError> {
        self.transition(BatchStatus::Submitting)?;
        self.last_error = None;
        Ok(())
    }

    /// Record the ledger receipt and confirm.
    pub fn confirm(
        &mut self,
        tx: TxHash,
        gas_used: u64,
        block_number: u64,
        confirmed_at: i64,
    ) -> Result<(), ValidationError> {
        self.transition(BatchStatus::Confirmed)?;
        self.ledger_tx_ref = Some(tx);
        self.gas_used = Some(gas_used);
        self.block_number = Some(block_number);
        self.confirmed_at = Some(confirmed_at);
        self.last_error = None;
        Ok(())
    }

    /// Mark failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ValidationError> {
        self.transition(BatchStatus::Failed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::verify_proof;

    fn sample() -> Batch {
        let leaves = vec![
            ContentHash::hash(b"a"),
            ContentHash::hash(b"b"),
            ContentHash::hash(b"c"),
        ];
        Batch::new(Address::from_bytes([1; 20]), leaves, 1_700_000_000_000).unwrap()
    }

    #[test]
    fn test_new_batch_is_pending() {
        let batch = sample();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.leaf_count(), 3);
        assert_eq!(batch.attempts, 0);
        assert!(batch.ledger_tx_ref.is_none());
    }

    #[test]
    fn test_same_leaves_same_instant_get_distinct_ids() {
        assert_ne!(sample().batch_id, sample().batch_id);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let err = Batch::new(Address::ZERO, vec![], 0).unwrap_err();
        assert_eq!(err, ValidationError::EmptyTree);
    }

    #[test]
    fn test_happy_path() {
        let mut batch = sample();
        batch.begin_submission().unwrap();
        batch
            .confirm(TxHash::from_bytes([7; 32]), 21_000, 12, 1_700_000_000_500)
            .unwrap();
        assert!(batch.is_confirmed());
        assert_eq!(batch.gas_used, Some(21_000));
    }

    #[test]
    fn test_retry_after_failure() {
        let mut batch = sample();
        batch.begin_submission().unwrap();
        batch.fail("timeout").unwrap();
        assert_eq!(batch.last_error.as_deref(), Some("timeout"));

        batch.begin_submission().unwrap();
        assert_eq!(batch.status, BatchStatus::Submitting);
        assert!(batch.last_error.is_none());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut batch = sample();
        assert_eq!(
            batch.transition(BatchStatus::Confirmed),
            Err(ValidationError::InvalidTransition {
                from: BatchStatus::Pending,
                to: BatchStatus::Confirmed
            })
        );
        batch.begin_submission().unwrap();
        batch.confirm(TxHash::from_bytes([0; 32]), 1, 1, 1).unwrap();
        assert!(batch.fail("late").is_err());
        assert!(batch.begin_submission().is_err());
    }

    #[test]
    fn test_proof_for_member() {
        let batch = sample();
        let proof = batch.proof_for(&ContentHash::hash(b"c")).unwrap();
        assert_eq!(proof.root_hash, batch.root_hash);
        assert!(verify_proof(&proof));

        assert_eq!(
            batch.proof_for(&ContentHash::hash(b"zzz")),
            Err(ValidationError::MemoryNotInSet)
        );
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Submitting,
            BatchStatus::Confirmed,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BatchStatus::parse("mined"), None);
    }
}

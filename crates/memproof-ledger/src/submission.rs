//! Ledger submission and receipt types.

use memproof_core::{Address, ContentHash, Keypair, PublicKey, Signature, TxHash};

use crate::error::{LedgerError, Result};

/// Domain prefix for submission signatures.
const SUBMISSION_DOMAIN: &[u8] = b"memproof-submit-v0:";

/// A signed request to anchor one batch root on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSubmission {
    /// The memory registry contract the root is addressed to.
    pub contract: Address,
    /// The user the batch belongs to.
    pub user: Address,
    pub merkle_root: ContentHash,
    pub leaf_count: u32,
    /// Key of the relayer paying for the transaction.
    pub relayer_key: PublicKey,
    pub signature: Signature,
}

impl BatchSubmission {
    /// Bytes covered by the relayer signature.
    pub fn signing_bytes(
        contract: &Address,
        user: &Address,
        merkle_root: &ContentHash,
        leaf_count: u32,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUBMISSION_DOMAIN.len() + 20 + 20 + 32 + 4);
        buf.extend_from_slice(SUBMISSION_DOMAIN);
        buf.extend_from_slice(&contract.0);
        buf.extend_from_slice(&user.0);
        buf.extend_from_slice(merkle_root.as_bytes());
        buf.extend_from_slice(&leaf_count.to_be_bytes());
        buf
    }

    /// Build and sign a submission.
    pub fn sign(
        keypair: &Keypair,
        contract: Address,
        user: Address,
        merkle_root: ContentHash,
        leaf_count: u32,
    ) -> Self {
        let message = Self::signing_bytes(&contract, &user, &merkle_root, leaf_count);
        Self {
            contract,
            user,
            merkle_root,
            leaf_count,
            relayer_key: keypair.public_key(),
            signature: keypair.sign(&message),
        }
    }

    /// Check the relayer signature.
    pub fn verify(&self) -> Result<()> {
        let message =
            Self::signing_bytes(&self.contract, &self.user, &self.merkle_root, self.leaf_count);
        self.relayer_key
            .verify(&message, &self.signature)
            .map_err(|_| LedgerError::InvalidSignature)
    }

    /// The ledger address of the submitting relayer.
    pub fn relayer(&self) -> Address {
        Address::from_public_key(&self.relayer_key)
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// Milliseconds since the Unix epoch.
    pub block_timestamp: i64,
    pub gas_used: u64,
    /// False if the transaction was mined but reverted.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(keypair: &Keypair) -> BatchSubmission {
        BatchSubmission::sign(
            keypair,
            Address::from_bytes([0xc0; 20]),
            Address::from_bytes([0x01; 20]),
            ContentHash::hash(b"root"),
            3,
        )
    }

    #[test]
    fn test_signed_submission_verifies() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let submission = sample(&keypair);
        submission.verify().unwrap();
        assert_eq!(
            submission.relayer(),
            Address::from_public_key(&keypair.public_key())
        );
    }

    #[test]
    fn test_tampered_submission_fails() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let mut submission = sample(&keypair);
        submission.leaf_count = 4;
        assert!(matches!(
            submission.verify(),
            Err(LedgerError::InvalidSignature)
        ));

        let mut submission = sample(&keypair);
        submission.merkle_root = ContentHash::hash(b"other");
        assert!(submission.verify().is_err());
    }
}

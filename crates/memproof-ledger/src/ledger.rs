//! Ledger abstraction.
//!
//! The ledger anchors batch roots and emits an ordered event log. Network
//! clients for real chains implement [`Ledger`]; [`memory::MemoryLedger`]
//! is an in-process ledger for tests and local runs.

use async_trait::async_trait;

use memproof_core::{EventKey, LedgerEvent, TxHash};

use crate::error::Result;
use crate::submission::{BatchSubmission, TransactionReceipt};

/// Ledger trait for submitting roots and reading the event log.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Broadcast a batch submission.
    ///
    /// Returns the transaction hash once the ledger accepted it into its
    /// pool. Inclusion is observed separately via
    /// [`transaction_receipt`](Self::transaction_receipt).
    async fn submit_batch(&self, submission: &BatchSubmission) -> Result<TxHash>;

    /// Receipt of a transaction, or `None` if it is not mined yet.
    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TransactionReceipt>>;

    /// Events strictly after `after` (from the start if `None`), in log
    /// order, at most `limit` of them.
    async fn events_since(&self, after: Option<EventKey>, limit: usize) -> Result<Vec<LedgerEvent>>;

    /// Current head block number.
    async fn block_number(&self) -> Result<u64>;
}

/// A deterministic in-process ledger.
///
/// Mirrors the memory registry contract: relayer authorization, per-user gas
/// deposits, batch anchoring with gas charged to the user's deposit.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use memproof_core::{Address, ContentHash, LedgerEventKind};
    use tokio::sync::Mutex;

    use crate::error::LedgerError;

    /// Configuration of the in-process ledger.
    #[derive(Debug, Clone)]
    pub struct MemoryLedgerConfig {
        /// Address of the registry contract submissions must target.
        pub contract: Address,
        /// Fixed gas charged per batch transaction.
        pub base_gas: u64,
        /// Additional gas charged per leaf.
        pub gas_per_leaf: u64,
        /// Price of one unit of gas in deposit units.
        pub gas_price: u128,
        /// Mine every transaction into its own block immediately.
        pub auto_mine: bool,
        /// Timestamp of block 0, milliseconds since the Unix epoch.
        pub genesis_timestamp: i64,
        /// Milliseconds between consecutive blocks.
        pub block_interval_ms: i64,
    }

    impl Default for MemoryLedgerConfig {
        fn default() -> Self {
            Self {
                contract: Address::from_bytes([0xc0; 20]),
                base_gas: 50_000,
                gas_per_leaf: 2_000,
                gas_price: 1,
                auto_mine: true,
                genesis_timestamp: 1_700_000_000_000,
                block_interval_ms: 12_000,
            }
        }
    }

    struct PendingTx {
        tx_hash: TxHash,
        submission: BatchSubmission,
    }

    struct Inner {
        block_number: u64,
        events: Vec<LedgerEvent>,
        pending: Vec<PendingTx>,
        receipts: HashMap<TxHash, TransactionReceipt>,
        known: HashSet<TxHash>,
        authorized: HashSet<Address>,
        deposits: HashMap<Address, u128>,
        fail_next: u32,
        tx_counter: u64,
    }

    /// Log entries of the block being built.
    struct BlockBuilder {
        number: u64,
        timestamp: i64,
        events: Vec<LedgerEvent>,
    }

    impl BlockBuilder {
        fn push(&mut self, tx_hash: TxHash, kind: LedgerEventKind) {
            let log_index = self.events.len() as u32;
            self.events.push(LedgerEvent {
                block_number: self.number,
                log_index,
                block_timestamp: self.timestamp,
                tx_hash,
                kind,
            });
        }
    }

    /// In-memory ledger implementation.
    pub struct MemoryLedger {
        config: MemoryLedgerConfig,
        inner: Mutex<Inner>,
    }

    impl MemoryLedger {
        /// Create an empty ledger at block 0.
        pub fn new(config: MemoryLedgerConfig) -> Self {
            Self {
                config,
                inner: Mutex::new(Inner {
                    block_number: 0,
                    events: Vec::new(),
                    pending: Vec::new(),
                    receipts: HashMap::new(),
                    known: HashSet::new(),
                    authorized: HashSet::new(),
                    deposits: HashMap::new(),
                    fail_next: 0,
                    tx_counter: 0,
                }),
            }
        }

        pub fn config(&self) -> &MemoryLedgerConfig {
            &self.config
        }

        /// Gas a batch of `leaf_count` leaves consumes.
        pub fn gas_for(&self, leaf_count: u32) -> u64 {
            self.config.base_gas + self.config.gas_per_leaf * u64::from(leaf_count)
        }

        /// Make the next `n` submissions fail with a transient error.
        pub async fn fail_next_submissions(&self, n: u32) {
            self.inner.lock().await.fail_next = n;
        }

        /// Toggle relayer authorization. Emits an event even if unchanged.
        pub async fn set_authorized(&self, relayer: Address, authorized: bool) -> TxHash {
            let mut inner = self.inner.lock().await;
            if authorized {
                inner.authorized.insert(relayer);
            } else {
                inner.authorized.remove(&relayer);
            }
            let tx = self.next_tx_hash(&mut inner, b"authorize");
            self.mine_single(
                &mut inner,
                tx,
                vec![LedgerEventKind::RelayerAuthorizationChanged {
                    relayer,
                    authorized,
                }],
            );
            tx
        }

        /// Credit a user's gas deposit.
        pub async fn deposit(&self, user: Address, amount: u128) -> TxHash {
            let mut inner = self.inner.lock().await;
            *inner.deposits.entry(user).or_insert(0) += amount;
            let tx = self.next_tx_hash(&mut inner, b"deposit");
            self.mine_single(
                &mut inner,
                tx,
                vec![LedgerEventKind::GasDeposited { user, amount }],
            );
            tx
        }

        /// Withdraw from a user's gas deposit.
        pub async fn withdraw(&self, user: Address, amount: u128) -> Result<TxHash> {
            let mut inner = self.inner.lock().await;
            let balance = inner.deposits.get(&user).copied().unwrap_or(0);
            if balance < amount {
                return Err(LedgerError::Rejected(format!(
                    "insufficient deposit: have {}, want {}",
                    balance, amount
                )));
            }
            inner.deposits.insert(user, balance - amount);
            let tx = self.next_tx_hash(&mut inner, b"withdraw");
            self.mine_single(
                &mut inner,
                tx,
                vec![LedgerEventKind::GasWithdrawn { user, amount }],
            );
            Ok(tx)
        }

        /// Anchor a single memory hash directly (no batch).
        pub async fn store_memory(&self, user: Address, hash: ContentHash) -> TxHash {
            let mut inner = self.inner.lock().await;
            let tx = self.next_tx_hash(&mut inner, b"memory");
            let timestamp = self.timestamp_of(inner.block_number + 1);
            self.mine_single(
                &mut inner,
                tx,
                vec![LedgerEventKind::MemoryStored {
                    user,
                    hash,
                    timestamp,
                }],
            );
            tx
        }

        /// Current deposit balance of a user.
        pub async fn deposit_of(&self, user: &Address) -> u128 {
            self.inner
                .lock()
                .await
                .deposits
                .get(user)
                .copied()
                .unwrap_or(0)
        }

        /// Every event emitted so far.
        pub async fn events(&self) -> Vec<LedgerEvent> {
            self.inner.lock().await.events.clone()
        }

        /// Number of submissions waiting to be mined.
        pub async fn pending_count(&self) -> usize {
            self.inner.lock().await.pending.len()
        }

        /// Mine all pending submissions into one new block.
        ///
        /// Returns the new block number, or `None` if nothing was pending.
        pub async fn mine(&self) -> Option<u64> {
            let mut inner = self.inner.lock().await;
            if inner.pending.is_empty() {
                return None;
            }
            let pending = std::mem::take(&mut inner.pending);
            let mut block = self.open_block(&inner);
            for tx in pending {
                self.execute(&mut inner, &mut block, tx);
            }
            Some(self.seal_block(&mut inner, block))
        }

        fn timestamp_of(&self, block_number: u64) -> i64 {
            self.config.genesis_timestamp + self.config.block_interval_ms * block_number as i64
        }

        fn next_tx_hash(&self, inner: &mut Inner, tag: &[u8]) -> TxHash {
            inner.tx_counter += 1;
            let mut hasher = blake3::Hasher::new();
            hasher.update(b"memproof-tx-v0:");
            hasher.update(tag);
            hasher.update(&inner.tx_counter.to_be_bytes());
            let tx = TxHash::from_bytes(*hasher.finalize().as_bytes());
            inner.known.insert(tx);
            tx
        }

        fn open_block(&self, inner: &Inner) -> BlockBuilder {
            let number = inner.block_number + 1;
            BlockBuilder {
                number,
                timestamp: self.timestamp_of(number),
                events: Vec::new(),
            }
        }

        fn seal_block(&self, inner: &mut Inner, block: BlockBuilder) -> u64 {
            inner.block_number = block.number;
            inner.events.extend(block.events);
            block.number
        }

        fn mine_single(&self, inner: &mut Inner, tx: TxHash, kinds: Vec<LedgerEventKind>) {
            let mut block = self.open_block(inner);
            for kind in kinds {
                block.push(tx, kind);
            }
            inner.receipts.insert(
                tx,
                TransactionReceipt {
                    tx_hash: tx,
                    block_number: block.number,
                    block_timestamp: block.timestamp,
                    gas_used: self.config.base_gas,
                    success: true,
                },
            );
            self.seal_block(inner, block);
        }

        /// Apply a batch submission inside `block`.
        fn execute(&self, inner: &mut Inner, block: &mut BlockBuilder, tx: PendingTx) {
            let submission = &tx.submission;
            let gas_used = self.gas_for(submission.leaf_count);
            let cost = u128::from(gas_used) * self.config.gas_price;

            // Gas is charged to the user's deposit when it covers the cost;
            // otherwise the relayer absorbs it.
            let balance = inner.deposits.get(&submission.user).copied().unwrap_or(0);
            if balance >= cost && cost > 0 {
                inner.deposits.insert(submission.user, balance - cost);
                block.push(
                    tx.tx_hash,
                    LedgerEventKind::GasDeducted {
                        user: submission.user,
                        amount: cost,
                    },
                );
            }

            block.push(
                tx.tx_hash,
                LedgerEventKind::BatchStored {
                    user: submission.user,
                    merkle_root: submission.merkle_root,
                    count: u64::from(submission.leaf_count),
                    timestamp: block.timestamp,
                },
            );

            inner.receipts.insert(
                tx.tx_hash,
                TransactionReceipt {
                    tx_hash: tx.tx_hash,
                    block_number: block.number,
                    block_timestamp: block.timestamp,
                    gas_used,
                    success: true,
                },
            );
        }
    }

    impl Default for MemoryLedger {
        fn default() -> Self {
            Self::new(MemoryLedgerConfig::default())
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn submit_batch(&self, submission: &BatchSubmission) -> Result<TxHash> {
            let mut inner = self.inner.lock().await;

            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                tracing::debug!(remaining = inner.fail_next, "simulated transient failure");
                return Err(LedgerError::Transient("simulated network timeout".into()));
            }

            submission.verify()?;

            if submission.contract != self.config.contract {
                return Err(LedgerError::Rejected(format!(
                    "unknown contract {}",
                    submission.contract
                )));
            }
            if submission.leaf_count == 0 {
                return Err(LedgerError::Rejected("empty batch".into()));
            }

            let relayer = submission.relayer();
            if !inner.authorized.contains(&relayer) {
                return Err(LedgerError::Unauthorized(relayer));
            }

            let tx_hash = self.next_tx_hash(&mut inner, submission.merkle_root.as_bytes());
            let pending = PendingTx {
                tx_hash,
                submission: submission.clone(),
            };

            if self.config.auto_mine {
                let mut block = self.open_block(&inner);
                self.execute(&mut inner, &mut block, pending);
                let number = self.seal_block(&mut inner, block);
                tracing::debug!(tx = %tx_hash, block = number, "batch mined");
            } else {
                inner.pending.push(pending);
            }

            Ok(tx_hash)
        }

        async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TransactionReceipt>> {
            let inner = self.inner.lock().await;
            if !inner.known.contains(tx) {
                return Err(LedgerError::UnknownTransaction(*tx));
            }
            Ok(inner.receipts.get(tx).cloned())
        }

        async fn events_since(
            &self,
            after: Option<EventKey>,
            limit: usize,
        ) -> Result<Vec<LedgerEvent>> {
            let inner = self.inner.lock().await;
            Ok(inner
                .events
                .iter()
                .filter(|e| after.map_or(true, |a| e.key() > a))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(self.inner.lock().await.block_number)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryLedger, MemoryLedgerConfig};
    use super::*;
    use crate::error::LedgerError;
    use memproof_core::{Address, ContentHash, Keypair, LedgerEventKind};

    fn relayer() -> Keypair {
        Keypair::from_seed(&[0x42; 32])
    }

    fn submission(keypair: &Keypair, ledger: &MemoryLedger, count: u32) -> BatchSubmission {
        BatchSubmission::sign(
            keypair,
            ledger.config().contract,
            Address::from_bytes([1; 20]),
            ContentHash::hash(b"root"),
            count,
        )
    }

    async fn authorized_ledger(config: MemoryLedgerConfig) -> (MemoryLedger, Keypair) {
        let ledger = MemoryLedger::new(config);
        let keypair = relayer();
        ledger
            .set_authorized(Address::from_public_key(&keypair.public_key()), true)
            .await;
        (ledger, keypair)
    }

    #[tokio::test]
    async fn test_submit_and_receipt() {
        let (ledger, keypair) = authorized_ledger(MemoryLedgerConfig::default()).await;

        let tx = ledger
            .submit_batch(&submission(&keypair, &ledger, 4))
            .await
            .unwrap();
        let receipt = ledger.transaction_receipt(&tx).await.unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.gas_used, ledger.gas_for(4));
        assert_eq!(receipt.block_number, ledger.block_number().await.unwrap());

        let events = ledger.events().await;
        assert!(matches!(
            events.last().unwrap().kind,
            LedgerEventKind::BatchStored { count: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_relayer_rejected() {
        let ledger = MemoryLedger::default();
        let keypair = relayer();
        let err = ledger
            .submit_batch(&submission(&keypair, &ledger, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_simulated_transient_failures() {
        let (ledger, keypair) = authorized_ledger(MemoryLedgerConfig::default()).await;
        ledger.fail_next_submissions(2).await;

        let sub = submission(&keypair, &ledger, 1);
        assert!(ledger.submit_batch(&sub).await.unwrap_err().is_transient());
        assert!(ledger.submit_batch(&sub).await.unwrap_err().is_transient());
        assert!(ledger.submit_batch(&sub).await.is_ok());
    }

    #[tokio::test]
    async fn test_gas_deducted_from_deposit() {
        let (ledger, keypair) = authorized_ledger(MemoryLedgerConfig::default()).await;
        let user = Address::from_bytes([1; 20]);
        ledger.deposit(user, 1_000_000).await;

        ledger
            .submit_batch(&submission(&keypair, &ledger, 2))
            .await
            .unwrap();

        let cost = u128::from(ledger.gas_for(2));
        assert_eq!(ledger.deposit_of(&user).await, 1_000_000 - cost);

        let events = ledger.events().await;
        let n = events.len();
        assert!(matches!(
            events[n - 2].kind,
            LedgerEventKind::GasDeducted { amount, .. } if amount == cost
        ));
        assert_eq!(events[n - 2].block_number, events[n - 1].block_number);
        assert_eq!(events[n - 1].log_index, events[n - 2].log_index + 1);
    }

    #[tokio::test]
    async fn test_manual_mining() {
        let config = MemoryLedgerConfig {
            auto_mine: false,
            ..Default::default()
        };
        let (ledger, keypair) = authorized_ledger(config).await;

        let tx = ledger
            .submit_batch(&submission(&keypair, &ledger, 1))
            .await
            .unwrap();
        assert_eq!(ledger.transaction_receipt(&tx).await.unwrap(), None);
        assert_eq!(ledger.pending_count().await, 1);

        let block = ledger.mine().await.unwrap();
        let receipt = ledger.transaction_receipt(&tx).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, block);
        assert_eq!(ledger.mine().await, None);
    }

    #[tokio::test]
    async fn test_withdraw_insufficient() {
        let ledger = MemoryLedger::default();
        let user = Address::from_bytes([2; 20]);
        ledger.deposit(user, 100).await;
        assert!(matches!(
            ledger.withdraw(user, 101).await,
            Err(LedgerError::Rejected(_))
        ));
        ledger.withdraw(user, 40).await.unwrap();
        assert_eq!(ledger.deposit_of(&user).await, 60);
    }

    #[tokio::test]
    async fn test_events_since_is_ordered_and_paged() {
        let ledger = MemoryLedger::default();
        let user = Address::from_bytes([3; 20]);
        for amount in 1..=5 {
            ledger.deposit(user, amount).await;
        }

        let first = ledger.events_since(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = ledger
            .events_since(Some(first[1].key()), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert!(first[1].key() < rest[0].key());
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let ledger = MemoryLedger::default();
        let err = ledger
            .transaction_receipt(&TxHash::from_bytes([9; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownTransaction(_)));
    }
}

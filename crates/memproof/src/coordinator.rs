//! Batch commit coordination.
//!
//! Leaves wait in a per-user pending pool. A commit takes up to
//! `max_leaves_per_batch` of them (oldest first), forms a batch, and drives
//! it through `Pending -> Submitting -> Confirmed | Failed`:
//!
//! - submission is retried with bounded exponential backoff while the
//!   ledger reports transient errors
//! - once accepted, the receipt is polled a bounded number of times
//! - a failed batch returns its leaves to the front of the pool
//!
//! Commits for the same user are serialized; different users commit in
//! parallel. Leaves taken by an in-flight batch are out of the pool, so a
//! leaf belongs to at most one in-flight batch and cannot be cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use memproof_core::{
    Address, Batch, BatchId, BatchStatus, Keypair, MemoryLeaf, TxHash, ValidationError,
};
use memproof_ledger::{BatchSubmission, Ledger, LedgerError, TransactionReceipt};
use memproof_store::{BatchStore, InsertResult};

use crate::config::CoordinatorConfig;
use crate::error::{Result, ServiceError};

/// Pending leaves and the commit lock for one user.
#[derive(Default)]
struct UserLane {
    pending: Mutex<VecDeque<MemoryLeaf>>,
    commit: tokio::sync::Mutex<()>,
}

/// Forms batches from pending leaves and anchors their roots on a ledger.
pub struct BatchCommitCoordinator<S: BatchStore, L: Ledger> {
    store: Arc<S>,
    ledger: Arc<L>,
    relayer: Keypair,
    contract: Address,
    config: CoordinatorConfig,
    lanes: Mutex<HashMap<Address, Arc<UserLane>>>,
}

impl<S: BatchStore, L: Ledger> BatchCommitCoordinator<S, L> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        relayer: Keypair,
        contract: Address,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            relayer,
            contract,
            config,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Address of the relayer key that signs submissions.
    pub fn relayer_address(&self) -> Address {
        Address::from_public_key(&self.relayer.public_key())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending Pool
    // ─────────────────────────────────────────────────────────────────────────

    /// Add leaves to a user's pending pool.
    pub fn enqueue(&self, user: Address, leaves: impl IntoIterator<Item = MemoryLeaf>) {
        let lane = self.lane(&user);
        let mut pending = lane.pending.lock().unwrap();
        pending.extend(leaves.into_iter().map(|mut leaf| {
            leaf.unassign();
            leaf
        }));
    }

    /// Leaves waiting for a batch, oldest first.
    pub fn pending(&self, user: &Address) -> Vec<MemoryLeaf> {
        self.lane(user).pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn pending_count(&self, user: &Address) -> usize {
        self.lane(user).pending.lock().unwrap().len()
    }

    /// Remove and return every leaf not yet taken by a batch.
    pub fn cancel_pending(&self, user: &Address) -> Vec<MemoryLeaf> {
        let leaves: Vec<_> = self.lane(user).pending.lock().unwrap().drain(..).collect();
        if !leaves.is_empty() {
            tracing::info!(user = %user, count = leaves.len(), "pending leaves cancelled");
        }
        leaves
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit exactly `leaves`, in order, as one batch.
    ///
    /// Returns the confirmed batch. On failure the batch is persisted as
    /// `Failed`, the leaves join the user's pending pool, and
    /// `CommitFailed` is returned.
    pub async fn submit(&self, user: Address, leaves: Vec<MemoryLeaf>) -> Result<Batch> {
        if leaves.is_empty() {
            return Err(ValidationError::NoMemories.into());
        }
        if leaves.len() > self.config.max_leaves_per_batch {
            return Err(ValidationError::Malformed(format!(
                "{} memories exceed the batch limit of {}",
                leaves.len(),
                self.config.max_leaves_per_batch
            ))
            .into());
        }

        let lane = self.lane(&user);
        let _guard = lane.commit.lock().await;
        self.form(&lane, user, leaves).await
    }

    /// Commit the oldest pending leaves of `user` as one batch.
    pub async fn commit(&self, user: Address) -> Result<Batch> {
        let lane = self.lane(&user);
        let _guard = lane.commit.lock().await;

        let leaves = self.take(&lane);
        if leaves.is_empty() {
            return Err(ValidationError::NoMemories.into());
        }
        self.form(&lane, user, leaves).await
    }

    /// Resubmit a failed batch with its original leaf order.
    ///
    /// Its leaves must still be pending; they are taken out of the pool for
    /// the duration of the attempt.
    pub async fn retry_batch(&self, batch_id: &BatchId) -> Result<Batch> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("batch {batch_id}")))?;
        if batch.status != BatchStatus::Failed {
            return Err(ServiceError::InvalidOperation(format!(
                "batch {} is {}, only failed batches can be retried",
                batch_id,
                batch.status.as_str()
            )));
        }

        let lane = self.lane(&batch.user);
        let _guard = lane.commit.lock().await;

        let mut leaves = {
            let mut pending = lane.pending.lock().unwrap();
            let mut taken = Vec::with_capacity(batch.leaf_count());
            for hash in &batch.leaf_hashes {
                match pending.iter().position(|leaf| leaf.hash == *hash) {
                    Some(i) => taken.extend(pending.remove(i)),
                    None => {
                        // Put back what was taken, in order
                        for leaf in taken.into_iter().rev() {
                            pending.push_front(leaf);
                        }
                        return Err(ServiceError::InvalidOperation(format!(
                            "leaves of batch {batch_id} are no longer pending"
                        )));
                    }
                }
            }
            taken
        };
        for (position, leaf) in leaves.iter_mut().enumerate() {
            leaf.assign(batch.batch_id, position as u32);
        }

        tracing::info!(batch = %batch.batch_id, attempts = batch.attempts, "retrying failed batch");
        self.drive(&lane, batch, leaves).await
    }

    /// Build a pending batch over `leaves`, persist it, and drive it.
    /// The caller holds the user's commit lock.
    async fn form(&self, lane: &UserLane, user: Address, mut leaves: Vec<MemoryLeaf>) -> Result<Batch> {
        let hashes = leaves.iter().map(|leaf| leaf.hash).collect();
        let batch = match Batch::new(user, hashes, now_millis()) {
            Ok(batch) => batch,
            Err(err) => {
                Self::restore(lane, leaves);
                return Err(err.into());
            }
        };
        for (position, leaf) in leaves.iter_mut().enumerate() {
            leaf.assign(batch.batch_id, position as u32);
        }

        match self.store.insert_batch(&batch).await {
            Ok(InsertResult::Inserted) => {}
            Ok(InsertResult::AlreadyExists) => {
                tracing::error!(batch = %batch.batch_id, "batch id already stored");
                let id = batch.batch_id;
                Self::restore(lane, leaves);
                return Err(ServiceError::InvalidOperation(format!("batch {id} already exists")));
            }
            Err(err) => {
                Self::restore(lane, leaves);
                return Err(err.into());
            }
        }

        tracing::info!(
            batch = %batch.batch_id,
            user = %user,
            root = %batch.root_hash,
            leaves = batch.leaf_count(),
            "batch formed"
        );

        self.drive(lane, batch, leaves).await
    }

    /// Take up to `max_leaves_per_batch` leaves from the front of the pool.
    fn take(&self, lane: &UserLane) -> Vec<MemoryLeaf> {
        let mut pending = lane.pending.lock().unwrap();
        let n = pending.len().min(self.config.max_leaves_per_batch);
        pending.drain(..n).collect()
    }

    /// Return leaves to the front of the pool, keeping their order.
    fn restore(lane: &UserLane, leaves: Vec<MemoryLeaf>) {
        let mut pending = lane.pending.lock().unwrap();
        for mut leaf in leaves.into_iter().rev() {
            leaf.unassign();
            pending.push_front(leaf);
        }
    }

    /// Run one batch from `Pending` or `Failed` to a settled state.
    async fn drive(&self, lane: &UserLane, mut batch: Batch, leaves: Vec<MemoryLeaf>) -> Result<Batch> {
        batch.begin_submission()?;
        if let Err(err) = self.store.update_batch(&batch).await {
            Self::restore(lane, leaves);
            return Err(err.into());
        }

        let outcome = match self.submit_with_retry(&mut batch).await {
            Ok(tx) => self.await_receipt(&batch, tx).await,
            Err(err) => Err(err.to_string()),
        };

        match outcome {
            Ok(receipt) => {
                batch.confirm(
                    receipt.tx_hash,
                    receipt.gas_used,
                    receipt.block_number,
                    receipt.block_timestamp,
                )?;
                // A leaf only counts as committed once this write lands
                if let Err(err) = self.store.update_batch(&batch).await {
                    tracing::error!(
                        batch = %batch.batch_id,
                        tx = %receipt.tx_hash,
                        error = %err,
                        "batch confirmed on ledger but not persisted"
                    );
                    return Err(err.into());
                }
                tracing::info!(
                    batch = %batch.batch_id,
                    root = %batch.root_hash,
                    tx = %receipt.tx_hash,
                    block = receipt.block_number,
                    gas_used = receipt.gas_used,
                    "batch confirmed"
                );
                Ok(batch)
            }
            Err(reason) => {
                batch.fail(reason.clone())?;
                tracing::error!(
                    batch = %batch.batch_id,
                    user = %batch.user,
                    attempts = batch.attempts,
                    reason = %reason,
                    "batch failed, leaves returned to pending"
                );
                Self::restore(lane, leaves);
                self.store.update_batch(&batch).await?;
                Err(ServiceError::CommitFailed {
                    batch_id: batch.batch_id,
                    reason,
                })
            }
        }
    }

    /// Sign and send the batch root, retrying transient failures.
    async fn submit_with_retry(&self, batch: &mut Batch) -> std::result::Result<TxHash, LedgerError> {
        let leaf_count = u32::try_from(batch.leaf_count())
            .map_err(|_| LedgerError::Rejected("batch too large".into()))?;
        let submission = BatchSubmission::sign(
            &self.relayer,
            self.contract,
            batch.user,
            batch.root_hash,
            leaf_count,
        );

        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            batch.attempts += 1;
            match self.ledger.submit_batch(&submission).await {
                Ok(tx) => {
                    tracing::debug!(batch = %batch.batch_id, tx = %tx, attempt, "root submitted");
                    return Ok(tx);
                }
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        batch = %batch.batch_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(batch = %batch.batch_id, attempt, error = %err, "submission abandoned");
                    return Err(err);
                }
            }
        }
    }

    /// Poll for the receipt of `tx` until mined or out of polls.
    async fn await_receipt(
        &self,
        batch: &Batch,
        tx: TxHash,
    ) -> std::result::Result<TransactionReceipt, String> {
        for poll in 1..=self.config.max_confirmation_polls {
            match self.ledger.transaction_receipt(&tx).await {
                Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                Ok(Some(_)) => return Err(format!("transaction {tx} reverted")),
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    tracing::debug!(batch = %batch.batch_id, poll, error = %err, "receipt poll failed");
                }
                Err(err) => return Err(err.to_string()),
            }
            if poll < self.config.max_confirmation_polls {
                tokio::time::sleep(self.config.confirmation_interval).await;
            }
        }
        Err(format!(
            "transaction {tx} not mined after {} polls",
            self.config.max_confirmation_polls
        ))
    }

    fn lane(&self, user: &Address) -> Arc<UserLane> {
        self.lanes
            .lock()
            .unwrap()
            .entry(*user)
            .or_default()
            .clone()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

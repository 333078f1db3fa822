//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use memproof_core::{
    Address, Batch, BatchId, BatchStatus, ContentHash, EventKey, RelayerAggregate,
    SystemAggregate, UserAggregate,
};

use crate::error::{Result, StoreError};
use crate::traits::{AggregateStore, AggregateTransition, BatchStore, InsertResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Batches indexed by id.
    batches: HashMap<BatchId, Batch>,

    /// Insertion order of batch ids.
    order: Vec<BatchId>,

    users: HashMap<Address, UserAggregate>,

    relayers: HashMap<Address, RelayerAggregate>,

    system: SystemAggregate,

    /// Applied event keys.
    applied: BTreeSet<EventKey>,
}

impl MemoryStoreInner {
    fn ordered(&self, pred: impl Fn(&Batch) -> bool) -> Vec<Batch> {
        self.order
            .iter()
            .filter_map(|id| self.batches.get(id))
            .filter(|b| pred(b))
            .cloned()
            .collect()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<InsertResult> {
        let mut inner = self.inner.write().unwrap();

        if inner.batches.contains_key(&batch.batch_id) {
            return Ok(InsertResult::AlreadyExists);
        }

        inner.batches.insert(batch.batch_id, batch.clone());
        inner.order.push(batch.batch_id);
        Ok(InsertResult::Inserted)
    }

    async fn update_batch(&self, batch: &Batch) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let stored = inner
            .batches
            .get_mut(&batch.batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch.batch_id)))?;

        stored.status = batch.status;
        stored.ledger_tx_ref = batch.ledger_tx_ref;
        stored.gas_used = batch.gas_used;
        stored.block_number = batch.block_number;
        stored.attempts = batch.attempts;
        stored.confirmed_at = batch.confirmed_at;
        stored.last_error = batch.last_error.clone();
        Ok(())
    }

    async fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.batches.get(id).cloned())
    }

    async fn get_batch_by_root(&self, root: &ContentHash) -> Result<Option<Batch>> {
        let inner = self.inner.read().unwrap();
        let candidates = inner.ordered(|b| b.root_hash == *root);

        let confirmed = candidates.iter().rev().find(|b| b.is_confirmed()).cloned();
        Ok(confirmed.or_else(|| candidates.last().cloned()))
    }

    async fn batches_for_user(&self, user: &Address) -> Result<Vec<Batch>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.ordered(|b| b.user == *user))
    }

    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<Batch>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.ordered(|b| b.status == status))
    }

    async fn batches_containing(&self, leaf: &ContentHash) -> Result<Vec<Batch>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.ordered(|b| b.contains(leaf)))
    }

    async fn is_leaf_confirmed(&self, leaf: &ContentHash) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .batches
            .values()
            .any(|b| b.is_confirmed() && b.contains(leaf)))
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn get_user(&self, address: &Address) -> Result<Option<UserAggregate>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.users.get(address).cloned())
    }

    async fn get_relayer(&self, address: &Address) -> Result<Option<RelayerAggregate>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.relayers.get(address).cloned())
    }

    async fn get_system(&self) -> Result<SystemAggregate> {
        let inner = self.inner.read().unwrap();
        Ok(inner.system.clone())
    }

    async fn is_applied(&self, key: &EventKey) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.applied.contains(key))
    }

    async fn high_water_mark(&self) -> Result<Option<EventKey>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.applied.iter().next_back().copied())
    }

    async fn recent_applied_keys(&self, limit: usize) -> Result<Vec<EventKey>> {
        let inner = self.inner.read().unwrap();
        let mut keys: Vec<EventKey> = inner.applied.iter().rev().take(limit).copied().collect();
        keys.reverse();
        Ok(keys)
    }

    async fn apply_transition(&self, transition: &AggregateTransition) -> Result<InsertResult> {
        let mut inner = self.inner.write().unwrap();

        if !inner.applied.insert(transition.key) {
            return Ok(InsertResult::AlreadyExists);
        }

        if let Some(user) = &transition.user {
            inner.users.insert(user.address, user.clone());
        }
        if let Some(relayer) = &transition.relayer {
            inner.relayers.insert(relayer.address, relayer.clone());
        }
        inner.system = transition.system.clone();

        Ok(InsertResult::Inserted)
    }
}

//! Store traits: the abstract interface for memproof persistence.
//!
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use memproof_core::{
    Address, Batch, BatchId, BatchStatus, ContentHash, EventKey, RelayerAggregate,
    SystemAggregate, UserAggregate,
};

use crate::error::Result;

/// Result of an idempotent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The record was written.
    Inserted,
    /// The record (or event key) was already present; nothing changed.
    AlreadyExists,
}

/// Everything one event changes, persisted as a unit.
///
/// `user` and `relayer` are the complete post-event rows for the aggregates
/// the event touched; `system` is the complete post-event system row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateTransition {
    pub key: EventKey,
    pub user: Option<UserAggregate>,
    pub relayer: Option<RelayerAggregate>,
    pub system: SystemAggregate,
}

/// Durable log of batches and their leaf order.
#[async_trait]
pub trait BatchStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Batch Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new batch together with its ordered leaves.
    ///
    /// Returns `AlreadyExists` if a batch with the same id is present.
    async fn insert_batch(&self, batch: &Batch) -> Result<InsertResult>;

    /// Persist the mutable bookkeeping of an existing batch (status, tx ref,
    /// gas, attempts). Leaf order is never rewritten.
    async fn update_batch(&self, batch: &Batch) -> Result<()>;

    /// Get a batch by id.
    async fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>>;

    /// Get the batch committed under `root`.
    ///
    /// When several batches share a root (a failed batch re-formed from the
    /// same leaves), a confirmed one wins, then the most recent.
    async fn get_batch_by_root(&self, root: &ContentHash) -> Result<Option<Batch>>;

    /// All batches for a user, oldest first.
    async fn batches_for_user(&self, user: &Address) -> Result<Vec<Batch>>;

    /// All batches in a given status, oldest first.
    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<Batch>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Leaf Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// All batches that contain `leaf`, oldest first.
    async fn batches_containing(&self, leaf: &ContentHash) -> Result<Vec<Batch>>;

    /// Whether `leaf` is part of at least one confirmed batch.
    async fn is_leaf_confirmed(&self, leaf: &ContentHash) -> Result<bool>;
}

/// Materialized aggregates plus the applied-event ledger.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Aggregate Queries
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_user(&self, address: &Address) -> Result<Option<UserAggregate>>;

    async fn get_relayer(&self, address: &Address) -> Result<Option<RelayerAggregate>>;

    /// The system row; all zeros before the first event.
    async fn get_system(&self) -> Result<SystemAggregate>;

    // ─────────────────────────────────────────────────────────────────────────
    // Event Application
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether an event key has been applied.
    async fn is_applied(&self, key: &EventKey) -> Result<bool>;

    /// The greatest applied event key.
    async fn high_water_mark(&self) -> Result<Option<EventKey>>;

    /// The `limit` greatest applied keys, ascending.
    async fn recent_applied_keys(&self, limit: usize) -> Result<Vec<EventKey>>;

    /// Atomically record `transition.key` as applied and write its rows.
    ///
    /// If the key was already applied nothing is written and
    /// `AlreadyExists` is returned.
    async fn apply_transition(&self, transition: &AggregateTransition) -> Result<InsertResult>;
}

/// A complete memproof store.
pub trait Store: BatchStore + AggregateStore {}

impl<S: BatchStore + AggregateStore + ?Sized> Store for S {}

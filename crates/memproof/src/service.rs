//! The MemoryService: the operations memproof exposes to its callers.
//!
//! The service owns the commit coordinator, the event ingestor and the
//! query caches. Transport (HTTP or otherwise) is left to the embedding
//! application; every operation takes and returns the serde types in
//! [`crate::api`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use memproof_aggregate::{EventIngestor, IngestReport, IngestorStatus, LedgerSource};
use memproof_core::{
    generate_proof, hash_memory, Address, Batch, BatchId, ContentHash, MemoryLeaf, ValidationError,
};
use memproof_ledger::Ledger;
use memproof_store::{SqliteStore, Store};

use crate::api::{
    BatchMetadataResponse, GenerateProofRequest, GenerateProofResponse, HealthResponse,
    MemoryStatusResponse, StoreMemoriesRequest, StoreMemoriesResponse, UserMemoryCountResponse,
};
use crate::cache::TtlCache;
use crate::config::ServiceConfig;
use crate::coordinator::BatchCommitCoordinator;
use crate::error::{Result, ServiceError};

/// The memproof service.
pub struct MemoryService<S: Store, L: Ledger> {
    store: Arc<S>,
    coordinator: BatchCommitCoordinator<S, L>,
    ingestor: Mutex<EventIngestor<S, LedgerSource<L>>>,
    /// Leaf hash -> whether it is in a confirmed batch.
    status_cache: TtlCache<ContentHash, bool>,
    /// Root -> metadata of its confirmed batch.
    batch_cache: TtlCache<ContentHash, BatchMetadataResponse>,
}

impl<S: Store, L: Ledger> MemoryService<S, L> {
    /// Create a service over an existing store and ledger.
    pub fn new(config: &ServiceConfig, store: Arc<S>, ledger: Arc<L>) -> Self {
        let coordinator = BatchCommitCoordinator::new(
            store.clone(),
            ledger.clone(),
            config.signing_key.clone(),
            config.contract,
            config.coordinator.clone(),
        );
        let ingestor = EventIngestor::new(
            store.clone(),
            LedgerSource::new(ledger),
            config.ingestor.clone(),
        );
        Self {
            store,
            coordinator,
            ingestor: Mutex::new(ingestor),
            status_cache: TtlCache::new(&config.cache),
            batch_cache: TtlCache::new(&config.cache),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn coordinator(&self) -> &BatchCommitCoordinator<S, L> {
        &self.coordinator
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Canonicalize, hash and commit a list of memories as one batch.
    ///
    /// Returns only once the batch is confirmed on the ledger.
    pub async fn store_memories(&self, request: StoreMemoriesRequest) -> Result<StoreMemoriesResponse> {
        let user = match request.user_address.as_deref() {
            Some(address) => Address::from_hex(address)?,
            None => self.coordinator.relayer_address(),
        };
        let leaves = leaves_from(&request.memories)?;

        let batch = self.coordinator.submit(user, leaves).await?;
        self.invalidate(&batch);
        let response = store_response(&batch)?;

        // Aggregates trail the ledger; a failure here does not undo the commit
        if let Err(err) = self.sync_events().await {
            tracing::warn!(error = %err, "event sync after commit failed");
        }
        Ok(response)
    }

    /// Commit whatever is pending for `user` (leaves of failed batches).
    pub async fn commit_pending(&self, user: &str) -> Result<StoreMemoriesResponse> {
        let user = Address::from_hex(user)?;
        let batch = self.coordinator.commit(user).await?;
        self.invalidate(&batch);
        store_response(&batch)
    }

    /// Resubmit a failed batch by id.
    pub async fn retry_batch(&self, batch_id: &str) -> Result<StoreMemoriesResponse> {
        let batch_id = BatchId::from_hex(batch_id)?;
        let batch = self.coordinator.retry_batch(&batch_id).await?;
        self.invalidate(&batch);
        store_response(&batch)
    }

    /// Drop the pending leaves of `user`. Returns how many were dropped.
    pub fn cancel_pending(&self, user: &str) -> Result<usize> {
        let user = Address::from_hex(user)?;
        Ok(self.coordinator.cancel_pending(&user).len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether a memory hash is a leaf of a confirmed batch.
    pub async fn memory_status(&self, hash: &str) -> Result<MemoryStatusResponse> {
        let hash = ContentHash::from_hex(hash)?;
        let is_verified = match self.status_cache.get(&hash) {
            Some(cached) => cached,
            None => {
                let confirmed = self.store.is_leaf_confirmed(&hash).await?;
                self.status_cache.insert(hash, confirmed);
                confirmed
            }
        };
        Ok(MemoryStatusResponse {
            hash: hash.to_string(),
            is_verified,
        })
    }

    /// Number of memories committed by `user`, from the aggregates.
    pub async fn user_memory_count(&self, user: &str) -> Result<UserMemoryCountResponse> {
        let address = Address::from_hex(user)?;
        let memory_count = self
            .store
            .get_user(&address)
            .await?
            .map_or(0, |u| u.total_memories);
        Ok(UserMemoryCountResponse {
            user_address: address.to_string(),
            memory_count,
        })
    }

    /// Metadata of the confirmed batch with this root.
    pub async fn batch_metadata(&self, root: &str) -> Result<BatchMetadataResponse> {
        let root = ContentHash::from_hex(root)?;
        if let Some(cached) = self.batch_cache.get(&root) {
            return Ok(cached);
        }
        let batch = self
            .store
            .get_batch_by_root(&root)
            .await?
            .filter(Batch::is_confirmed)
            .ok_or_else(|| ServiceError::NotFound(format!("batch with root {root}")))?;
        let response = BatchMetadataResponse::from_batch(&batch);
        self.batch_cache.insert(root, response.clone());
        Ok(response)
    }

    /// Build an inclusion proof for `memory` among `all_memories`.
    ///
    /// Pure: nothing is read from the store or the ledger.
    pub fn generate_proof(&self, request: &GenerateProofRequest) -> Result<GenerateProofResponse> {
        let leaves: Vec<ContentHash> = leaves_from(&request.all_memories)?
            .into_iter()
            .map(|leaf| leaf.hash)
            .collect();
        let target = hash_memory(&request.memory);
        let index = leaves
            .iter()
            .position(|h| *h == target)
            .ok_or(ValidationError::MemoryNotInSet)?;
        let proof = generate_proof(&leaves, index)?;
        Ok(GenerateProofResponse::from(&proof))
    }

    /// Regenerate the proof of a committed memory from the batch log.
    pub async fn committed_proof(&self, hash: &str) -> Result<GenerateProofResponse> {
        let hash = ContentHash::from_hex(hash)?;
        let batch = self
            .store
            .batches_containing(&hash)
            .await?
            .into_iter()
            .find(Batch::is_confirmed)
            .ok_or_else(|| ServiceError::NotFound(format!("confirmed batch containing {hash}")))?;
        let proof = batch.proof_for(&hash)?;
        Ok(GenerateProofResponse::from(&proof))
    }

    /// Liveness. Reports failure while event ingestion is halted.
    pub async fn health(&self) -> HealthResponse {
        let halted = match self.ingestor.try_lock() {
            Ok(ingestor) => match ingestor.status() {
                IngestorStatus::Halted { key, reason } => Some(format!("{key}: {reason}")),
                IngestorStatus::Running => None,
            },
            // An ingestion pass is in progress
            Err(_) => None,
        };
        match halted {
            None => HealthResponse {
                success: true,
                message: "memproof service is running".into(),
                timestamp: now_millis(),
            },
            Some(detail) => HealthResponse {
                success: false,
                message: format!("event ingestion halted at {detail}"),
                timestamp: now_millis(),
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply every ledger event not yet reflected in the aggregates.
    pub async fn sync_events(&self) -> Result<IngestReport> {
        let mut ingestor = self.ingestor.lock().await;
        Ok(ingestor.catch_up().await?)
    }

    /// Clear an ingestion halt after an ordering anomaly was resolved.
    pub async fn resume_ingestion(&self) {
        self.ingestor.lock().await.resume();
    }

    fn invalidate(&self, batch: &Batch) {
        for hash in &batch.leaf_hashes {
            self.status_cache.invalidate(hash);
        }
        self.batch_cache.invalidate(&batch.root_hash);
    }
}

impl<L: Ledger> MemoryService<SqliteStore, L> {
    /// Open the configured SQLite database (in-memory when no path is set).
    pub fn open(config: &ServiceConfig, ledger: Arc<L>) -> Result<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_memory()?,
        };
        tracing::info!(
            ledger = %config.ledger_url,
            contract = %config.contract,
            database = ?config.database_path,
            "memproof service opened"
        );
        Ok(Self::new(config, Arc::new(store), ledger))
    }
}

/// Canonicalize and hash memories, rejecting any that canonicalize to "".
fn leaves_from(memories: &[String]) -> Result<Vec<MemoryLeaf>> {
    if memories.is_empty() {
        return Err(ValidationError::NoMemories.into());
    }
    memories
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let leaf = MemoryLeaf::new(raw.as_str());
            if leaf.is_empty() {
                Err(ValidationError::EmptyMemory(i).into())
            } else {
                Ok(leaf)
            }
        })
        .collect()
}

fn store_response(batch: &Batch) -> Result<StoreMemoriesResponse> {
    let (Some(tx), Some(block_number), Some(gas_used)) =
        (batch.ledger_tx_ref, batch.block_number, batch.gas_used)
    else {
        return Err(ServiceError::InvalidOperation(format!(
            "batch {} has no ledger receipt",
            batch.batch_id
        )));
    };
    Ok(StoreMemoriesResponse {
        tx_hash: tx.to_string(),
        merkle_root: batch.root_hash.to_string(),
        block_number,
        gas_used,
        memory_count: batch.leaf_count(),
        user_address: batch.user.to_string(),
    })
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

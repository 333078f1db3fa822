//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for memproof. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use memproof_core::{
    Address, Batch, BatchId, BatchStatus, ContentHash, EventKey, RelayerAggregate,
    SystemAggregate, TxHash, UserAggregate,
};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{AggregateStore, AggregateTransition, BatchStore, InsertResult};

/// Columns selected for every batch query, in `row_to_batch` order.
const BATCH_COLUMNS: &str = "b.batch_id, b.user, b.root_hash, b.leaf_hashes, b.status,
     b.ledger_tx_ref, b.gas_used, b.block_number, b.attempts, b.last_error,
     b.created_at, b.confirmed_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn fixed<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| conversion_error(idx, Type::Blob, format!("expected {} bytes, got {}", N, len)))
}

fn fixed_opt<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<[u8; N]>> {
    let bytes: Option<Vec<u8>> = row.get(idx)?;
    bytes
        .map(|b| {
            let len = b.len();
            b.try_into().map_err(|_| {
                conversion_error(idx, Type::Blob, format!("expected {} bytes, got {}", N, len))
            })
        })
        .transpose()
}

fn amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<u128> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|_| conversion_error(idx, Type::Text, format!("bad amount {:?}", text)))
}

// Leaf order is stored as a CBOR array, like the rest of the list columns.
fn encode_leaves(leaves: &[ContentHash]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(leaves, &mut buf)
        .map_err(|e| StoreError::Serialization(format!("{:?}", e)))?;
    Ok(buf)
}

fn row_to_batch(row: &Row<'_>) -> rusqlite::Result<Batch> {
    let leaves_cbor: Vec<u8> = row.get(3)?;
    let leaf_hashes: Vec<ContentHash> = ciborium::from_reader(&leaves_cbor[..])
        .map_err(|e| conversion_error(3, Type::Blob, format!("{:?}", e)))?;

    let status_text: String = row.get(4)?;
    let status = BatchStatus::parse(&status_text).ok_or_else(|| {
        conversion_error(4, Type::Text, format!("unknown batch status {:?}", status_text))
    })?;

    Ok(Batch {
        batch_id: BatchId::from_bytes(fixed(row, 0)?),
        user: Address::from_bytes(fixed(row, 1)?),
        root_hash: ContentHash::from_bytes(fixed(row, 2)?),
        leaf_hashes,
        status,
        ledger_tx_ref: fixed_opt(row, 5)?.map(TxHash::from_bytes),
        gas_used: row.get::<_, Option<i64>>(6)?.map(|g| g as u64),
        block_number: row.get::<_, Option<i64>>(7)?.map(|b| b as u64),
        attempts: row.get::<_, i64>(8)? as u32,
        last_error: row.get(9)?,
        created_at: row.get(10)?,
        confirmed_at: row.get(11)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserAggregate> {
    Ok(UserAggregate {
        address: Address::from_bytes(fixed(row, 0)?),
        total_memories: row.get::<_, i64>(1)? as u64,
        total_gas_deposited: amount(row, 2)?,
        total_gas_withdrawn: amount(row, 3)?,
        current_gas_balance: amount(row, 4)?,
        first_memory_at: row.get(5)?,
        last_memory_at: row.get(6)?,
    })
}

fn query_batches(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Batch>> {
    let sql = format!("SELECT {} FROM batches b {}", BATCH_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let batches = stmt
        .query_map(params, row_to_batch)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(batches)
}

#[async_trait]
impl BatchStore for SqliteStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<InsertResult> {
        let batch = batch.clone();
        let leaves_cbor = encode_leaves(&batch.leaf_hashes)?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM batches WHERE batch_id = ?1)",
                params![batch.batch_id.0.as_slice()],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(InsertResult::AlreadyExists);
            }

            tx.execute(
                "INSERT INTO batches (
                    batch_id, user, root_hash, leaf_hashes, leaf_count, status,
                    ledger_tx_ref, gas_used, block_number, attempts, last_error,
                    created_at, confirmed_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    batch.batch_id.0.as_slice(),
                    batch.user.0.as_slice(),
                    batch.root_hash.0.as_slice(),
                    leaves_cbor,
                    batch.leaf_count() as i64,
                    batch.status.as_str(),
                    batch.ledger_tx_ref.as_ref().map(|t| t.0.to_vec()),
                    batch.gas_used.map(|g| g as i64),
                    batch.block_number.map(|b| b as i64),
                    batch.attempts as i64,
                    batch.last_error,
                    batch.created_at,
                    batch.confirmed_at,
                    now_millis(),
                ],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO batch_leaves (batch_id, position, leaf_hash) VALUES (?1, ?2, ?3)",
                )?;
                for (position, leaf) in batch.leaf_hashes.iter().enumerate() {
                    stmt.execute(params![
                        batch.batch_id.0.as_slice(),
                        position as i64,
                        leaf.0.as_slice()
                    ])?;
                }
            }

            tx.commit()?;
            tracing::debug!(batch = %batch.batch_id, leaves = batch.leaf_count(), "batch stored");
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn update_batch(&self, batch: &Batch) -> Result<()> {
        let batch = batch.clone();

        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE batches SET
                    status = ?2, ledger_tx_ref = ?3, gas_used = ?4, block_number = ?5,
                    attempts = ?6, last_error = ?7, confirmed_at = ?8, updated_at = ?9
                 WHERE batch_id = ?1",
                params![
                    batch.batch_id.0.as_slice(),
                    batch.status.as_str(),
                    batch.ledger_tx_ref.as_ref().map(|t| t.0.to_vec()),
                    batch.gas_used.map(|g| g as i64),
                    batch.block_number.map(|b| b as i64),
                    batch.attempts as i64,
                    batch.last_error,
                    batch.confirmed_at,
                    now_millis(),
                ],
            )?;

            if changed == 0 {
                return Err(StoreError::NotFound(format!("batch {}", batch.batch_id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_batch(&self, id: &BatchId) -> Result<Option<Batch>> {
        let id = *id;

        self.blocking(move |conn| {
            let sql = format!("SELECT {} FROM batches b WHERE b.batch_id = ?1", BATCH_COLUMNS);
            conn.query_row(&sql, params![id.0.as_slice()], row_to_batch)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn get_batch_by_root(&self, root: &ContentHash) -> Result<Option<Batch>> {
        let root = *root;

        self.blocking(move |conn| {
            let sql = format!(
                "SELECT {} FROM batches b WHERE b.root_hash = ?1
                 ORDER BY (b.status = 'confirmed') DESC, b.created_at DESC, b.rowid DESC
                 LIMIT 1",
                BATCH_COLUMNS
            );
            conn.query_row(&sql, params![root.0.as_slice()], row_to_batch)
                .optional()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn batches_for_user(&self, user: &Address) -> Result<Vec<Batch>> {
        let user = *user;

        self.blocking(move |conn| {
            query_batches(
                conn,
                "WHERE b.user = ?1 ORDER BY b.created_at, b.rowid",
                params![user.0.as_slice()],
            )
        })
        .await
    }

    async fn batches_with_status(&self, status: BatchStatus) -> Result<Vec<Batch>> {
        self.blocking(move |conn| {
            query_batches(
                conn,
                "WHERE b.status = ?1 ORDER BY b.created_at, b.rowid",
                params![status.as_str()],
            )
        })
        .await
    }

    async fn batches_containing(&self, leaf: &ContentHash) -> Result<Vec<Batch>> {
        let leaf = *leaf;

        self.blocking(move |conn| {
            query_batches(
                conn,
                "WHERE b.batch_id IN (SELECT batch_id FROM batch_leaves WHERE leaf_hash = ?1)
                 ORDER BY b.created_at, b.rowid",
                params![leaf.0.as_slice()],
            )
        })
        .await
    }

    async fn is_leaf_confirmed(&self, leaf: &ContentHash) -> Result<bool> {
        let leaf = *leaf;

        self.blocking(move |conn| {
            let confirmed: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM batch_leaves l JOIN batches b ON b.batch_id = l.batch_id
                    WHERE l.leaf_hash = ?1 AND b.status = 'confirmed'
                 )",
                params![leaf.0.as_slice()],
                |row| row.get(0),
            )?;
            Ok(confirmed)
        })
        .await
    }
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn get_user(&self, address: &Address) -> Result<Option<UserAggregate>> {
        let address = *address;

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT address, total_memories, total_gas_deposited, total_gas_withdrawn,
                        current_gas_balance, first_memory_at, last_memory_at
                 FROM user_aggregates WHERE address = ?1",
                params![address.0.as_slice()],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_relayer(&self, address: &Address) -> Result<Option<RelayerAggregate>> {
        let address = *address;

        self.blocking(move |conn| {
            conn.query_row(
                "SELECT authorized FROM relayer_aggregates WHERE address = ?1",
                params![address.0.as_slice()],
                |row| {
                    Ok(RelayerAggregate {
                        address,
                        authorized: row.get(0)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_system(&self) -> Result<SystemAggregate> {
        self.blocking(|conn| {
            let system = conn
                .query_row(
                    "SELECT total_memories, total_gas_deposited, total_gas_withdrawn,
                            total_users, total_relayers, last_updated
                     FROM system_aggregate WHERE id = 1",
                    [],
                    |row| {
                        Ok(SystemAggregate {
                            total_memories: row.get::<_, i64>(0)? as u64,
                            total_gas_deposited: amount(row, 1)?,
                            total_gas_withdrawn: amount(row, 2)?,
                            total_users: row.get::<_, i64>(3)? as u64,
                            total_relayers: row.get::<_, i64>(4)? as u64,
                            last_updated: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(system.unwrap_or_default())
        })
        .await
    }

    async fn is_applied(&self, key: &EventKey) -> Result<bool> {
        let key = *key;

        self.blocking(move |conn| {
            let applied: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM applied_events WHERE block_number = ?1 AND log_index = ?2)",
                params![key.block_number as i64, key.log_index as i64],
                |row| row.get(0),
            )?;
            Ok(applied)
        })
        .await
    }

    async fn high_water_mark(&self) -> Result<Option<EventKey>> {
        self.blocking(|conn| {
            conn.query_row(
                "SELECT block_number, log_index FROM applied_events
                 ORDER BY block_number DESC, log_index DESC LIMIT 1",
                [],
                |row| {
                    Ok(EventKey::new(
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u32,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn recent_applied_keys(&self, limit: usize) -> Result<Vec<EventKey>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT block_number, log_index FROM applied_events
                 ORDER BY block_number DESC, log_index DESC LIMIT ?1",
            )?;
            let mut keys = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(EventKey::new(
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u32,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            keys.reverse();
            Ok(keys)
        })
        .await
    }

    async fn apply_transition(&self, transition: &AggregateTransition) -> Result<InsertResult> {
        let transition = transition.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let key = transition.key;

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO applied_events (block_number, log_index, applied_at)
                 VALUES (?1, ?2, ?3)",
                params![key.block_number as i64, key.log_index as i64, now_millis()],
            )?;
            if inserted == 0 {
                return Ok(InsertResult::AlreadyExists);
            }

            if let Some(user) = &transition.user {
                tx.execute(
                    "INSERT OR REPLACE INTO user_aggregates (
                        address, total_memories, total_gas_deposited, total_gas_withdrawn,
                        current_gas_balance, first_memory_at, last_memory_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        user.address.0.as_slice(),
                        user.total_memories as i64,
                        user.total_gas_deposited.to_string(),
                        user.total_gas_withdrawn.to_string(),
                        user.current_gas_balance.to_string(),
                        user.first_memory_at,
                        user.last_memory_at,
                    ],
                )?;
            }

            if let Some(relayer) = &transition.relayer {
                tx.execute(
                    "INSERT OR REPLACE INTO relayer_aggregates (address, authorized) VALUES (?1, ?2)",
                    params![relayer.address.0.as_slice(), relayer.authorized],
                )?;
            }

            let system = &transition.system;
            tx.execute(
                "INSERT OR REPLACE INTO system_aggregate (
                    id, total_memories, total_gas_deposited, total_gas_withdrawn,
                    total_users, total_relayers, last_updated
                ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    system.total_memories as i64,
                    system.total_gas_deposited.to_string(),
                    system.total_gas_withdrawn.to_string(),
                    system.total_users as i64,
                    system.total_relayers as i64,
                    system.last_updated,
                ],
            )?;

            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_batch(labels: &[&str], created_at: i64) -> Batch {
        let leaves = labels
            .iter()
            .map(|l| ContentHash::hash(l.as_bytes()))
            .collect();
        Batch::new(Address::from_bytes([0x11; 20]), leaves, created_at).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get_batch() {
        let store = SqliteStore::open_memory().unwrap();
        let batch = make_batch(&["one", "two", "three"], 1000);

        let result = store.insert_batch(&batch).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        let retrieved = store.get_batch(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(retrieved, batch);
        assert_eq!(retrieved.leaf_hashes, batch.leaf_hashes);
    }

    #[tokio::test]
    async fn test_idempotent_insert() {
        let store = SqliteStore::open_memory().unwrap();
        let batch = make_batch(&["a"], 1000);

        assert_eq!(store.insert_batch(&batch).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_batch(&batch).await.unwrap(),
            InsertResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_update_and_confirm() {
        let store = SqliteStore::open_memory().unwrap();
        let mut batch = make_batch(&["a", "b"], 1000);
        store.insert_batch(&batch).await.unwrap();

        let leaf = ContentHash::hash(b"a");
        assert!(!store.is_leaf_confirmed(&leaf).await.unwrap());

        batch.begin_submission().unwrap();
        batch.attempts = 2;
        batch
            .confirm(TxHash::from_bytes([0xcc; 32]), 42_000, 17, 1500)
            .unwrap();
        store.update_batch(&batch).await.unwrap();

        let retrieved = store.get_batch(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, BatchStatus::Confirmed);
        assert_eq!(retrieved.gas_used, Some(42_000));
        assert_eq!(retrieved.block_number, Some(17));
        assert_eq!(retrieved.attempts, 2);
        assert!(store.is_leaf_confirmed(&leaf).await.unwrap());

        let by_root = store.get_batch_by_root(&batch.root_hash).await.unwrap().unwrap();
        assert_eq!(by_root.batch_id, batch.batch_id);

        let confirmed = store.batches_with_status(BatchStatus::Confirmed).await.unwrap();
        assert_eq!(confirmed.len(), 1);
    }

    #[tokio::test]
    async fn test_batches_containing_and_for_user() {
        let store = SqliteStore::open_memory().unwrap();
        let first = make_batch(&["a", "b"], 1000);
        let second = make_batch(&["b", "c"], 2000);
        store.insert_batch(&first).await.unwrap();
        store.insert_batch(&second).await.unwrap();

        let with_b = store
            .batches_containing(&ContentHash::hash(b"b"))
            .await
            .unwrap();
        assert_eq!(
            with_b.iter().map(|b| b.batch_id).collect::<Vec<_>>(),
            vec![first.batch_id, second.batch_id]
        );

        let mine = store.batches_for_user(&first.user).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(store
            .batches_for_user(&Address::ZERO)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_apply_transition_atomic_and_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        let user = Address::from_bytes([0x22; 20]);
        let relayer = Address::from_bytes([0x33; 20]);

        let mut agg = UserAggregate::new(user);
        agg.total_gas_deposited = u128::from(u64::MAX) * 4;
        agg.current_gas_balance = agg.total_gas_deposited;

        let transition = AggregateTransition {
            key: EventKey::new(9, 1),
            user: Some(agg.clone()),
            relayer: Some(RelayerAggregate {
                address: relayer,
                authorized: true,
            }),
            system: SystemAggregate {
                total_gas_deposited: agg.total_gas_deposited,
                total_relayers: 1,
                last_updated: 77,
                ..Default::default()
            },
        };

        assert_eq!(
            store.apply_transition(&transition).await.unwrap(),
            InsertResult::Inserted
        );

        // Replaying with different rows must not overwrite anything
        let mut replay = transition.clone();
        replay.system.total_relayers = 99;
        assert_eq!(
            store.apply_transition(&replay).await.unwrap(),
            InsertResult::AlreadyExists
        );

        assert_eq!(store.get_user(&user).await.unwrap(), Some(agg));
        assert!(store.get_relayer(&relayer).await.unwrap().unwrap().authorized);
        let system = store.get_system().await.unwrap();
        assert_eq!(system.total_relayers, 1);
        assert_eq!(system.last_updated, 77);
        assert_eq!(
            store.high_water_mark().await.unwrap(),
            Some(EventKey::new(9, 1))
        );
    }

    #[tokio::test]
    async fn test_empty_aggregates() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.get_system().await.unwrap(), SystemAggregate::default());
        assert_eq!(store.high_water_mark().await.unwrap(), None);
        assert!(store.recent_applied_keys(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memproof.db");
        let batch = make_batch(&["durable"], 1000);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_batch(&batch).await.unwrap();
            store
                .apply_transition(&AggregateTransition {
                    key: EventKey::new(1, 0),
                    user: None,
                    relayer: None,
                    system: SystemAggregate::default(),
                })
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let retrieved = store.get_batch(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(retrieved.leaf_hashes, batch.leaf_hashes);
        assert!(store.is_applied(&EventKey::new(1, 0)).await.unwrap());
    }
}

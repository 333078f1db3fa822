//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: batch log.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Batches: one row per formed batch, including failed attempts
        CREATE TABLE batches (
            batch_id BLOB PRIMARY KEY,        -- 32 bytes
            user BLOB NOT NULL,               -- 20 bytes
            root_hash BLOB NOT NULL,          -- 32 bytes, SHA-256 Merkle root
            leaf_hashes BLOB NOT NULL,        -- CBOR array, leaf order as committed
            leaf_count INTEGER NOT NULL,
            status TEXT NOT NULL,             -- pending|submitting|confirmed|failed
            ledger_tx_ref BLOB,               -- 32 bytes, nullable
            gas_used INTEGER,
            block_number INTEGER,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,      -- Unix ms
            confirmed_at INTEGER,
            updated_at INTEGER NOT NULL
        );

        -- Leaf membership index for status and proof lookups
        CREATE TABLE batch_leaves (
            batch_id BLOB NOT NULL,
            position INTEGER NOT NULL,
            leaf_hash BLOB NOT NULL,
            PRIMARY KEY (batch_id, position)
        );

        CREATE INDEX idx_batches_root ON batches(root_hash);
        CREATE INDEX idx_batches_user ON batches(user, created_at);
        CREATE INDEX idx_batches_status ON batches(status);
        CREATE INDEX idx_batch_leaves_hash ON batch_leaves(leaf_hash);
        "#,
    )?;

    Ok(())
}

/// Migration v2: materialized aggregates and applied event keys.
///
/// Gas amounts are stored as decimal TEXT since they exceed i64.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE user_aggregates (
            address BLOB PRIMARY KEY,         -- 20 bytes
            total_memories INTEGER NOT NULL,
            total_gas_deposited TEXT NOT NULL,
            total_gas_withdrawn TEXT NOT NULL,
            current_gas_balance TEXT NOT NULL,
            first_memory_at INTEGER,
            last_memory_at INTEGER
        );

        CREATE TABLE relayer_aggregates (
            address BLOB PRIMARY KEY,
            authorized INTEGER NOT NULL
        );

        -- Single row, id = 1
        CREATE TABLE system_aggregate (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            total_memories INTEGER NOT NULL,
            total_gas_deposited TEXT NOT NULL,
            total_gas_withdrawn TEXT NOT NULL,
            total_users INTEGER NOT NULL,
            total_relayers INTEGER NOT NULL,
            last_updated INTEGER NOT NULL
        );

        -- Idempotency keys of every applied ledger event
        CREATE TABLE applied_events (
            block_number INTEGER NOT NULL,
            log_index INTEGER NOT NULL,
            applied_at INTEGER NOT NULL,
            PRIMARY KEY (block_number, log_index)
        );
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

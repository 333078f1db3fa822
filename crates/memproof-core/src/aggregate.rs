//! Materialized aggregates derived from the ledger event log.
//!
//! These are plain records. Only the aggregator in `memproof-aggregate`
//! mutates them, one event at a time.

use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Per-user statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub address: Address,
    pub total_memories: u64,
    pub total_gas_deposited: u128,
    pub total_gas_withdrawn: u128,
    pub current_gas_balance: u128,
    pub first_memory_at: Option<i64>,
    pub last_memory_at: Option<i64>,
}

impl UserAggregate {
    /// A fresh aggregate with all counters at zero.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            total_memories: 0,
            total_gas_deposited: 0,
            total_gas_withdrawn: 0,
            current_gas_balance: 0,
            first_memory_at: None,
            last_memory_at: None,
        }
    }
}

/// Relayer authorization state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerAggregate {
    pub address: Address,
    pub authorized: bool,
}

/// System-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAggregate {
    pub total_memories: u64,
    pub total_gas_deposited: u128,
    pub total_gas_withdrawn: u128,
    pub total_users: u64,
    /// Relayers currently authorized.
    pub total_relayers: u64,
    /// Block timestamp of the last applied event, in milliseconds.
    pub last_updated: i64,
}

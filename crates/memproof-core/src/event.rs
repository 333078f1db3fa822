//! Ledger events.
//!
//! Events are immutable facts read from the ledger's log. Each carries a
//! globally unique, strictly increasing [`EventKey`] that doubles as its
//! idempotency key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::ContentHash;
use crate::types::{Address, TxHash};

/// Position of an event in the ledger log: `(block_number, log_index)`.
///
/// Ordering is lexicographic, block first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u32,
}

impl EventKey {
    pub const fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// The key before any real event.
    pub const GENESIS: Self = Self::new(0, 0);
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Event payload, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    /// A single memory hash was committed.
    MemoryStored {
        user: Address,
        hash: ContentHash,
        timestamp: i64,
    },

    /// A batch root covering `count` memories was committed.
    BatchStored {
        user: Address,
        merkle_root: ContentHash,
        count: u64,
        timestamp: i64,
    },

    GasDeposited { user: Address, amount: u128 },

    /// Gas consumed on the user's behalf by a relayed submission.
    GasDeducted { user: Address, amount: u128 },

    GasWithdrawn { user: Address, amount: u128 },

    RelayerAuthorizationChanged { relayer: Address, authorized: bool },
}

impl LedgerEventKind {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MemoryStored { .. } => "memory_stored",
            Self::BatchStored { .. } => "batch_stored",
            Self::GasDeposited { .. } => "gas_deposited",
            Self::GasDeducted { .. } => "gas_deducted",
            Self::GasWithdrawn { .. } => "gas_withdrawn",
            Self::RelayerAuthorizationChanged { .. } => "relayer_authorization_changed",
        }
    }

    /// The user aggregate this event touches, if any.
    pub fn user(&self) -> Option<Address> {
        match self {
            Self::MemoryStored { user, .. }
            | Self::BatchStored { user, .. }
            | Self::GasDeposited { user, .. }
            | Self::GasDeducted { user, .. }
            | Self::GasWithdrawn { user, .. } => Some(*user),
            Self::RelayerAuthorizationChanged { .. } => None,
        }
    }
}

/// An event as observed in the ledger log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub block_number: u64,
    pub log_index: u32,
    /// Milliseconds since the Unix epoch.
    pub block_timestamp: i64,
    pub tx_hash: TxHash,
    pub kind: LedgerEventKind,
}

impl LedgerEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.block_number, self.log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        assert!(EventKey::new(1, 5) < EventKey::new(2, 0));
        assert!(EventKey::new(2, 0) < EventKey::new(2, 1));
        assert!(EventKey::GENESIS < EventKey::new(0, 1));
        assert_eq!(EventKey::new(7, 3).to_string(), "7:3");
    }

    #[test]
    fn test_event_json_names_variant() {
        let event = LedgerEvent {
            block_number: 10,
            log_index: 2,
            block_timestamp: 1_000,
            tx_hash: TxHash::from_bytes([0; 32]),
            kind: LedgerEventKind::RelayerAuthorizationChanged {
                relayer: Address::from_bytes([3; 20]),
                authorized: true,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json["kind"]["relayer_authorization_changed"]["authorized"],
            true
        );

        let back: LedgerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.key(), EventKey::new(10, 2));
    }

    #[test]
    fn test_user_extraction() {
        let user = Address::from_bytes([9; 20]);
        let kind = LedgerEventKind::GasDeposited { user, amount: 5 };
        assert_eq!(kind.user(), Some(user));
        assert_eq!(kind.name(), "gas_deposited");

        let relayer = LedgerEventKind::RelayerAuthorizationChanged {
            relayer: user,
            authorized: false,
        };
        assert_eq!(relayer.user(), None);
    }
}

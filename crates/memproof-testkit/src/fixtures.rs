//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use memproof_core::{
    compute_root, hash_memory, Address, ContentHash, EventKey, Keypair, LedgerEvent,
    LedgerEventKind, TxHash,
};
use memproof_ledger::{MemoryLedger, MemoryLedgerConfig};
use memproof_store::MemoryStore;

/// A relayer key with an in-memory store and ledger.
pub struct TestFixture {
    pub relayer: Keypair,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MemoryLedger>,
}

impl TestFixture {
    /// Create a new test fixture with a random relayer key.
    pub fn new() -> Self {
        Self::with_keypair(Keypair::generate(), MemoryLedgerConfig::default())
    }

    /// Create with a deterministic relayer key from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self::with_keypair(Keypair::from_seed(&seed), MemoryLedgerConfig::default())
    }

    pub fn with_keypair(relayer: Keypair, ledger: MemoryLedgerConfig) -> Self {
        Self {
            relayer,
            store: Arc::new(MemoryStore::new()),
            ledger: Arc::new(MemoryLedger::new(ledger)),
        }
    }

    pub fn relayer_address(&self) -> Address {
        Address::from_public_key(&self.relayer.public_key())
    }

    /// Authorize the relayer on the ledger.
    pub async fn authorize(&self) {
        self.ledger.set_authorized(self.relayer_address(), true).await;
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A deterministic user address.
pub fn user(n: u8) -> Address {
    Address::from_bytes([n; 20])
}

/// `count` random alphanumeric memories.
pub fn random_memories(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let len = rng.gen_range(8..48);
            (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect()
        })
        .collect()
}

/// Builds an ordered event log by hand.
///
/// Events land in the current block with increasing log indexes until
/// [`next_block`](Self::next_block) is called.
pub struct EventLog {
    next: EventKey,
    events: Vec<LedgerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            next: EventKey::new(1, 0),
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<LedgerEvent> {
        self.events
    }

    /// Close the current block.
    pub fn next_block(&mut self) -> &mut Self {
        self.next = EventKey::new(self.next.block_number + 1, 0);
        self
    }

    pub fn memory_stored(&mut self, user: Address, text: &str) -> LedgerEvent {
        let timestamp = self.timestamp();
        self.push(LedgerEventKind::MemoryStored {
            user,
            hash: hash_memory(text),
            timestamp,
        })
    }

    pub fn batch_stored(&mut self, user: Address, memories: &[&str]) -> LedgerEvent {
        let leaves: Vec<_> = memories.iter().map(|m| hash_memory(m)).collect();
        let merkle_root = compute_root(&leaves).unwrap_or(ContentHash::ZERO);
        let timestamp = self.timestamp();
        self.push(LedgerEventKind::BatchStored {
            user,
            merkle_root,
            count: leaves.len() as u64,
            timestamp,
        })
    }

    pub fn deposit(&mut self, user: Address, amount: u128) -> LedgerEvent {
        self.push(LedgerEventKind::GasDeposited { user, amount })
    }

    pub fn deduct(&mut self, user: Address, amount: u128) -> LedgerEvent {
        self.push(LedgerEventKind::GasDeducted { user, amount })
    }

    pub fn withdraw(&mut self, user: Address, amount: u128) -> LedgerEvent {
        self.push(LedgerEventKind::GasWithdrawn { user, amount })
    }

    pub fn authorize(&mut self, relayer: Address, authorized: bool) -> LedgerEvent {
        self.push(LedgerEventKind::RelayerAuthorizationChanged {
            relayer,
            authorized,
        })
    }

    fn timestamp(&self) -> i64 {
        1_700_000_000_000 + self.next.block_number as i64 * 12_000
    }

    fn push(&mut self, kind: LedgerEventKind) -> LedgerEvent {
        let key = self.next;
        let mut tx = [0u8; 32];
        tx[..8].copy_from_slice(&key.block_number.to_be_bytes());
        tx[8..12].copy_from_slice(&key.log_index.to_be_bytes());
        let event = LedgerEvent {
            block_number: key.block_number,
            log_index: key.log_index,
            block_timestamp: self.timestamp(),
            tx_hash: TxHash::from_bytes(tx),
            kind,
        };
        self.next = EventKey::new(key.block_number, key.log_index + 1);
        self.events.push(event.clone());
        event
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

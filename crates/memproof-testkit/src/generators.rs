//! Proptest generators for property-based testing.

use proptest::prelude::*;

use memproof_core::{
    Address, ContentHash, EventKey, Keypair, LedgerEvent, LedgerEventKind, TxHash,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random content hash.
pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    any::<[u8; 32]>().prop_map(ContentHash::from_bytes)
}

/// Generate an address from a small pool, so events collide on users.
pub fn address(pool: u8) -> impl Strategy<Value = Address> + Clone {
    (0..pool.max(1)).prop_map(|b| Address::from_bytes([b; 20]))
}

/// Generate free-form memory text, including case and whitespace noise.
pub fn memory_text() -> impl Strategy<Value = String> {
    "[ \t]{0,2}[A-Za-z0-9]{1,12}([ \t\n]{1,3}[A-Za-z0-9]{1,12}){0,5}[ \t]{0,2}"
        .prop_map(String::from)
}

/// Generate a non-empty list of leaf hashes.
pub fn leaf_hashes(max: usize) -> impl Strategy<Value = Vec<ContentHash>> {
    prop::collection::vec(content_hash(), 1..=max.max(1))
}

/// Generate leaves together with a valid index into them.
pub fn leaves_with_index(max: usize) -> impl Strategy<Value = (Vec<ContentHash>, usize)> {
    leaf_hashes(max).prop_flat_map(|leaves| {
        let len = leaves.len();
        (Just(leaves), 0..len)
    })
}

/// Generate one event payload for users and relayers drawn from small pools.
pub fn event_kind() -> impl Strategy<Value = LedgerEventKind> {
    let user = address(4);
    let relayer = address(3).prop_map(|a| Address::from_bytes([a.0[0] + 0x80; 20]));
    prop_oneof![
        (user.clone(), content_hash(), 0i64..1_000_000).prop_map(|(user, hash, timestamp)| {
            LedgerEventKind::MemoryStored {
                user,
                hash,
                timestamp,
            }
        }),
        (user.clone(), content_hash(), 1u64..64, 0i64..1_000_000).prop_map(
            |(user, merkle_root, count, timestamp)| LedgerEventKind::BatchStored {
                user,
                merkle_root,
                count,
                timestamp,
            }
        ),
        (user.clone(), 0u128..10_000)
            .prop_map(|(user, amount)| LedgerEventKind::GasDeposited { user, amount }),
        (user.clone(), 0u128..10_000)
            .prop_map(|(user, amount)| LedgerEventKind::GasDeducted { user, amount }),
        (user, 0u128..10_000)
            .prop_map(|(user, amount)| LedgerEventKind::GasWithdrawn { user, amount }),
        (relayer, any::<bool>()).prop_map(|(relayer, authorized)| {
            LedgerEventKind::RelayerAuthorizationChanged {
                relayer,
                authorized,
            }
        }),
    ]
}

/// Generate a strictly ordered event log of up to `max` events.
pub fn event_log(max: usize) -> impl Strategy<Value = Vec<LedgerEvent>> {
    prop::collection::vec((event_kind(), 0u32..3), 0..=max).prop_map(|entries| {
        let mut key = EventKey::new(1, 0);
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (kind, block_gap))| {
                key = if block_gap == 0 && i > 0 {
                    EventKey::new(key.block_number, key.log_index + 1)
                } else {
                    EventKey::new(key.block_number + u64::from(block_gap), 0)
                };
                LedgerEvent {
                    block_number: key.block_number,
                    log_index: key.log_index,
                    block_timestamp: key.block_number as i64 * 12_000,
                    tx_hash: TxHash::from_bytes([i as u8; 32]),
                    kind,
                }
            })
            .collect()
    })
}

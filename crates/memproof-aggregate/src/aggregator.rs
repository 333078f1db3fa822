//! Aggregate state transitions.
//!
//! Every ledger event maps to exactly one [`AggregateTransition`], computed
//! from the current snapshot of the aggregates it touches. The transition is
//! persisted atomically together with the event key, so re-delivery of an
//! applied event changes nothing.

use std::sync::Arc;

use memproof_core::{
    Address, EventKey, LedgerEvent, LedgerEventKind, RelayerAggregate, SystemAggregate,
    UserAggregate,
};
use memproof_store::{AggregateStore, AggregateTransition, InsertResult};

use crate::error::Result;

/// The aggregate rows an event reads before it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub user: Option<UserAggregate>,
    pub relayer: Option<RelayerAggregate>,
    pub system: SystemAggregate,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event changed the aggregates.
    Applied,
    /// The event key was already applied; nothing changed.
    Duplicate,
}

/// Compute the transition an event causes on `snapshot`.
///
/// Pure: the same event on the same snapshot always yields the same rows.
pub fn plan(event: &LedgerEvent, snapshot: Snapshot) -> AggregateTransition {
    let Snapshot {
        user,
        relayer,
        mut system,
    } = snapshot;
    let key = event.key();
    system.last_updated = event.block_timestamp;

    let is_new_user = user.is_none();
    let user_row = |address: Address| user.clone().unwrap_or_else(|| UserAggregate::new(address));

    let (user, relayer) = match &event.kind {
        LedgerEventKind::MemoryStored {
            user, timestamp, ..
        } => {
            let row = record_memories(user_row(*user), &mut system, is_new_user, 1, *timestamp);
            (Some(row), None)
        }

        LedgerEventKind::BatchStored {
            user,
            count,
            timestamp,
            ..
        } => {
            let row = record_memories(user_row(*user), &mut system, is_new_user, *count, *timestamp);
            (Some(row), None)
        }

        LedgerEventKind::GasDeposited { user, amount } => {
            let mut row = user_row(*user);
            row.total_gas_deposited = row.total_gas_deposited.saturating_add(*amount);
            row.current_gas_balance = row.current_gas_balance.saturating_add(*amount);
            system.total_gas_deposited = system.total_gas_deposited.saturating_add(*amount);
            (Some(row), None)
        }

        // Deductions are internal accounting: no system total moves.
        LedgerEventKind::GasDeducted { user, amount } => {
            let mut row = user_row(*user);
            row.current_gas_balance = debit(&row, *amount, key);
            (Some(row), None)
        }

        LedgerEventKind::GasWithdrawn { user, amount } => {
            let mut row = user_row(*user);
            row.current_gas_balance = debit(&row, *amount, key);
            row.total_gas_withdrawn = row.total_gas_withdrawn.saturating_add(*amount);
            system.total_gas_withdrawn = system.total_gas_withdrawn.saturating_add(*amount);
            (Some(row), None)
        }

        LedgerEventKind::RelayerAuthorizationChanged {
            relayer: address,
            authorized,
        } => {
            let was_authorized = relayer.as_ref().map_or(false, |r| r.authorized);
            match (was_authorized, *authorized) {
                (false, true) => system.total_relayers = system.total_relayers.saturating_add(1),
                (true, false) => system.total_relayers = system.total_relayers.saturating_sub(1),
                _ => {}
            }
            let row = RelayerAggregate {
                address: *address,
                authorized: *authorized,
            };
            (None, Some(row))
        }
    };

    AggregateTransition {
        key,
        user,
        relayer,
        system,
    }
}

/// Users are counted when a memory event creates their row. A row created
/// earlier by a gas event is not counted.
fn record_memories(
    mut row: UserAggregate,
    system: &mut SystemAggregate,
    is_new_user: bool,
    count: u64,
    timestamp: i64,
) -> UserAggregate {
    if is_new_user {
        system.total_users = system.total_users.saturating_add(1);
    }
    if row.first_memory_at.is_none() {
        row.first_memory_at = Some(timestamp);
    }
    row.last_memory_at = Some(timestamp);
    row.total_memories = row.total_memories.saturating_add(count);
    system.total_memories = system.total_memories.saturating_add(count);
    row
}

fn debit(row: &UserAggregate, amount: u128, key: EventKey) -> u128 {
    if amount > row.current_gas_balance {
        tracing::warn!(
            user = %row.address,
            event = %key,
            balance = %row.current_gas_balance,
            amount = %amount,
            "gas debit exceeds balance, clamping to zero"
        );
    }
    row.current_gas_balance.saturating_sub(amount)
}

/// The single writer of aggregate state.
///
/// Reads the current snapshot from the store, plans the transition and
/// persists it atomically with the event key.
pub struct Aggregator<S: AggregateStore> {
    store: Arc<S>,
}

impl<S: AggregateStore> Aggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load the rows `event` reads.
    pub async fn snapshot(&self, event: &LedgerEvent) -> Result<Snapshot> {
        let user = match event.kind.user() {
            Some(address) => self.store.get_user(&address).await?,
            None => None,
        };
        let relayer = match &event.kind {
            LedgerEventKind::RelayerAuthorizationChanged { relayer, .. } => {
                self.store.get_relayer(relayer).await?
            }
            _ => None,
        };
        let system = self.store.get_system().await?;
        Ok(Snapshot {
            user,
            relayer,
            system,
        })
    }

    /// Apply one event exactly once.
    pub async fn apply(&self, event: &LedgerEvent) -> Result<ApplyOutcome> {
        let key = event.key();
        if self.store.is_applied(&key).await? {
            tracing::debug!(event = %key, kind = event.kind.name(), "duplicate event ignored");
            return Ok(ApplyOutcome::Duplicate);
        }

        let snapshot = self.snapshot(event).await?;
        let transition = plan(event, snapshot);

        match self.store.apply_transition(&transition).await? {
            InsertResult::Inserted => {
                tracing::debug!(event = %key, kind = event.kind.name(), "event applied");
                Ok(ApplyOutcome::Applied)
            }
            InsertResult::AlreadyExists => Ok(ApplyOutcome::Duplicate),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn user(&self, address: &Address) -> Result<Option<UserAggregate>> {
        Ok(self.store.get_user(address).await?)
    }

    pub async fn relayer(&self, address: &Address) -> Result<Option<RelayerAggregate>> {
        Ok(self.store.get_relayer(address).await?)
    }

    pub async fn system(&self) -> Result<SystemAggregate> {
        Ok(self.store.get_system().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memproof_core::{ContentHash, TxHash};
    use memproof_store::MemoryStore;
    use proptest::prelude::*;

    const USER: Address = Address::from_bytes([0x01; 20]);
    const RELAYER: Address = Address::from_bytes([0x0f; 20]);

    fn event(block: u64, kind: LedgerEventKind) -> LedgerEvent {
        LedgerEvent {
            block_number: block,
            log_index: 0,
            block_timestamp: 1_000 * block as i64,
            tx_hash: TxHash::from_bytes([block as u8; 32]),
            kind,
        }
    }

    fn memory(block: u64, text: &str) -> LedgerEvent {
        event(
            block,
            LedgerEventKind::MemoryStored {
                user: USER,
                hash: ContentHash::hash(text.as_bytes()),
                timestamp: 1_000 * block as i64,
            },
        )
    }

    fn aggregator() -> Aggregator<MemoryStore> {
        Aggregator::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_two_memories_one_user() {
        let agg = aggregator();
        agg.apply(&memory(1, "A")).await.unwrap();
        agg.apply(&memory(2, "B")).await.unwrap();

        let user = agg.user(&USER).await.unwrap().unwrap();
        assert_eq!(user.total_memories, 2);
        assert_eq!(user.first_memory_at, Some(1_000));
        assert_eq!(user.last_memory_at, Some(2_000));

        let system = agg.system().await.unwrap();
        assert_eq!(system.total_memories, 2);
        assert_eq!(system.total_users, 1);
        assert_eq!(system.last_updated, 2_000);
    }

    #[tokio::test]
    async fn test_batch_counts_all_leaves() {
        let agg = aggregator();
        agg.apply(&event(
            1,
            LedgerEventKind::BatchStored {
                user: USER,
                merkle_root: ContentHash::hash(b"root"),
                count: 5,
                timestamp: 1_000,
            },
        ))
        .await
        .unwrap();
        agg.apply(&memory(2, "single")).await.unwrap();

        assert_eq!(agg.user(&USER).await.unwrap().unwrap().total_memories, 6);
        assert_eq!(agg.system().await.unwrap().total_users, 1);
    }

    #[tokio::test]
    async fn test_duplicate_relayer_authorization() {
        let agg = aggregator();
        let authorize = |block| {
            event(
                block,
                LedgerEventKind::RelayerAuthorizationChanged {
                    relayer: RELAYER,
                    authorized: true,
                },
            )
        };

        agg.apply(&authorize(1)).await.unwrap();
        agg.apply(&authorize(2)).await.unwrap();
        assert_eq!(agg.system().await.unwrap().total_relayers, 1);
        assert!(agg.relayer(&RELAYER).await.unwrap().unwrap().authorized);
    }

    #[tokio::test]
    async fn test_relayer_revocation_floors_at_zero() {
        let agg = aggregator();
        let set = |block, authorized| {
            event(
                block,
                LedgerEventKind::RelayerAuthorizationChanged {
                    relayer: RELAYER,
                    authorized,
                },
            )
        };

        // Revoking an unknown relayer is a no-op for the counter
        agg.apply(&set(1, false)).await.unwrap();
        assert_eq!(agg.system().await.unwrap().total_relayers, 0);

        agg.apply(&set(2, true)).await.unwrap();
        agg.apply(&set(3, false)).await.unwrap();
        agg.apply(&set(4, false)).await.unwrap();
        assert_eq!(agg.system().await.unwrap().total_relayers, 0);
        assert!(!agg.relayer(&RELAYER).await.unwrap().unwrap().authorized);
    }

    #[tokio::test]
    async fn test_deposit_then_withdraw() {
        let agg = aggregator();
        agg.apply(&event(
            1,
            LedgerEventKind::GasDeposited {
                user: USER,
                amount: 100,
            },
        ))
        .await
        .unwrap();
        agg.apply(&event(
            2,
            LedgerEventKind::GasWithdrawn {
                user: USER,
                amount: 40,
            },
        ))
        .await
        .unwrap();

        let user = agg.user(&USER).await.unwrap().unwrap();
        assert_eq!(user.current_gas_balance, 60);
        assert_eq!(user.total_gas_withdrawn, 40);
        assert_eq!(user.total_gas_deposited, 100);

        let system = agg.system().await.unwrap();
        assert_eq!(system.total_gas_deposited, 100);
        assert_eq!(system.total_gas_withdrawn, 40);
        // Gas activity alone does not make a user
        assert_eq!(system.total_users, 0);
    }

    #[tokio::test]
    async fn test_user_created_by_deposit_is_not_counted_on_first_memory() {
        let agg = aggregator();
        agg.apply(&event(
            1,
            LedgerEventKind::GasDeposited {
                user: USER,
                amount: 100,
            },
        ))
        .await
        .unwrap();
        agg.apply(&memory(2, "A")).await.unwrap();

        let user = agg.user(&USER).await.unwrap().unwrap();
        assert_eq!(user.total_memories, 1);
        assert_eq!(user.first_memory_at, Some(2_000));
        let system = agg.system().await.unwrap();
        assert_eq!(system.total_memories, 1);
        assert_eq!(system.total_users, 0);
    }

    #[test]
    fn test_plan_memory_counts_saturate() {
        let mut row = UserAggregate::new(USER);
        row.total_memories = u64::MAX - 1;
        row.first_memory_at = Some(0);
        let snapshot = Snapshot {
            user: Some(row),
            system: SystemAggregate {
                total_memories: u64::MAX - 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let transition = plan(
            &event(
                1,
                LedgerEventKind::BatchStored {
                    user: USER,
                    merkle_root: ContentHash::ZERO,
                    count: u64::MAX,
                    timestamp: 1_000,
                },
            ),
            snapshot,
        );
        assert_eq!(transition.user.unwrap().total_memories, u64::MAX);
        assert_eq!(transition.system.total_memories, u64::MAX);
        assert_eq!(transition.system.total_users, 0);
    }

    #[tokio::test]
    async fn test_deduction_touches_balance_only() {
        let agg = aggregator();
        agg.apply(&event(
            1,
            LedgerEventKind::GasDeposited {
                user: USER,
                amount: 100,
            },
        ))
        .await
        .unwrap();
        agg.apply(&event(
            2,
            LedgerEventKind::GasDeducted {
                user: USER,
                amount: 30,
            },
        ))
        .await
        .unwrap();

        let user = agg.user(&USER).await.unwrap().unwrap();
        assert_eq!(user.current_gas_balance, 70);
        assert_eq!(user.total_gas_withdrawn, 0);
        let system = agg.system().await.unwrap();
        assert_eq!(system.total_gas_deposited, 100);
        assert_eq!(system.total_gas_withdrawn, 0);
    }

    #[tokio::test]
    async fn test_same_event_twice_is_noop() {
        let agg = aggregator();
        let e = memory(1, "A");
        assert_eq!(agg.apply(&e).await.unwrap(), ApplyOutcome::Applied);
        let once = (agg.user(&USER).await.unwrap(), agg.system().await.unwrap());

        assert_eq!(agg.apply(&e).await.unwrap(), ApplyOutcome::Duplicate);
        let twice = (agg.user(&USER).await.unwrap(), agg.system().await.unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_plan_overdraw_clamps() {
        let mut row = UserAggregate::new(USER);
        row.current_gas_balance = 10;
        let snapshot = Snapshot {
            user: Some(row),
            ..Default::default()
        };
        let transition = plan(
            &event(
                1,
                LedgerEventKind::GasWithdrawn {
                    user: USER,
                    amount: 25,
                },
            ),
            snapshot,
        );
        let user = transition.user.unwrap();
        assert_eq!(user.current_gas_balance, 0);
        assert_eq!(user.total_gas_withdrawn, 25);
        assert_eq!(transition.key, EventKey::new(1, 0));
    }

    fn arb_kind() -> impl Strategy<Value = LedgerEventKind> {
        let user = (0u8..3).prop_map(|b| Address::from_bytes([b; 20]));
        prop_oneof![
            (user.clone(), 1u64..4).prop_map(|(user, count)| LedgerEventKind::BatchStored {
                user,
                merkle_root: ContentHash::ZERO,
                count,
                timestamp: 0,
            }),
            (user.clone(), 0u128..1_000)
                .prop_map(|(user, amount)| LedgerEventKind::GasDeposited { user, amount }),
            (user, 0u128..1_000)
                .prop_map(|(user, amount)| LedgerEventKind::GasWithdrawn { user, amount }),
            (0u8..3, any::<bool>()).prop_map(|(b, authorized)| {
                LedgerEventKind::RelayerAuthorizationChanged {
                    relayer: Address::from_bytes([0xf0 | b; 20]),
                    authorized,
                }
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_redelivery_matches_single_delivery(
            kinds in prop::collection::vec(arb_kind(), 1..24),
            repeats in prop::collection::vec(0usize..3, 24),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let events: Vec<LedgerEvent> = kinds
                    .into_iter()
                    .enumerate()
                    .map(|(i, kind)| event(i as u64 + 1, kind))
                    .collect();

                let once = aggregator();
                for e in &events {
                    once.apply(e).await.unwrap();
                }

                let many = aggregator();
                for (i, e) in events.iter().enumerate() {
                    for _ in 0..=repeats[i] {
                        many.apply(e).await.unwrap();
                    }
                }

                assert_eq!(once.system().await.unwrap(), many.system().await.unwrap());
                for b in 0u8..3 {
                    let address = Address::from_bytes([b; 20]);
                    assert_eq!(
                        once.user(&address).await.unwrap(),
                        many.user(&address).await.unwrap()
                    );
                }
            });
        }
    }
}

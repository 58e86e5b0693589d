//! Server partition store.
//!
//! One [`ReplicaState`] per user identifier, held in memory. The directory
//! lock is only taken to find or create a partition; the merge itself runs
//! under that partition's own lock, so different users never wait on each
//! other while requests for the same user are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use tasksync_core::{reconcile, MergeReport, ReplicaState, SyncDelta, UserId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

type Partition = Arc<Mutex<ReplicaState>>;

#[derive(Default)]
pub struct PartitionStore {
    partitions: RwLock<HashMap<UserId, Partition>>,
}

impl PartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full snapshot of a partition. Unknown users get an empty delta.
    pub async fn snapshot(&self, user: &UserId) -> SyncDelta {
        let partition = {
            let partitions = self.partitions.read().await;
            partitions.get(user).cloned()
        };

        match partition {
            Some(partition) => partition.lock().await.to_delta(),
            None => {
                debug!("Snapshot requested for unknown partition {}", user);
                SyncDelta::default()
            }
        }
    }

    /// Merge a pushed delta into the user's partition, creating it if needed.
    pub async fn apply_delta(&self, user: &UserId, delta: &SyncDelta) -> MergeReport {
        let partition = self.partition(user).await;
        let mut state = partition.lock().await;
        let report = reconcile(&mut state, delta);

        debug!(
            "Partition {}: {} items, {} tombstones after merge ({} changes)",
            user,
            state.items().count(),
            state.tombstones().count(),
            report.change_count()
        );
        report
    }

    /// Number of partitions created so far.
    pub async fn len(&self) -> usize {
        self.partitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.partitions.read().await.is_empty()
    }

    async fn partition(&self, user: &UserId) -> Partition {
        if let Some(existing) = self.partitions.read().await.get(user) {
            return Arc::clone(existing);
        }

        let mut partitions = self.partitions.write().await;
        Arc::clone(partitions.entry(user.clone()).or_insert_with(|| {
            info!("Creating partition for {}", user);
            Arc::new(Mutex::new(ReplicaState::new()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::{Item, ItemId, Timestamp};

    fn user(name: &str) -> UserId {
        name.parse().unwrap()
    }

    fn delta_of(items: Vec<Item>) -> SyncDelta {
        SyncDelta {
            items,
            ..SyncDelta::default()
        }
    }

    #[tokio::test]
    async fn test_unknown_user_gets_empty_snapshot() {
        let store = PartitionStore::new();
        assert!(store.snapshot(&user("nobody")).await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_apply_then_snapshot() {
        let store = PartitionStore::new();
        let alice = user("alice");
        let item = Item::with_fields("x", "buy milk", false, Timestamp::from_millis(10));

        let report = store.apply_delta(&alice, &delta_of(vec![item.clone()])).await;
        assert_eq!(report.items_adopted, vec![ItemId::from("x")]);

        let snapshot = store.snapshot(&alice).await;
        assert_eq!(snapshot.items, vec![item]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = PartitionStore::new();
        let item = Item::with_fields("x", "secret", false, Timestamp::from_millis(10));
        store.apply_delta(&user("alice"), &delta_of(vec![item])).await;

        assert!(store.snapshot(&user("bob")).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pushes_for_one_user_all_land() {
        let store = Arc::new(PartitionStore::new());
        let alice = user("alice");

        let handles: Vec<_> = (0..32)
            .map(|n| {
                let store = Arc::clone(&store);
                let alice = alice.clone();
                tokio::spawn(async move {
                    let item = Item::with_fields(
                        format!("item-{}", n),
                        format!("task {}", n),
                        false,
                        Timestamp::from_millis(n),
                    );
                    store.apply_delta(&alice, &delta_of(vec![item])).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.snapshot(&alice).await.items.len(), 32);
        assert_eq!(store.len().await, 1);
    }
}

//! Snapshot storage for in-progress workflows.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Stores the latest snapshot of a workflow by its identifier.
///
/// Orchestrators call [`StateStore::put`] after every state transition so
/// progress can be inspected while a workflow runs and after it ends.
#[async_trait]
pub trait StateStore<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Replaces the snapshot stored under `id`.
    async fn put(&self, id: K, state: V);

    /// Returns the latest snapshot stored under `id`.
    async fn get(&self, id: &K) -> Option<V>;
}

/// In-memory state store.
///
/// Snapshots live for the lifetime of the process.
#[derive(Debug)]
pub struct InMemoryStateStore<K, V> {
    states: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Default for InMemoryStateStore<K, V> {
    fn default() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K, V> Clone for InMemoryStateStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}

impl<K, V> InMemoryStateStore<K, V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored snapshots.
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl<K, V> StateStore<K, V> for InMemoryStateStore<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn put(&self, id: K, state: V) {
        self.states.write().await.insert(id, state);
    }

    async fn get(&self, id: &K) -> Option<V> {
        self.states.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_replaces_previous_snapshot() {
        let store: InMemoryStateStore<u32, String> = InMemoryStateStore::new();
        assert!(store.is_empty().await);

        store.put(1, "pending".to_string()).await;
        store.put(1, "completed".to_string()).await;

        assert_eq!(store.get(&1).await.as_deref(), Some("completed"));
        assert_eq!(store.len().await, 1);
        assert!(store.get(&2).await.is_none());
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let store: InMemoryStateStore<u32, u32> = InMemoryStateStore::new();
        let view = store.clone();
        store.put(7, 42).await;
        assert_eq!(view.get(&7).await, Some(42));
    }
}

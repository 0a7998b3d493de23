use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::RwLock;

/// A keyed in-memory read model, shared between the handlers of a projector and its readers.
/// Cloning it yields a handle on the same rows.
pub struct InMemoryReadModel<K, V> {
    rows: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> InMemoryReadModel<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.rows.read().await.get(key).cloned()
    }

    /// Inserts or replaces the row, returning the previous value.
    pub async fn upsert(&self, key: K, value: V) -> Option<V> {
        self.rows.write().await.insert(key, value)
    }

    /// Mutates the row in place. Returns `false` if there is no row for `key`.
    pub async fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.rows.write().await.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.rows.write().await.remove(key)
    }

    pub async fn clear(&self) {
        self.rows.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Copies every row.
    pub async fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
    {
        self.rows.read().await.clone()
    }
}

impl<K, V> Default for InMemoryReadModel<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for InMemoryReadModel<K, V> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::snapshot::{Snapshot, SnapshotStore};
use crate::store::StoreError;
use crate::types::StreamId;

/// In-memory [`SnapshotStore`] keeping only the newest snapshot per stream.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<StreamId, Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every snapshot.
    pub async fn clear(&self) {
        self.snapshots.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(stream_id).cloned())
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;

        match snapshots.get(&snapshot.stream_id) {
            Some(current) if current.version > snapshot.version => {
                tracing::debug!(
                    stream_id = %snapshot.stream_id,
                    version = snapshot.version,
                    current_version = current.version,
                    "discarding stale snapshot"
                );
            }
            _ => {
                let _ = snapshots.insert(snapshot.stream_id.clone(), snapshot);
            }
        }

        Ok(())
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        let _ = self.snapshots.write().await.remove(stream_id);
        Ok(())
    }
}

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::StoreError;
use crate::types::GlobalPosition;

/// Durable progress marker of every projector: the global position of the last event it processed.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the checkpoint of the projector, 0 if it never processed anything.
    async fn load(&self, projector_id: &str) -> Result<GlobalPosition, StoreError>;

    /// Advances the checkpoint of the projector. A checkpoint never moves backwards.
    async fn save(&self, projector_id: &str, position: GlobalPosition) -> Result<(), StoreError>;

    /// Moves the checkpoint back to the beginning of time.
    async fn reset(&self, projector_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S, T> CheckpointStore for T
where
    S: CheckpointStore + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    async fn load(&self, projector_id: &str) -> Result<GlobalPosition, StoreError> {
        self.deref().load(projector_id).await
    }

    async fn save(&self, projector_id: &str, position: GlobalPosition) -> Result<(), StoreError> {
        self.deref().save(projector_id, position).await
    }

    async fn reset(&self, projector_id: &str) -> Result<(), StoreError> {
        self.deref().reset(projector_id).await
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, GlobalPosition>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, projector_id: &str) -> Result<GlobalPosition, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(projector_id)
            .copied()
            .unwrap_or_default())
    }

    async fn save(&self, projector_id: &str, position: GlobalPosition) -> Result<(), StoreError> {
        let mut checkpoints = self.checkpoints.write().await;
        let checkpoint = checkpoints.entry(projector_id.to_string()).or_default();
        *checkpoint = (*checkpoint).max(position);
        Ok(())
    }

    async fn reset(&self, projector_id: &str) -> Result<(), StoreError> {
        let _ = self.checkpoints.write().await.remove(projector_id);
        Ok(())
    }
}

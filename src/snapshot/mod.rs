use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;
use crate::types::{SequenceNumber, StreamId};

pub use memory::InMemorySnapshotStore;
#[cfg(feature = "postgres")]
pub use postgres::PgSnapshotStore;

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

/// Serialized aggregate state as of `version`. Replaying events `1..=version` from scratch always
/// yields the same state, so a snapshot can be dropped at any time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stream_id: StreamId,
    pub version: SequenceNumber,
    pub state: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(stream_id: StreamId, version: SequenceNumber, state: Vec<u8>) -> Self {
        Self {
            stream_id,
            version,
            state,
            taken_at: Utc::now(),
        }
    }
}

/// A SnapshotStore keeps the latest [`Snapshot`] of each stream.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the snapshot with the highest version available for the stream, if any.
    async fn get_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, StoreError>;

    /// Stores the snapshot. A snapshot older than the one already stored for the same stream is
    /// discarded.
    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// Deletes the stored snapshot of the stream, if any.
    async fn delete(&self, stream_id: &StreamId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S, T> SnapshotStore for T
where
    S: SnapshotStore + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    async fn get_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, StoreError> {
        self.deref().get_latest(stream_id).await
    }

    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        self.deref().save(snapshot).await
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        self.deref().delete(stream_id).await
    }
}

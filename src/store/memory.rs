use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::{watch, RwLock};

use crate::event::{NewEvent, RecordedEvent};
use crate::store::{EventStore, ExpectedVersion, StoreError};
use crate::types::{GlobalPosition, SequenceNumber, StreamId};

/// In-memory implementation of the [`EventStore`]. Mostly useful for tests and demos.
///
/// Events live in a single global log; each stream keeps the indexes of its own events in that log.
/// The store is protected by an [`Arc`] that allows it to be cloneable still having the same memory
/// reference.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    head: Arc<watch::Sender<GlobalPosition>>,
}

#[derive(Default)]
struct Inner {
    log: Vec<RecordedEvent>,
    streams: HashMap<StreamId, Vec<usize>>,
}

impl Inner {
    fn version(&self, stream_id: &StreamId) -> SequenceNumber {
        self.streams
            .get(stream_id)
            .map_or(0, |indexes| indexes.len() as SequenceNumber)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            head: Arc::new(head),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    #[tracing::instrument(skip_all, fields(stream_id = %stream_id, expected_version = %expected_version, events = events.len()), err)]
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<SequenceNumber, StoreError> {
        // The write lock is only held to check the version and assign positions.
        let mut inner = self.inner.write().await;
        let current: SequenceNumber = inner.version(stream_id);

        if events.is_empty() {
            return Ok(current);
        }

        expected_version.check(stream_id, current)?;

        let recorded_at: DateTime<Utc> = Utc::now();
        let mut version: SequenceNumber = current;
        let mut indexes: Vec<usize> = Vec::with_capacity(events.len());

        for event in events {
            version += 1;
            let index: usize = inner.log.len();
            inner.log.push(RecordedEvent {
                event_id: event.event_id,
                stream_id: stream_id.clone(),
                sequence_number: version,
                global_position: index as GlobalPosition + 1,
                event_type: event.event_type,
                payload: event.payload,
                recorded_at,
            });
            indexes.push(index);
        }

        inner.streams.entry(stream_id.clone()).or_default().extend(indexes);
        let head: GlobalPosition = inner.log.len() as GlobalPosition;
        drop(inner);

        self.head.send_replace(head);
        tracing::debug!(version, head, "events appended to stream");

        Ok(version)
    }

    fn read<'a>(
        &'a self,
        stream_id: &'a StreamId,
        from_version: SequenceNumber,
        to_version: Option<SequenceNumber>,
    ) -> BoxStream<'a, Result<RecordedEvent, StoreError>> {
        Box::pin(
            stream::once(async move {
                let inner = self.inner.read().await;
                let to_version: SequenceNumber = to_version.unwrap_or(SequenceNumber::MAX);

                let events: Vec<RecordedEvent> = inner
                    .streams
                    .get(stream_id)
                    .map(|indexes| {
                        indexes
                            .iter()
                            .map(|index| &inner.log[*index])
                            .filter(|event| event.sequence_number > from_version && event.sequence_number <= to_version)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                stream::iter(events.into_iter().map(Ok))
            })
            .flatten(),
        )
    }

    fn read_all(&self, from_position: GlobalPosition, limit: usize) -> BoxStream<'_, Result<RecordedEvent, StoreError>> {
        Box::pin(
            stream::once(async move {
                let inner = self.inner.read().await;
                // Positions start at 1, so the event at position `p` lives at index `p - 1`.
                let start: usize = usize::try_from(from_position.max(0)).unwrap_or(usize::MAX);

                let events: Vec<RecordedEvent> = inner.log.iter().skip(start).take(limit).cloned().collect();

                stream::iter(events.into_iter().map(Ok))
            })
            .flatten(),
        )
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<SequenceNumber, StoreError> {
        Ok(self.inner.read().await.version(stream_id))
    }

    async fn head_position(&self) -> Result<GlobalPosition, StoreError> {
        Ok(self.inner.read().await.log.len() as GlobalPosition)
    }

    fn subscribe(&self) -> Option<watch::Receiver<GlobalPosition>> {
        Some(self.head.subscribe())
    }
}

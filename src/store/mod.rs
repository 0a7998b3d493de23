use std::fmt::{Display, Formatter};
use std::ops::Deref;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::watch;

use crate::event::{NewEvent, RecordedEvent};
use crate::types::{GlobalPosition, SequenceNumber, StreamId};

pub use memory::InMemoryStore;

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// The version a writer believes a stream to be at when appending to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check at all.
    Any,
    /// The stream must not contain any event yet. Same as `Exact(0)`.
    NoStream,
    /// The stream must be exactly at this version.
    Exact(SequenceNumber),
}

impl ExpectedVersion {
    /// Checks the stream's `actual` version against this expectation.
    ///
    /// # Errors
    ///
    /// Will return [`StoreError::Concurrency`] if the versions don't match.
    pub fn check(self, stream_id: &StreamId, actual: SequenceNumber) -> Result<(), StoreError> {
        let matches = match self {
            Self::Any => true,
            Self::NoStream => actual == 0,
            Self::Exact(expected) => actual == expected,
        };

        if matches {
            Ok(())
        } else {
            Err(StoreError::Concurrency {
                stream_id: stream_id.clone(),
                expected: self,
                actual,
            })
        }
    }
}

impl Display for ExpectedVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(version) => write!(f, "{}", version),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The stream is not at the version the writer expected. Reload and retry.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, actual version {actual}")]
    Concurrency {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: SequenceNumber,
    },
    /// The underlying storage failed. Retryable with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Returns `true` if the same operation may succeed when retried as is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        Self::Unavailable(Box::new(error))
    }
}

/// An EventStore is an append-only log of immutable events, partitioned in streams. It knows nothing
/// about the domain types stored in it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends all the `events` to the stream as a single atomic batch, with consecutive sequence
    /// numbers. Either all the events are persisted, or none are.
    ///
    /// An empty batch is a no-op returning the current version, with no version check.
    ///
    /// # Errors
    ///
    /// Will return [`StoreError::Concurrency`] if the stream is not at `expected_version`.
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<SequenceNumber, StoreError>;

    /// Lazily reads the events of a stream with `from_version < sequence_number <= to_version`, in
    /// order. An unknown stream yields no events.
    fn read<'a>(
        &'a self,
        stream_id: &'a StreamId,
        from_version: SequenceNumber,
        to_version: Option<SequenceNumber>,
    ) -> BoxStream<'a, Result<RecordedEvent, StoreError>>;

    /// Lazily reads at most `limit` events across all streams with `global_position > from_position`,
    /// in strict global position order.
    fn read_all(&self, from_position: GlobalPosition, limit: usize) -> BoxStream<'_, Result<RecordedEvent, StoreError>>;

    /// Returns the current version of the stream, 0 if empty.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<SequenceNumber, StoreError>;

    /// Returns the global position of the last appended event, 0 if the store is empty.
    async fn head_position(&self) -> Result<GlobalPosition, StoreError>;

    /// Returns a receiver notified with the latest head position after every append, if the store
    /// can push notifications. Readers fall back to polling otherwise.
    fn subscribe(&self) -> Option<watch::Receiver<GlobalPosition>> {
        None
    }
}

/// Blanket implementation making an [`EventStore`] every (smart) pointer to an [`EventStore`],
/// e.g. `&Store`, `Box<Store>`, `Arc<Store>`.
#[async_trait]
impl<S, T> EventStore for T
where
    S: EventStore + ?Sized + 'static,
    T: Deref<Target = S> + Send + Sync,
{
    /// Deref call to [`EventStore::append`].
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<SequenceNumber, StoreError> {
        self.deref().append(stream_id, expected_version, events).await
    }

    /// Deref call to [`EventStore::read`].
    fn read<'a>(
        &'a self,
        stream_id: &'a StreamId,
        from_version: SequenceNumber,
        to_version: Option<SequenceNumber>,
    ) -> BoxStream<'a, Result<RecordedEvent, StoreError>> {
        self.deref().read(stream_id, from_version, to_version)
    }

    /// Deref call to [`EventStore::read_all`].
    fn read_all(&self, from_position: GlobalPosition, limit: usize) -> BoxStream<'_, Result<RecordedEvent, StoreError>> {
        self.deref().read_all(from_position, limit)
    }

    /// Deref call to [`EventStore::stream_version`].
    async fn stream_version(&self, stream_id: &StreamId) -> Result<SequenceNumber, StoreError> {
        self.deref().stream_version(stream_id).await
    }

    /// Deref call to [`EventStore::head_position`].
    async fn head_position(&self) -> Result<GlobalPosition, StoreError> {
        self.deref().head_position().await
    }

    /// Deref call to [`EventStore::subscribe`].
    fn subscribe(&self) -> Option<watch::Receiver<GlobalPosition>> {
        self.deref().subscribe()
    }
}

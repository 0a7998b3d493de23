use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::TryStreamExt;
use tracing::Instrument;

use crate::event::{Event, NewEvent, RecordedEvent};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::store::{EventStore, ExpectedVersion, StoreError};
use crate::types::{SequenceNumber, StreamId};
use crate::{Aggregate, AggregateState};

#[derive(thiserror::Error, Debug)]
pub enum ManagerError<E>
where
    E: std::error::Error + 'static,
{
    /// The stream moved since the aggregate was loaded. Reload, reapply the command and retry.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, actual version {actual}")]
    Concurrency {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: SequenceNumber,
    },
    /// The stream cannot be replayed onto the aggregate. Not retryable.
    #[error("stream {stream_id} is corrupt at sequence number {sequence_number}: {reason}")]
    StreamCorruption {
        stream_id: StreamId,
        sequence_number: SequenceNumber,
        reason: String,
    },
    #[error(transparent)]
    Store(StoreError),
    /// Serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The aggregate rejected the command.
    #[error(transparent)]
    Command(E),
}

impl<E> ManagerError<E>
where
    E: std::error::Error + 'static,
{
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl<E> From<StoreError> for ManagerError<E>
where
    E: std::error::Error + 'static,
{
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Concurrency {
                stream_id,
                expected,
                actual,
            } => Self::Concurrency {
                stream_id,
                expected,
                actual,
            },
            error => Self::Store(error),
        }
    }
}

/// When to take a snapshot after a successful save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotPolicy {
    every: Option<SequenceNumber>,
}

impl SnapshotPolicy {
    /// Never takes snapshots.
    pub const fn never() -> Self {
        Self { every: None }
    }

    /// Takes a snapshot each time a save crosses a multiple of `events`. `0` means never.
    pub const fn every(events: u32) -> Self {
        if events == 0 {
            Self::never()
        } else {
            Self {
                every: Some(events as SequenceNumber),
            }
        }
    }

    /// Returns `true` if going from `from` to `to` crosses an interval boundary.
    pub fn crosses(&self, from: SequenceNumber, to: SequenceNumber) -> bool {
        self.every
            .map_or(false, |every| from.div_euclid(every) != to.div_euclid(every))
    }
}

/// The AggregateManager is responsible for coupling the Aggregate with a Store, so that the events
/// can be persisted when handled, and the state can be reconstructed by loading and apply events sequentially.
///
/// The basic APIs are:
/// 1. load
/// 2. save
/// 3. handle_command
pub struct AggregateManager<A, E>
where
    A: Aggregate,
    E: EventStore,
{
    event_store: E,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    snapshot_policy: SnapshotPolicy,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, E> AggregateManager<A, E>
where
    A: Aggregate,
    E: EventStore,
{
    /// Creates a new instance of an [`AggregateManager`], without snapshots.
    pub fn new(event_store: E) -> Self {
        Self {
            event_store,
            snapshot_store: None,
            snapshot_policy: SnapshotPolicy::never(),
            _aggregate: PhantomData,
        }
    }

    /// Loads aggregates starting from the latest snapshot in `snapshot_store`, and writes new snapshots
    /// according to `policy`.
    pub fn with_snapshots(self, snapshot_store: impl SnapshotStore + 'static, policy: SnapshotPolicy) -> Self {
        Self {
            snapshot_store: Some(Arc::new(snapshot_store)),
            snapshot_policy: policy,
            ..self
        }
    }

    /// Loads an aggregate instance from the latest usable snapshot, if any, then applies the rest of its
    /// events by order of their sequence number. A stream with no events yields a new instance at version 0.
    ///
    /// # Errors
    ///
    /// Will return [`ManagerError::StreamCorruption`] if an event cannot be applied onto the aggregate,
    /// e.g. an event type the aggregate doesn't know, or a gap in the sequence numbers.
    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, aggregate_id = %aggregate_id), err)]
    pub async fn load(&self, aggregate_id: impl Display + Send) -> Result<AggregateState<A>, ManagerError<A::Error>> {
        let id: String = aggregate_id.to_string();
        let stream_id: StreamId = StreamId::for_aggregate::<A>(&id);

        let Some(mut aggregate_state) = self.load_snapshot(&id, &stream_id).await else {
            let mut aggregate_state: AggregateState<A> = AggregateState::new(&id);
            self.replay(&stream_id, &mut aggregate_state).await?;
            return Ok(aggregate_state);
        };

        let snapshot_version: SequenceNumber = aggregate_state.version();
        self.replay(&stream_id, &mut aggregate_state).await?;

        // An empty tail can also mean the snapshot is ahead of the stream, e.g. a stale snapshot
        // store after the event store was restored.
        if aggregate_state.version() == snapshot_version {
            let stream_version: SequenceNumber = self.event_store.stream_version(&stream_id).await?;
            if stream_version < snapshot_version {
                tracing::warn!(
                    %stream_id,
                    snapshot_version,
                    stream_version,
                    "snapshot is ahead of the stream, replaying the full stream"
                );
                aggregate_state = AggregateState::new(&id);
                self.replay(&stream_id, &mut aggregate_state).await?;
            }
        }

        Ok(aggregate_state)
    }

    /// Appends the uncommitted events of `aggregate_state`, expecting the stream to still be at the
    /// version the instance was loaded at.
    ///
    /// Returns a new instance at the new version with no uncommitted events. `aggregate_state` is left
    /// untouched, so on conflict its uncommitted events are still available for a retry. Saving an
    /// instance with no uncommitted events short-circuits, without touching the store.
    ///
    /// # Errors
    ///
    /// Will return [`ManagerError::Concurrency`] if another writer appended to the stream since the
    /// instance was loaded.
    #[tracing::instrument(skip_all, fields(stream_id = %aggregate_state.stream_id(), events = aggregate_state.uncommitted().len()), err)]
    pub async fn save(&self, aggregate_state: &AggregateState<A>) -> Result<AggregateState<A>, ManagerError<A::Error>> {
        if aggregate_state.uncommitted().is_empty() {
            return Ok(aggregate_state.clone());
        }

        let expected_version: SequenceNumber = aggregate_state.loaded_version();
        let events: Vec<NewEvent> = aggregate_state
            .uncommitted()
            .iter()
            .map(NewEvent::from_event)
            .collect::<Result<Vec<NewEvent>, serde_json::Error>>()?;

        let version: SequenceNumber = self
            .event_store
            .append(
                aggregate_state.stream_id(),
                ExpectedVersion::Exact(expected_version),
                events,
            )
            .await?;

        let saved: AggregateState<A> = aggregate_state.committed(version);
        self.snapshot_if_needed(expected_version, &saved);

        Ok(saved)
    }

    /// Validates and handles the command onto the given state, and then saves the emitted events.
    ///
    /// # Errors
    ///
    /// Will return [`ManagerError::Command`] if the aggregate rejects the command, or any error of
    /// [`AggregateManager::save`].
    pub async fn handle_command(
        &self,
        aggregate_state: &AggregateState<A>,
        command: A::Command,
    ) -> Result<AggregateState<A>, ManagerError<A::Error>> {
        let aggregate_state: AggregateState<A> = aggregate_state.handle(command).map_err(ManagerError::Command)?;
        self.save(&aggregate_state).await
    }

    /// Returns the internal event store
    pub fn event_store(&self) -> &E {
        &self.event_store
    }

    /// Applies the events following the current version of `aggregate_state`.
    async fn replay(
        &self,
        stream_id: &StreamId,
        aggregate_state: &mut AggregateState<A>,
    ) -> Result<(), ManagerError<A::Error>> {
        let mut events: BoxStream<Result<RecordedEvent, StoreError>> =
            self.event_store.read(stream_id, aggregate_state.version(), None);

        while let Some(recorded) = events.try_next().await? {
            let event: A::Event = decode::<A>(aggregate_state, &recorded)?;
            aggregate_state.apply(event);
        }

        Ok(())
    }

    async fn load_snapshot(&self, id: &str, stream_id: &StreamId) -> Option<AggregateState<A>> {
        let snapshot_store = self.snapshot_store.as_ref()?;

        match snapshot_store.get_latest(stream_id).await {
            Ok(Some(snapshot)) => match serde_json::from_slice::<A::State>(&snapshot.state) {
                Ok(inner) => Some(AggregateState::restore(
                    id.to_string(),
                    stream_id.clone(),
                    snapshot.version,
                    inner,
                )),
                Err(error) => {
                    tracing::warn!(%stream_id, version = snapshot.version, ?error, "ignoring undecodable snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%stream_id, ?error, "snapshot store failed, replaying the full stream");
                None
            }
        }
    }

    /// Spawns the snapshot write in background. The outcome is only logged. Outside of a tokio
    /// runtime the snapshot is skipped.
    fn snapshot_if_needed(&self, previous_version: SequenceNumber, saved: &AggregateState<A>) {
        let Some(snapshot_store) = self.snapshot_store.clone() else {
            return;
        };

        if !self.snapshot_policy.crosses(previous_version, saved.version()) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(stream_id = %saved.stream_id(), "no tokio runtime, skipping snapshot");
            return;
        };

        let state: Vec<u8> = match serde_json::to_vec(saved.inner()) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(stream_id = %saved.stream_id(), ?error, "failed to serialize snapshot");
                return;
            }
        };

        let snapshot: Snapshot = Snapshot::new(saved.stream_id().clone(), saved.version(), state);
        let span = tracing::debug_span!("esrs.snapshot", stream_id = %snapshot.stream_id, version = snapshot.version);

        let _ = runtime.spawn(
            async move {
                if let Err(error) = snapshot_store.save(snapshot).await {
                    tracing::warn!(?error, "failed to write snapshot");
                }
            }
            .instrument(span),
        );
    }
}

/// Decodes the next event of the stream, checking it directly follows the state's version and that
/// it is an event of the aggregate.
fn decode<A: Aggregate>(
    aggregate_state: &AggregateState<A>,
    recorded: &RecordedEvent,
) -> Result<A::Event, ManagerError<A::Error>> {
    let corruption = |reason: String| ManagerError::StreamCorruption {
        stream_id: recorded.stream_id.clone(),
        sequence_number: recorded.sequence_number,
        reason,
    };

    let expected: SequenceNumber = aggregate_state.version() + 1;
    if recorded.sequence_number != expected {
        return Err(corruption(format!("expected sequence number {}", expected)));
    }

    let event: A::Event = recorded
        .decode()
        .map_err(|error| corruption(format!("unknown event type {}: {}", recorded.event_type, error)))?;

    if event.event_type() != recorded.event_type {
        return Err(corruption(format!(
            "recorded as {} but decoded as {}",
            recorded.event_type,
            event.event_type()
        )));
    }

    Ok(event)
}

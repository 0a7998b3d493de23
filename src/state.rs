use std::fmt::{Debug, Display, Formatter};

use crate::types::{SequenceNumber, StreamId};
use crate::Aggregate;

/// The state of an aggregate instance as of its last loaded or recorded event, together with the
/// events recorded since it was loaded and not yet saved.
///
/// `version` counts uncommitted events too: the version the instance had when it was loaded is
/// `version - uncommitted.len()`.
pub struct AggregateState<A>
where
    A: Aggregate,
{
    id: String,
    stream_id: StreamId,
    version: SequenceNumber,
    inner: A::State,
    uncommitted: Vec<A::Event>,
}

impl<A> AggregateState<A>
where
    A: Aggregate,
{
    /// Creates a fresh aggregate instance at version 0 with the default state.
    pub fn new(id: impl Display) -> Self {
        let id = id.to_string();
        Self {
            stream_id: StreamId::for_aggregate::<A>(&id),
            id,
            version: 0,
            inner: Default::default(),
            uncommitted: vec![],
        }
    }

    pub(crate) fn restore(id: String, stream_id: StreamId, version: SequenceNumber, inner: A::State) -> Self {
        Self {
            id,
            stream_id,
            version,
            inner,
            uncommitted: vec![],
        }
    }

    /// Returns the aggregate id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Returns the current version, uncommitted events included.
    pub fn version(&self) -> SequenceNumber {
        self.version
    }

    /// The version of the stream when this instance was loaded.
    pub fn loaded_version(&self) -> SequenceNumber {
        self.version - self.uncommitted.len() as SequenceNumber
    }

    pub fn inner(&self) -> &A::State {
        &self.inner
    }

    /// Events recorded since this instance was loaded that are not saved yet.
    pub fn uncommitted(&self) -> &[A::Event] {
        &self.uncommitted
    }

    /// Returns `true` if no event was ever persisted or recorded for this instance.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Applies the given events onto the state and keeps them as uncommitted, advancing the version
    /// by one per event.
    #[must_use]
    pub fn record(mut self, events: Vec<A::Event>) -> Self {
        for event in events {
            self.apply(event.clone());
            self.uncommitted.push(event);
        }
        self
    }

    /// Runs [`Aggregate::handle_command`] against the current state and records the emitted events
    /// on a copy of this instance.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the aggregate rejects the command.
    pub fn handle(&self, command: A::Command) -> Result<Self, A::Error> {
        let events: Vec<A::Event> = A::handle_command(&self.inner, command)?;
        Ok(self.clone().record(events))
    }

    pub(crate) fn apply(&mut self, event: A::Event) {
        let inner: A::State = std::mem::take(&mut self.inner);
        self.inner = A::apply_event(inner, event);
        self.version += 1;
    }

    /// A copy of this instance with every recorded event committed at `version`.
    pub(crate) fn committed(&self, version: SequenceNumber) -> Self {
        Self {
            id: self.id.clone(),
            stream_id: self.stream_id.clone(),
            version,
            inner: self.inner.clone(),
            uncommitted: vec![],
        }
    }
}

impl<A> Clone for AggregateState<A>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            stream_id: self.stream_id.clone(),
            version: self.version,
            inner: self.inner.clone(),
            uncommitted: self.uncommitted.clone(),
        }
    }
}

impl<A> Debug for AggregateState<A>
where
    A: Aggregate,
    A::State: Debug,
    A::Event: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateState")
            .field("stream_id", &self.stream_id)
            .field("version", &self.version)
            .field("inner", &self.inner)
            .field("uncommitted", &self.uncommitted)
            .finish()
    }
}

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{GlobalPosition, SequenceNumber, StreamId};

/// A domain event emitted by an [`crate::Aggregate`].
///
/// Events are persisted as JSON alongside their type tag. The tag is what projectors dispatch on and
/// it is checked again when the event is replayed onto an aggregate.
pub trait Event: Serialize + DeserializeOwned {
    /// The type tag of this event, e.g. `"Created"`.
    fn event_type(&self) -> &'static str;
}

/// An event ready to be appended to a stream. The store assigns its sequence number, global
/// position and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    /// Serializes a domain event into its persisted form.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the event cannot be serialized.
    pub fn from_event<E: Event>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event.event_type(), serde_json::to_vec(event)?))
    }
}

/// An immutable event as stored in the event store, with all of its metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Uniquely identifies an event among all events emitted from all aggregates.
    pub event_id: Uuid,
    /// The stream the event belongs to.
    pub stream_id: StreamId,
    /// The sequence number of the event, within its specific stream.
    pub sequence_number: SequenceNumber,
    /// Position of the event across all streams.
    pub global_position: GlobalPosition,
    /// Type tag of the event.
    pub event_type: String,
    /// The serialized event.
    pub payload: Vec<u8>,
    /// The timestamp of when the event is persisted.
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Deserializes the payload into `E`.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the payload is not a valid `E`.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

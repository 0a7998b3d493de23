use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::RecordedEvent;
use crate::snapshot::Snapshot;
use crate::types::{GlobalPosition, SequenceNumber, StreamId};

/// Event representation on the event store
#[derive(sqlx::FromRow, Debug)]
pub struct DbEvent {
    pub global_position: GlobalPosition,
    pub event_id: Uuid,
    pub stream_id: String,
    pub sequence_number: SequenceNumber,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub recorded_at: DateTime<Utc>,
}

impl From<DbEvent> for RecordedEvent {
    fn from(event: DbEvent) -> Self {
        Self {
            event_id: event.event_id,
            stream_id: StreamId::new(event.stream_id),
            sequence_number: event.sequence_number,
            global_position: event.global_position,
            event_type: event.event_type,
            payload: event.payload,
            recorded_at: event.recorded_at,
        }
    }
}

/// Snapshot representation on the snapshot table
#[derive(sqlx::FromRow, Debug)]
pub struct DbSnapshot {
    pub stream_id: String,
    pub version: SequenceNumber,
    pub state: Vec<u8>,
    pub taken_at: DateTime<Utc>,
}

impl From<DbSnapshot> for Snapshot {
    fn from(snapshot: DbSnapshot) -> Self {
        Self {
            stream_id: StreamId::new(snapshot.stream_id),
            version: snapshot.version,
            state: snapshot.state,
            taken_at: snapshot.taken_at,
        }
    }
}

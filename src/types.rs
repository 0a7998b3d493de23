use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Aggregate;

/// Position of an event within its own stream. The first event of a stream has sequence number 1,
/// an empty stream is at version 0.
pub type SequenceNumber = i64;

/// Position of an event in the total order across all streams. Assigned by the store, starting
/// from 1. A checkpoint at 0 means nothing has been processed yet.
pub type GlobalPosition = i64;

/// Identifies the stream holding the whole history of one aggregate instance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Builds the stream id of the aggregate instance `id` of type `A`, i.e. `"{A::NAME}-{id}"`.
    pub fn for_aggregate<A: Aggregate>(id: impl Display) -> Self {
        Self(format!("{}-{}", A::NAME, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

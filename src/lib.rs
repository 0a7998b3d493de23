//! Event-sourced aggregate persistence with CQRS projections.
//!
//! Aggregates are rebuilt by replaying their event stream (optionally starting from a snapshot) and
//! persisted by appending new events under optimistic concurrency. Projectors follow the global
//! event log to keep read models up to date.

pub use crate::aggregate::Aggregate;
pub use crate::event::{Event, NewEvent, RecordedEvent};
pub use crate::manager::{AggregateManager, ManagerError, SnapshotPolicy};
pub use crate::state::AggregateState;

mod aggregate;
mod event;
mod manager;
mod state;

pub mod projection;
pub mod read_model;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
mod sql;

#[cfg(feature = "postgres")]
pub use sqlx;

pub mod error {
    pub use serde_json::Error as JsonError;
    #[cfg(feature = "postgres")]
    pub use sqlx::Error as SqlxError;

    pub use crate::manager::ManagerError;
    pub use crate::projection::ProjectionError;
    pub use crate::store::StoreError;
}

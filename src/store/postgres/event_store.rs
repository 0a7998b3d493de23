use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{Pool, Postgres, Transaction};

use crate::event::{NewEvent, RecordedEvent};
use crate::projection::PgCheckpointStore;
use crate::snapshot::PgSnapshotStore;
use crate::sql::event::DbEvent;
use crate::sql::statements::Statements;
use crate::store::{EventStore, ExpectedVersion, StoreError};
use crate::types::{GlobalPosition, SequenceNumber, StreamId};

/// Default Postgres implementation for the [`EventStore`]. Use this struct in order to have a
/// pre-made implementation of an [`EventStore`] persisting on Postgres.
///
/// The store is protected by an [`Arc`] that allows it to be cloneable still having the same memory
/// reference.
///
/// Appends are serialized by a transaction-scoped advisory lock, so that a reader following the
/// global position never skips an event committed late. The store doesn't push notifications:
/// projectors poll it.
#[derive(Clone)]
pub struct PgStore {
    pub(super) inner: Arc<InnerPgStore>,
}

pub(super) struct InnerPgStore {
    pub(super) pool: Pool<Postgres>,
    pub(super) statements: Arc<Statements>,
}

impl PgStore {
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.inner.pool
    }

    pub fn table_prefix(&self) -> &str {
        self.inner.statements.table_prefix()
    }

    /// Returns a [`PgSnapshotStore`] on the snapshots table sharing this store's prefix.
    pub fn snapshot_store(&self) -> PgSnapshotStore {
        PgSnapshotStore::new(self.inner.pool.clone(), self.inner.statements.clone())
    }

    /// Returns a [`PgCheckpointStore`] on the checkpoints table sharing this store's prefix.
    pub fn checkpoint_store(&self) -> PgCheckpointStore {
        PgCheckpointStore::new(self.inner.pool.clone(), self.inner.statements.clone())
    }
}

#[async_trait]
impl EventStore for PgStore {
    #[tracing::instrument(skip_all, fields(stream_id = %stream_id, expected_version = %expected_version, events = events.len()), err)]
    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<SequenceNumber, StoreError> {
        if events.is_empty() {
            return self.stream_version(stream_id).await;
        }

        let mut transaction: Transaction<Postgres> = self.inner.pool.begin().await?;

        let _ = sqlx::query(self.inner.statements.lock_log())
            .execute(&mut *transaction)
            .await?;

        let actual: SequenceNumber = sqlx::query_scalar(self.inner.statements.stream_version())
            .bind(stream_id.as_str())
            .fetch_one(&mut *transaction)
            .await?;

        expected_version.check(stream_id, actual)?;

        let recorded_at: DateTime<Utc> = Utc::now();
        let mut version: SequenceNumber = actual;

        for event in events {
            version += 1;

            let inserted = sqlx::query(self.inner.statements.insert_event())
                .bind(event.event_id)
                .bind(stream_id.as_str())
                .bind(version)
                .bind(&event.event_type)
                .bind(&event.payload)
                .bind(recorded_at)
                .execute(&mut *transaction)
                .await;

            if let Err(error) = inserted {
                let unique_violation: bool = error
                    .as_database_error()
                    .map_or(false, |database_error| database_error.is_unique_violation());

                if unique_violation {
                    return Err(StoreError::Concurrency {
                        stream_id: stream_id.clone(),
                        expected: expected_version,
                        actual,
                    });
                }

                return Err(error.into());
            }
        }

        transaction.commit().await?;

        Ok(version)
    }

    fn read<'a>(
        &'a self,
        stream_id: &'a StreamId,
        from_version: SequenceNumber,
        to_version: Option<SequenceNumber>,
    ) -> BoxStream<'a, Result<RecordedEvent, StoreError>> {
        sqlx::query_as::<_, DbEvent>(self.inner.statements.select_stream())
            .bind(stream_id.as_str())
            .bind(from_version)
            .bind(to_version.unwrap_or(SequenceNumber::MAX))
            .fetch(&self.inner.pool)
            .map(|row| row.map(RecordedEvent::from).map_err(StoreError::from))
            .boxed()
    }

    fn read_all(&self, from_position: GlobalPosition, limit: usize) -> BoxStream<'_, Result<RecordedEvent, StoreError>> {
        sqlx::query_as::<_, DbEvent>(self.inner.statements.select_all())
            .bind(from_position)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch(&self.inner.pool)
            .map(|row| row.map(RecordedEvent::from).map_err(StoreError::from))
            .boxed()
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<SequenceNumber, StoreError> {
        Ok(sqlx::query_scalar(self.inner.statements.stream_version())
            .bind(stream_id.as_str())
            .fetch_one(&self.inner.pool)
            .await?)
    }

    async fn head_position(&self) -> Result<GlobalPosition, StoreError> {
        Ok(sqlx::query_scalar(self.inner.statements.head_position())
            .fetch_one(&self.inner.pool)
            .await?)
    }
}

/// Debug implementation for [`PgStore`]. It just shows the statements, that are the only thing
/// that might be useful to debug.
impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("statements", &self.inner.statements)
            .finish()
    }
}

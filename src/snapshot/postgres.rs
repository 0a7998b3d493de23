use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::snapshot::{Snapshot, SnapshotStore};
use crate::sql::event::DbSnapshot;
use crate::sql::statements::Statements;
use crate::store::StoreError;
use crate::types::StreamId;

/// Postgres [`SnapshotStore`], keeping one row per stream. Built by [`crate::store::postgres::PgStore::snapshot_store`].
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: Pool<Postgres>,
    statements: Arc<Statements>,
}

impl PgSnapshotStore {
    pub(crate) fn new(pool: Pool<Postgres>, statements: Arc<Statements>) -> Self {
        Self { pool, statements }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn get_latest(&self, stream_id: &StreamId) -> Result<Option<Snapshot>, StoreError> {
        Ok(sqlx::query_as::<_, DbSnapshot>(self.statements.select_snapshot())
            .bind(stream_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Snapshot::from))
    }

    /// The row is only replaced by a snapshot of the same or a higher version.
    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let _ = sqlx::query(self.statements.upsert_snapshot())
            .bind(snapshot.stream_id.as_str())
            .bind(snapshot.version)
            .bind(&snapshot.state)
            .bind(snapshot.taken_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        let _ = sqlx::query(self.statements.delete_snapshot())
            .bind(stream_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

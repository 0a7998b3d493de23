use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::projection::CheckpointStore;
use crate::sql::statements::Statements;
use crate::store::StoreError;
use crate::types::GlobalPosition;

/// Postgres [`CheckpointStore`]. Built by [`crate::store::postgres::PgStore::checkpoint_store`].
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: Pool<Postgres>,
    statements: Arc<Statements>,
}

impl PgCheckpointStore {
    pub(crate) fn new(pool: Pool<Postgres>, statements: Arc<Statements>) -> Self {
        Self { pool, statements }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, projector_id: &str) -> Result<GlobalPosition, StoreError> {
        let position: Option<GlobalPosition> = sqlx::query_scalar(self.statements.select_checkpoint())
            .bind(projector_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(position.unwrap_or_default())
    }

    async fn save(&self, projector_id: &str, position: GlobalPosition) -> Result<(), StoreError> {
        let _ = sqlx::query(self.statements.upsert_checkpoint())
            .bind(projector_id)
            .bind(position)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn reset(&self, projector_id: &str) -> Result<(), StoreError> {
        let _ = sqlx::query(self.statements.delete_checkpoint())
            .bind(projector_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

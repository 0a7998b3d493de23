use sqlx::postgres::PgQueryResult;
use sqlx::{Error, Pool, Postgres, Transaction};

use crate::sql::statements::Statements;

/// Creates the events, snapshots and checkpoints tables, atomically. Running them again is a no-op.
pub struct Migrations;

impl Migrations {
    /// # Errors
    ///
    /// Will return an `Err` if any of the migrations fails. None of them is applied in that case.
    pub async fn run(pool: &Pool<Postgres>, statements: &Statements) -> Result<(), Error> {
        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        for migration in statements.migrations() {
            let _: PgQueryResult = sqlx::query(migration.as_str()).execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}

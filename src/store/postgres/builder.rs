use std::sync::Arc;

use sqlx::{Pool, Postgres};

use crate::sql::migrations::Migrations;
use crate::sql::statements::Statements;

use super::{InnerPgStore, PgStore};

const DEFAULT_TABLE_PREFIX: &str = "esrs";

/// Struct used to build a brand new [`PgStore`].
pub struct PgStoreBuilder {
    pool: Pool<Postgres>,
    table_prefix: String,
    run_migrations: bool,
}

impl PgStoreBuilder {
    /// Creates a new instance of a [`PgStoreBuilder`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            run_migrations: true,
        }
    }

    /// Sets the prefix of the events, snapshots and checkpoints tables. Defaults to `esrs`.
    /// Only ASCII alphanumeric characters and underscores are allowed.
    pub fn with_table_prefix(mut self, table_prefix: impl Into<String>) -> Self {
        self.table_prefix = table_prefix.into();
        self
    }

    /// Calling this function the caller avoid running migrations. It is recommend to run migrations
    /// at least once per store per startup.
    pub fn without_running_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    /// This function runs all the needed [`Migrations`], atomically setting up the database if
    /// `run_migrations` isn't explicitly set to false.
    ///
    /// Eventually returns an instance of PgStore.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the table prefix is invalid or if there's an error running
    /// [`Migrations`].
    pub async fn try_build(self) -> Result<PgStore, sqlx::Error> {
        if !is_valid_prefix(&self.table_prefix) {
            return Err(sqlx::Error::Configuration(
                format!("invalid table prefix {:?}", self.table_prefix).into(),
            ));
        }

        let statements: Statements = Statements::new(&self.table_prefix);

        if self.run_migrations {
            Migrations::run(&self.pool, &statements).await?;
        }

        Ok(PgStore {
            inner: Arc::new(InnerPgStore {
                pool: self.pool,
                statements: Arc::new(statements),
            }),
        })
    }
}

fn is_valid_prefix(table_prefix: &str) -> bool {
    !table_prefix.is_empty()
        && !table_prefix.starts_with(|c: char| c.is_ascii_digit())
        && table_prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

use crate::statement;

/// The SQL statements of a set of tables sharing the same prefix.
#[derive(Clone, Debug)]
pub struct Statements {
    table_prefix: String,
    migrations: Vec<String>,
    lock_log: String,
    insert_event: String,
    select_stream: String,
    select_all: String,
    stream_version: String,
    head_position: String,
    select_snapshot: String,
    upsert_snapshot: String,
    delete_snapshot: String,
    select_checkpoint: String,
    upsert_checkpoint: String,
    delete_checkpoint: String,
}

impl Statements {
    pub fn new(table_prefix: &str) -> Self {
        Self {
            table_prefix: table_prefix.to_string(),
            migrations: vec![
                statement!("postgres/migrations/01_create_events_table.sql", table_prefix),
                statement!("postgres/migrations/02_create_snapshots_table.sql", table_prefix),
                statement!("postgres/migrations/03_create_checkpoints_table.sql", table_prefix),
            ],
            lock_log: statement!("postgres/statements/lock_log.sql", table_prefix),
            insert_event: statement!("postgres/statements/insert_event.sql", table_prefix),
            select_stream: statement!("postgres/statements/select_stream.sql", table_prefix),
            select_all: statement!("postgres/statements/select_all.sql", table_prefix),
            stream_version: statement!("postgres/statements/stream_version.sql", table_prefix),
            head_position: statement!("postgres/statements/head_position.sql", table_prefix),
            select_snapshot: statement!("postgres/statements/select_snapshot.sql", table_prefix),
            upsert_snapshot: statement!("postgres/statements/upsert_snapshot.sql", table_prefix),
            delete_snapshot: statement!("postgres/statements/delete_snapshot.sql", table_prefix),
            select_checkpoint: statement!("postgres/statements/select_checkpoint.sql", table_prefix),
            upsert_checkpoint: statement!("postgres/statements/upsert_checkpoint.sql", table_prefix),
            delete_checkpoint: statement!("postgres/statements/delete_checkpoint.sql", table_prefix),
        }
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    /// Serializes appends across the whole log, so that global positions become visible in order.
    pub fn lock_log(&self) -> &str {
        &self.lock_log
    }

    pub fn insert_event(&self) -> &str {
        &self.insert_event
    }

    pub fn select_stream(&self) -> &str {
        &self.select_stream
    }

    pub fn select_all(&self) -> &str {
        &self.select_all
    }

    pub fn stream_version(&self) -> &str {
        &self.stream_version
    }

    pub fn head_position(&self) -> &str {
        &self.head_position
    }

    pub fn select_snapshot(&self) -> &str {
        &self.select_snapshot
    }

    pub fn upsert_snapshot(&self) -> &str {
        &self.upsert_snapshot
    }

    pub fn delete_snapshot(&self) -> &str {
        &self.delete_snapshot
    }

    pub fn select_checkpoint(&self) -> &str {
        &self.select_checkpoint
    }

    pub fn upsert_checkpoint(&self) -> &str {
        &self.upsert_checkpoint
    }

    pub fn delete_checkpoint(&self) -> &str {
        &self.delete_checkpoint
    }
}

mod events;
mod migrations;
mod profiles;
mod selections;
mod tasks;

pub use events::{EventStore, NewEvent};
pub use profiles::ProfileStore;
pub use selections::SelectionStore;
pub use tasks::TaskStore;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

/// Open (creating if missing) the SQLite database and run migrations.
pub async fn open_db(db_path: &str) -> anyhow::Result<SqlitePool> {
    // FK enforcement matters here: cancelling a user cascades to events, and
    // deleting an event nulls out its task reference.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrations::migrate(&pool).await?;
    Ok(pool)
}

/// Read an RFC3339 timestamp column as a UTC instant.
pub(crate) fn ts_column(row: &sqlx::sqlite::SqliteRow, col: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw: String = row.try_get(col)?;
    Ok(DateTime::parse_from_rfc3339(&raw)
        .map_err(|e| anyhow::anyhow!("bad timestamp in column {}: {}", col, e))?
        .with_timezone(&Utc))
}

use std::str::FromStr;
use std::time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Open a pool to the SQLite file at `url`, creating the file if needed.
///
/// Foreign keys are enforced and the journal runs in WAL mode so the worker
/// can keep reading while an ingestion run writes.
pub async fn connect(url: &str, max_connections: u32) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|error| StoreError::ConnectionError { error })?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|error| StoreError::ConnectionError { error })?;

    info!(url, "connected to record database");

    Ok(pool)
}

/// Apply any pending schema migrations.
pub async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|error| StoreError::MigrationError { error })
}

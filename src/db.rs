//! SQLite database connection management.
//!
//! The relational store lives at `<store root>/store.db`. Connections use
//! WAL journaling so readers never block the single ingestion writer and
//! always observe the last committed transaction.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::error::Result;

/// Create a connection pool to the store database.
///
/// - Creates the store root and the database file if they don't exist.
/// - Enables WAL journal mode and foreign keys.
///
/// # Errors
///
/// Returns [`StoreError::Io`](crate::error::StoreError::Io) if the root
/// cannot be created and
/// [`StoreError::StorageUnavailable`](crate::error::StoreError::StorageUnavailable)
/// if SQLite cannot open the file.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    std::fs::create_dir_all(&config.store.root)?;

    let db_path = config.store_db_path();
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

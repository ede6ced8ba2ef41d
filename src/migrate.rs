//! Schema creation for the content repository.
//!
//! Every statement is `IF NOT EXISTS`, so running migrations against an
//! existing store is a no-op.

use sqlx::SqlitePool;
use tracing::warn;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            surrogate_id INTEGER PRIMARY KEY AUTOINCREMENT,
            cooked_doc TEXT NOT NULL DEFAULT '',
            raw_doc TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_id INTEGER NOT NULL,
            external_id INTEGER,
            summary TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            date TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (content_id) REFERENCES content(surrogate_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // NULL external ids are not considered equal by SQLite, so malformed
    // entries without an id can coexist under this constraint.
    let unique_ids = sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_metadata_external_id ON metadata(external_id)",
    )
    .execute(pool)
    .await;

    match unique_ids {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            // Stores written before the constraint existed may hold duplicate
            // ids. Reads tolerate them; inserts fall back to the existence check.
            warn!("metadata holds duplicate external ids; uniqueness not enforced");
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_metadata_external_id_lookup ON metadata(external_id)",
            )
            .execute(pool)
            .await?;
        }
        Err(err) => return Err(err.into()),
    }

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_metadata_content_id ON metadata(content_id)")
        .execute(pool)
        .await?;

    Ok(())
}

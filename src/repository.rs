//! SQLite-backed content repository.
//!
//! Holds the canonical copy of every article: the `content` table carries
//! the cooked and raw documents, the `metadata` table carries the external
//! id and descriptive fields. One article is one row in each, written in a
//! single transaction.
//!
//! Every statement is a fixed SQL string with bound parameters; no caller
//! value is ever spliced into SQL text.

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::{FromRow, SqlitePool};
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};
use crate::migrate;
use crate::models::{join_tags, split_tags, Article};

const SQL_INSERT_CONTENT: &str = "INSERT INTO content (cooked_doc, raw_doc) VALUES (?, ?)";

const SQL_INSERT_METADATA: &str = r#"
    INSERT INTO metadata (content_id, external_id, summary, title, tags, date)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const SQL_HAS_ARTICLE: &str = r#"
    SELECT COUNT(*) > 0
    FROM metadata m
    JOIN content c ON c.surrogate_id = m.content_id
    WHERE m.external_id = ?
"#;

const SQL_SELECT_ARTICLE: &str = r#"
    SELECT m.external_id, c.surrogate_id, c.cooked_doc, c.raw_doc,
           m.summary, m.title, m.tags, m.date
    FROM metadata m
    JOIN content c ON c.surrogate_id = m.content_id
    WHERE m.external_id = ?
    ORDER BY m.id ASC
"#;

const SQL_SELECT_IDS: &str = r#"
    SELECT m.external_id
    FROM metadata m
    JOIN content c ON c.surrogate_id = m.content_id
    WHERE m.external_id IS NOT NULL
    ORDER BY m.id ASC
"#;

const SQL_SELECT_IDS_WITH_CONTENT: &str = r#"
    SELECT m.external_id
    FROM metadata m
    JOIN content c ON c.surrogate_id = m.content_id
    WHERE m.external_id IS NOT NULL
      AND c.cooked_doc IS NOT NULL
      AND c.cooked_doc != ''
    ORDER BY m.id ASC
"#;

const SQL_COUNT_CONTENT: &str = "SELECT COUNT(*) FROM content";

/// Raw row shape of an article lookup. Nullable columns are widened to
/// `Option` so rows written by older schemas still decode.
#[derive(Debug, FromRow)]
struct ArticleRow {
    external_id: Option<i64>,
    surrogate_id: i64,
    cooked_doc: Option<String>,
    raw_doc: Option<String>,
    summary: Option<String>,
    title: Option<String>,
    tags: Option<String>,
    date: Option<String>,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            external_id: row.external_id,
            surrogate_id: Some(row.surrogate_id),
            raw_doc: row.raw_doc,
            cooked_doc: row.cooked_doc.unwrap_or_default(),
            summary: row.summary.unwrap_or_default(),
            title: row.title.unwrap_or_default(),
            tags: split_tags(row.tags.as_deref().unwrap_or_default()),
            date: row.date.unwrap_or_default(),
        }
    }
}

/// Durable store of article content and metadata.
#[derive(Clone)]
pub struct ContentRepository {
    pool: SqlitePool,
}

impl ContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `<root>/store.db` and ensure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert content and metadata in one transaction and return the new
    /// surrogate id.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the external id is already stored;
    /// nothing is written in that case.
    pub async fn insert(&self, article: &Article) -> Result<i64> {
        let tags = join_tags(&article.tags)?;

        let mut tx = self.pool.begin().await?;

        let surrogate_id = sqlx::query(SQL_INSERT_CONTENT)
            .bind(&article.cooked_doc)
            .bind(&article.raw_doc)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        let metadata = sqlx::query(SQL_INSERT_METADATA)
            .bind(surrogate_id)
            .bind(article.external_id)
            .bind(&article.summary)
            .bind(&article.title)
            .bind(&tags)
            .bind(&article.date)
            .execute(&mut *tx)
            .await;

        // Dropping the transaction on the error path rolls back the content row.
        match metadata {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(StoreError::DuplicateKey {
                    external_id: article.external_id.unwrap_or_default(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(surrogate_id)
    }

    pub async fn has(&self, external_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(SQL_HAS_ARTICLE)
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// Look up one article. When several rows share the id, a warning is
    /// logged and the earliest inserted row is returned.
    pub async fn get(&self, external_id: i64) -> Result<Article> {
        let mut articles = self.get_all(external_id).await?;

        if articles.len() > 1 {
            warn!(
                "{}",
                StoreError::InconsistentData {
                    external_id,
                    rows: articles.len(),
                }
            );
        }

        if articles.is_empty() {
            return Err(StoreError::NotFound { external_id });
        }
        Ok(articles.swap_remove(0))
    }

    /// Every row stored under `external_id`, in insertion order. Unknown
    /// ids yield an empty vector.
    pub async fn get_all(&self, external_id: i64) -> Result<Vec<Article>> {
        let rows: Vec<ArticleRow> = sqlx::query_as(SQL_SELECT_ARTICLE)
            .bind(external_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Article::from).collect())
    }

    /// Stream stored external ids in insertion order.
    ///
    /// With `filter_empty_content`, rows whose cooked document is empty are
    /// left out. Rows without an external id are never yielded.
    pub fn list_ids(&self, filter_empty_content: bool) -> BoxStream<'_, Result<i64>> {
        let sql = if filter_empty_content {
            SQL_SELECT_IDS_WITH_CONTENT
        } else {
            SQL_SELECT_IDS
        };

        sqlx::query_scalar::<_, i64>(sql)
            .fetch(&self.pool)
            .map_err(StoreError::from)
            .boxed()
    }

    /// Number of content rows. Counts raw rows, so duplicate rows sharing an
    /// external id are each counted.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(SQL_COUNT_CONTENT)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_repo(tmp: &TempDir) -> ContentRepository {
        let config = Config::with_root(tmp.path().join("store"));
        ContentRepository::open(&config).await.unwrap()
    }

    async fn collect_ids(repo: &ContentRepository, filter: bool) -> Vec<i64> {
        repo.list_ids(filter).try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trips_fields() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        let article = Article::new(42, "oslo police report issued today")
            .with_raw_doc("<html>oslo</html>")
            .with_title("T42")
            .with_summary("short")
            .with_date("2014-03-01")
            .with_tags(["news", "oslo"]);

        let surrogate = repo.insert(&article).await.unwrap();
        let stored = repo.get(42).await.unwrap();

        assert_eq!(stored.surrogate_id, Some(surrogate));
        assert_eq!(stored.external_id, Some(42));
        assert_eq!(stored.cooked_doc, article.cooked_doc);
        assert_eq!(stored.raw_doc.as_deref(), Some("<html>oslo</html>"));
        assert_eq!(stored.title, "T42");
        assert_eq!(stored.summary, "short");
        assert_eq!(stored.date, "2014-03-01");
        assert_eq!(stored.tags, vec!["news", "oslo"]);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_atomically() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        repo.insert(&Article::new(7, "body").with_summary("first"))
            .await
            .unwrap();
        let err = repo
            .insert(&Article::new(7, "body").with_summary("second"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateKey { external_id: 7 }));
        // The content row of the rejected insert was rolled back too.
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get(7).await.unwrap().summary, "first");
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        let err = repo.get(404).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { external_id: 404 }));
        assert!(repo.get_all(404).await.unwrap().is_empty());
        assert!(!repo.has(404).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_rows_resolve_to_first_inserted() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        // Simulate a store written before the uniqueness constraint existed.
        sqlx::query("DROP INDEX idx_metadata_external_id")
            .execute(repo.pool())
            .await
            .unwrap();

        repo.insert(&Article::new(9, "a").with_title("older"))
            .await
            .unwrap();
        repo.insert(&Article::new(9, "b").with_title("newer"))
            .await
            .unwrap();

        assert_eq!(repo.get(9).await.unwrap().title, "older");

        let all = repo.get_all(9).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "older");
        assert_eq!(all[1].title, "newer");

        // Duplicates inflate the raw row count.
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_with_duplicate_rows_succeeds() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        sqlx::query("DROP INDEX idx_metadata_external_id")
            .execute(repo.pool())
            .await
            .unwrap();
        repo.insert(&Article::new(3, "a")).await.unwrap();
        repo.insert(&Article::new(3, "b")).await.unwrap();
        repo.close().await;

        let reopened = open_repo(&tmp).await;
        assert_eq!(reopened.get_all(3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_ids_filters_empty_content() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        repo.insert(&Article::new(1, "has text")).await.unwrap();
        repo.insert(&Article::new(2, "")).await.unwrap();
        repo.insert(&Article::new(3, "more text")).await.unwrap();
        repo.insert(&Article {
            cooked_doc: "no id".to_string(),
            ..Article::default()
        })
        .await
        .unwrap();

        assert_eq!(collect_ids(&repo, true).await, vec![1, 3]);
        assert_eq!(collect_ids(&repo, false).await, vec![1, 2, 3]);
        assert_eq!(repo.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_rows_without_external_id_coexist() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        repo.insert(&Article::default()).await.unwrap();
        repo.insert(&Article::default()).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tag_with_delimiter_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        let err = repo
            .insert(&Article::new(5, "x").with_tags(["a|b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArticle(_)));
        assert!(!repo.has(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_tag_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let repo = open_repo(&tmp).await;

        let err = repo
            .insert(&Article::new(5, "x").with_tags([""]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArticle(_)));
        assert!(!repo.has(5).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}

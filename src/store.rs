//! Store coordinator: the public façade over the content repository and
//! the search index.
//!
//! # Write protocol
//!
//! [`ArticleStore::add_article`] is a strict two-step pipeline:
//!
//! 1. Commit content and metadata to the repository (one transaction).
//! 2. Append the body to the index and commit it.
//!
//! Step 2 never starts before step 1 has committed, so the index can trail
//! the repository but never lead it. A failure in step 2 leaves the article
//! stored but unsearchable; [`ArticleStore::reconcile`] closes that gap.
//!
//! # Idempotency
//!
//! Re-ingesting an external id that is already stored is a no-op reported
//! as [`RepositoryWrite::AlreadyStored`]. A concurrent insert of the same id
//! loses on the repository's uniqueness constraint and is resolved the same
//! way.
//!
//! # Index writes
//!
//! Index writes from `add_article` and `reconcile` are serialized by one
//! lock shared between clones, so each call commits exactly the documents
//! it appended and its reported outcome is its own.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{BoxStream, TryStreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::index::{ArticleIndex, SearchIndex};
use crate::models::{AddOutcome, Article, IndexWrite, ReconcileReport, RepositoryWrite, SearchHit};
use crate::repository::ContentRepository;

/// Durable article store with a full-text index.
///
/// Cloning is cheap; clones share the same pool, index handle and index
/// write lock.
#[derive(Clone)]
pub struct ArticleStore {
    repository: ContentRepository,
    index: Arc<dyn ArticleIndex>,
    index_lock: Arc<Mutex<()>>,
    reconcile_batch: usize,
}

impl ArticleStore {
    /// Open (creating if needed) the store under `config.store.root`.
    pub async fn open(config: &Config) -> Result<Self> {
        let repository = ContentRepository::open(config).await?;
        let index = SearchIndex::initialize(&config.index_path(), &config.index)?;

        info!(root = %config.store.root.display(), "article store opened");

        Ok(Self::with_parts(
            repository,
            Arc::new(index),
            config.index.reconcile_batch,
        ))
    }

    /// Assemble a store from an already opened repository and index.
    pub fn with_parts(
        repository: ContentRepository,
        index: Arc<dyn ArticleIndex>,
        reconcile_batch: usize,
    ) -> Self {
        Self {
            repository,
            index,
            index_lock: Arc::new(Mutex::new(())),
            reconcile_batch: reconcile_batch.max(1),
        }
    }

    pub fn repository(&self) -> &ContentRepository {
        &self.repository
    }

    /// Ingest one article.
    ///
    /// # Errors
    ///
    /// Repository failures are returned as errors. Index failures are not:
    /// they are reported through [`AddOutcome::index`] so the committed
    /// repository write is never masked.
    pub async fn add_article(&self, article: &Article) -> Result<AddOutcome> {
        let Some(external_id) = article.external_id else {
            // Malformed feed entry: kept for inspection, but there is no key
            // to index it under.
            self.repository.insert(article).await?;
            warn!("stored article without external id; not indexed");
            return Ok(AddOutcome {
                external_id: None,
                repository: RepositoryWrite::Inserted,
                index: IndexWrite::Skipped,
            });
        };

        if self.repository.has(external_id).await? {
            return Ok(already_stored(external_id));
        }

        match self.repository.insert(article).await {
            Ok(_) => {}
            Err(StoreError::DuplicateKey { .. }) => {
                // Lost a race against an identical insert; the winner indexes.
                if self.repository.has(external_id).await? {
                    return Ok(already_stored(external_id));
                }
                return Err(StoreError::DuplicateKey { external_id });
            }
            Err(err) => return Err(err),
        }

        let index = match self.index_one(external_id, &article.cooked_doc).await {
            Ok(()) => IndexWrite::Indexed,
            Err(err) => {
                warn!(
                    external_id,
                    error = %err,
                    "article stored but not indexed; run reconcile to heal"
                );
                IndexWrite::Failed(err.to_string())
            }
        };

        Ok(AddOutcome {
            external_id: Some(external_id),
            repository: RepositoryWrite::Inserted,
            index,
        })
    }

    async fn index_one(&self, external_id: i64, body: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        if let Err(err) = self
            .index
            .index(external_id, body)
            .and_then(|()| self.index.commit())
        {
            self.discard_pending();
            return Err(err);
        }
        Ok(())
    }

    /// Drop uncommitted index documents after a failed write, so a later
    /// commit cannot publish them next to their re-indexed copies.
    fn discard_pending(&self) {
        if let Err(err) = self.index.shutdown() {
            warn!(error = %err, "failed to discard pending index documents");
        }
    }

    /// Index every stored article the index does not know about yet.
    ///
    /// Safe to run at any time; with nothing to heal it writes nothing. On
    /// error the uncommitted part of the current batch is discarded; a later
    /// run picks those articles up again.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.index_lock.lock().await;
        match self.reconcile_locked().await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.discard_pending();
                Err(err)
            }
        }
    }

    async fn reconcile_locked(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut pending = 0usize;

        // Collected up front so the scan does not pin a pooled connection
        // while the loop reads article bodies.
        let ids: Vec<i64> = self.repository.list_ids(false).try_collect().await?;

        let mut seen = HashSet::with_capacity(ids.len());

        for external_id in ids {
            // Duplicate repository rows share one index entry.
            if !seen.insert(external_id) {
                continue;
            }
            report.scanned += 1;

            if self.index.indexed(external_id)? {
                report.already_indexed += 1;
                continue;
            }

            let article = self.repository.get(external_id).await?;
            self.index.index(external_id, &article.cooked_doc)?;
            pending += 1;
            report.healed += 1;

            if pending >= self.reconcile_batch {
                self.index.commit()?;
                pending = 0;
            }
        }

        if pending > 0 {
            self.index.commit()?;
        }

        info!(
            scanned = report.scanned,
            already_indexed = report.already_indexed,
            healed = report.healed,
            "reconcile finished"
        );
        Ok(report)
    }

    pub async fn has_article(&self, external_id: i64) -> Result<bool> {
        self.repository.has(external_id).await
    }

    /// The stored article; the earliest row if the id is duplicated.
    pub async fn get_article(&self, external_id: i64) -> Result<Article> {
        self.repository.get(external_id).await
    }

    /// Every stored row for the id, in insertion order; empty if unknown.
    pub async fn get_article_duplicates(&self, external_id: i64) -> Result<Vec<Article>> {
        self.repository.get_all(external_id).await
    }

    pub fn list_ids(&self, filter_empty_content: bool) -> BoxStream<'_, Result<i64>> {
        self.repository.list_ids(filter_empty_content)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.index.search(query, limit)
    }

    /// Raw content row count.
    pub async fn count(&self) -> Result<i64> {
        self.repository.count().await
    }

    /// Documents currently visible in the index.
    pub fn indexed_count(&self) -> Result<u64> {
        self.index.num_docs()
    }

    /// Release the index writer and close the connection pool.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        self.index.shutdown()?;
        self.repository.close().await;
        Ok(())
    }
}

fn already_stored(external_id: i64) -> AddOutcome {
    AddOutcome {
        external_id: Some(external_id),
        repository: RepositoryWrite::AlreadyStored,
        index: IndexWrite::Skipped,
    }
}

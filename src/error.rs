//! Error taxonomy for the store.
//!
//! Repository failures surface as [`StoreError::StorageUnavailable`] and are
//! fatal to the call that hit them. Index failures surface as
//! [`StoreError::IndexUnavailable`] and are recoverable: the repository row
//! that was already committed stays, and reconciliation indexes it later.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// An insert would violate uniqueness of `metadata.external_id`.
    #[error("article {external_id} is already stored")]
    DuplicateKey { external_id: i64 },

    #[error("article not found: {external_id}")]
    NotFound { external_id: i64 },

    /// More than one repository row shares an external id. Only ever logged.
    #[error("{rows} repository rows share article id {external_id}")]
    InconsistentData { external_id: i64, rows: usize },

    #[error("search index unavailable: {0}")]
    IndexUnavailable(#[from] tantivy::TantivyError),

    #[error("content repository unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    #[error("invalid article: {0}")]
    InvalidArticle(String),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn invalid<M: Into<String>>(message: M) -> Self {
        Self::InvalidArticle(message.into())
    }

    /// Whether the error leaves the repository intact and can be healed by
    /// running reconciliation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

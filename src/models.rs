//! Core data models used throughout the store.
//!
//! [`Article`] is the unit of storage handed over by the ingestion side.
//! The remaining types describe what a write or a search produced.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Delimiter used to join tags into the single `metadata.tags` column.
pub const TAG_DELIMITER: &str = "|";

/// An ingested article: extracted body, original payload, and metadata.
///
/// Metadata fields default to the empty string. The surrogate id is
/// assigned by the repository on insert and is only readable inside the
/// crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    pub external_id: Option<i64>,
    #[serde(skip)]
    pub(crate) surrogate_id: Option<i64>,
    pub raw_doc: Option<String>,
    pub cooked_doc: String,
    pub summary: String,
    pub title: String,
    pub date: String,
    pub tags: Vec<String>,
}

impl Article {
    pub fn new(external_id: i64, cooked_doc: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id),
            cooked_doc: cooked_doc.into(),
            ..Self::default()
        }
    }

    pub fn with_raw_doc(mut self, raw_doc: impl Into<String>) -> Self {
        self.raw_doc = Some(raw_doc.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Join tags for storage. An empty tag list is stored as the empty string.
///
/// Empty tags and tags containing the delimiter are rejected; either would
/// read back as a different list.
pub(crate) fn join_tags(tags: &[String]) -> Result<String> {
    if tags.iter().any(String::is_empty) {
        return Err(StoreError::invalid("tags must not be empty"));
    }
    if let Some(tag) = tags.iter().find(|t| t.contains(TAG_DELIMITER)) {
        return Err(StoreError::invalid(format!(
            "tag {:?} must not contain '{}'",
            tag, TAG_DELIMITER
        )));
    }
    Ok(tags.join(TAG_DELIMITER))
}

pub(crate) fn split_tags(stored: &str) -> Vec<String> {
    if stored.is_empty() {
        return Vec::new();
    }
    stored.split(TAG_DELIMITER).map(str::to_string).collect()
}

/// One ranked hit from the full-text index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub external_id: Option<i64>,
    pub body: String,
}

/// What happened on the repository side of an `add_article` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryWrite {
    /// A new row was committed by this call.
    Inserted,
    /// The external id was already stored; nothing was written.
    AlreadyStored,
}

/// What happened on the index side of an `add_article` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexWrite {
    /// Indexed and committed; the article is searchable.
    Indexed,
    /// No index write was attempted.
    Skipped,
    /// The index write or commit failed. The article is stored but not
    /// searchable until reconciliation runs.
    Failed(String),
}

/// Result of ingesting one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub external_id: Option<i64>,
    pub repository: RepositoryWrite,
    pub index: IndexWrite,
}

impl AddOutcome {
    /// Stored and searchable, or already stored by an earlier run.
    pub fn is_complete(&self) -> bool {
        !matches!(self.index, IndexWrite::Failed(_))
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub already_indexed: u64,
    pub healed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_preserves_order() {
        let tags = vec!["sport".to_string(), "oslo".to_string(), "fotball".to_string()];
        let joined = join_tags(&tags).unwrap();
        assert_eq!(joined, "sport|oslo|fotball");
        assert_eq!(split_tags(&joined), tags);
    }

    #[test]
    fn test_empty_tags_stay_empty() {
        assert_eq!(join_tags(&[]).unwrap(), "");
        assert!(split_tags("").is_empty());
    }

    #[test]
    fn test_tag_containing_delimiter_is_rejected() {
        assert!(matches!(
            join_tags(&["a|b".to_string()]),
            Err(StoreError::InvalidArticle(_))
        ));
    }

    #[test]
    fn test_empty_tag_is_rejected() {
        // [""] would be stored as "" and read back as [].
        assert!(matches!(
            join_tags(&[String::new()]),
            Err(StoreError::InvalidArticle(_))
        ));
        assert!(join_tags(&["a".to_string(), String::new()]).is_err());
    }

    #[test]
    fn test_article_deserializes_with_defaults() {
        let article: Article =
            serde_json::from_str(r#"{"external_id": 42, "cooked_doc": "oslo"}"#).unwrap();
        assert_eq!(article.external_id, Some(42));
        assert_eq!(article.cooked_doc, "oslo");
        assert_eq!(article.title, "");
        assert!(article.tags.is_empty());
        assert!(article.raw_doc.is_none());
        assert!(article.surrogate_id.is_none());
    }

    #[test]
    fn test_failed_index_write_is_incomplete() {
        let outcome = AddOutcome {
            external_id: Some(1),
            repository: RepositoryWrite::Inserted,
            index: IndexWrite::Failed("lock busy".to_string()),
        };
        assert!(!outcome.is_complete());
    }
}

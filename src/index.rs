//! On-disk full-text index over article bodies.
//!
//! Built on tantivy. Each article becomes one document with two fields:
//!
//! | Field | Indexing | Stored |
//! |-------|----------|--------|
//! | `art_id` | raw (not tokenized), frequencies | yes |
//! | `art_body` | `article` analyzer, frequencies and positions | yes |
//! | `art_seq` | fast field, append sequence number | no |
//!
//! Bodies are analyzed up front and capped at `token_limit` tokens, then
//! handed to tantivy as pre-tokenized text, so the stored body is always the
//! full text while the indexed terms stop at the cap. Query strings are cut
//! at the same number of analyzer tokens before parsing.
//!
//! # Ranking
//!
//! Hits are ordered by descending score. Equal scores are ordered by
//! `art_seq`, which increases with every appended document across commits
//! and segments, so ties come back in insertion order and the same order
//! decides which tied documents fall inside the limit.
//!
//! # Visibility
//!
//! Appended documents become visible to [`SearchIndex::indexed`] and
//! [`SearchIndex::search`] only after [`SearchIndex::commit`]. The reader is
//! reloaded before every read, so reads always observe the latest commit,
//! including commits made through another handle on the same directory.
//!
//! # Writer lifecycle
//!
//! The writer holds tantivy's directory lock. It is opened lazily by the
//! first [`SearchIndex::index`] call of a batch and released by
//! [`SearchIndex::commit`] or [`SearchIndex::shutdown`]. Opening it reads
//! the highest committed `art_seq` so numbering resumes after a reopen.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, TextFieldIndexing, TextOptions, FAST,
};
use tantivy::tokenizer::{
    LowerCaser, PreTokenizedString, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, Token,
    TokenStream,
};
use tantivy::{
    DocAddress, DocId, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentReader,
    TantivyDocument, TantivyError, Term,
};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::models::SearchHit;

pub const ART_ID_FIELD: &str = "art_id";
pub const ART_BODY_FIELD: &str = "art_body";
pub const ART_SEQ_FIELD: &str = "art_seq";

/// Name under which the body analyzer is registered with tantivy.
pub const ARTICLE_TOKENIZER: &str = "article";

/// Tokens longer than this many bytes are dropped by the analyzer.
const MAX_TOKEN_BYTES: usize = 40;

/// Full-text index operations the store coordinator depends on.
///
/// [`SearchIndex`] is the production implementation; the trait is the seam
/// that lets the coordinator run over any other index.
pub trait ArticleIndex: Send + Sync {
    /// Whether a committed document exists for `external_id`.
    fn indexed(&self, external_id: i64) -> Result<bool>;

    /// Append one document. Not visible until [`ArticleIndex::commit`].
    fn index(&self, external_id: i64, body: &str) -> Result<()>;

    /// Make all appended documents durable and visible.
    fn commit(&self) -> Result<()>;

    /// Up to `limit` hits, by descending score, ties in insertion order.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Number of committed documents.
    fn num_docs(&self) -> Result<u64>;

    /// Drop any open writer without committing.
    fn shutdown(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    art_id: Field,
    art_body: Field,
    art_seq: Field,
}

/// Open writer plus the sequence number the next appended document gets.
struct PendingWriter {
    writer: IndexWriter,
    next_seq: u64,
}

/// Ranking key: score first, then lower sequence numbers first.
type RankKey = (Score, Reverse<u64>);

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    let id_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::WithFreqs),
        )
        .set_stored();

    let body_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(ARTICLE_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    builder.add_text_field(ART_ID_FIELD, id_options);
    builder.add_text_field(ART_BODY_FIELD, body_options);
    builder.add_u64_field(ART_SEQ_FIELD, FAST);
    builder.build()
}

fn article_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_BYTES))
        .filter(LowerCaser)
        .build()
}

/// Tantivy-backed [`ArticleIndex`].
pub struct SearchIndex {
    path: PathBuf,
    index: Index,
    reader: IndexReader,
    fields: Fields,
    analyzer: TextAnalyzer,
    token_limit: usize,
    writer_heap_bytes: usize,
    writer: Mutex<Option<PendingWriter>>,
}

impl SearchIndex {
    /// Create the index under `path` if absent, otherwise open it.
    ///
    /// Safe to call repeatedly for the same directory, including while
    /// another handle on it is alive.
    pub fn initialize(path: &Path, config: &IndexConfig) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let directory = MmapDirectory::open(path).map_err(TantivyError::from)?;
        let index = Index::open_or_create(directory, build_schema())?;

        let analyzer = article_analyzer();
        index
            .tokenizers()
            .register(ARTICLE_TOKENIZER, analyzer.clone());

        let schema = index.schema();
        let fields = Fields {
            art_id: schema.get_field(ART_ID_FIELD)?,
            art_body: schema.get_field(ART_BODY_FIELD)?,
            art_seq: schema.get_field(ART_SEQ_FIELD)?,
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        info!(path = %path.display(), "search index ready");

        Ok(Self {
            path: path.to_path_buf(),
            index,
            reader,
            fields,
            analyzer,
            token_limit: config.token_limit,
            writer_heap_bytes: config.writer_heap_bytes,
            writer: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<PendingWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_writer(&self) -> Result<PendingWriter> {
        let writer = self
            .index
            .writer_with_num_threads(1, self.writer_heap_bytes)?;
        let next_seq = self.committed_max_seq()?.map_or(0, |max| max + 1);
        Ok(PendingWriter { writer, next_seq })
    }

    /// Highest sequence number in the latest commit, if any document exists.
    fn committed_max_seq(&self) -> Result<Option<u64>> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let mut max = None;
        for segment in searcher.segment_readers() {
            if segment.max_doc() == 0 {
                continue;
            }
            let column = segment.fast_fields().u64(ART_SEQ_FIELD)?;
            let segment_max = column.max_value();
            max = Some(max.map_or(segment_max, |m: u64| m.max(segment_max)));
        }
        Ok(max)
    }

    /// Run the body analyzer over `text`, stopping at the token cap.
    fn analyze(&self, text: &str) -> Vec<Token> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while tokens.len() < self.token_limit && stream.advance() {
            tokens.push(stream.token().clone());
        }
        tokens
    }

    /// Cut a query string after its `token_limit`-th analyzer token.
    fn cap_query<'a>(&self, query: &'a str) -> &'a str {
        let tokens = self.analyze(query);
        match tokens.last() {
            Some(last) if tokens.len() == self.token_limit => &query[..last.offset_to],
            _ => query,
        }
    }

    fn hit_from_doc(&self, score: Score, doc: &TantivyDocument) -> SearchHit {
        let external_id = match doc.get_first(self.fields.art_id) {
            Some(OwnedValue::Str(id)) => id.parse().ok(),
            _ => None,
        };
        let body = match doc.get_first(self.fields.art_body) {
            Some(OwnedValue::PreTokStr(pre)) => pre.text.clone(),
            Some(OwnedValue::Str(text)) => text.clone(),
            _ => String::new(),
        };
        SearchHit {
            score,
            external_id,
            body,
        }
    }
}

impl ArticleIndex for SearchIndex {
    fn indexed(&self, external_id: i64) -> Result<bool> {
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let term = Term::from_field_text(self.fields.art_id, &external_id.to_string());
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let count = searcher.search(&query, &Count)?;

        Ok(count > 0)
    }

    fn index(&self, external_id: i64, body: &str) -> Result<()> {
        let tokens = self.analyze(body);

        let mut guard = self.lock_writer();
        let pending = match guard.take() {
            Some(pending) => pending,
            None => self.open_writer()?,
        };
        let pending = guard.insert(pending);
        let seq = pending.next_seq;

        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.art_id, external_id.to_string());
        doc.add_pre_tokenized_text(
            self.fields.art_body,
            PreTokenizedString {
                text: body.to_string(),
                tokens,
            },
        );
        doc.add_u64(self.fields.art_seq, seq);

        pending.writer.add_document(doc)?;
        pending.next_seq += 1;

        debug!(external_id, seq, "article appended to index");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let pending = self.lock_writer().take();
        if let Some(PendingWriter { mut writer, .. }) = pending {
            // On failure the writer is dropped with its uncommitted documents.
            writer.commit()?;
            writer.wait_merging_threads()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query = self.cap_query(query.trim());
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![self.fields.art_body]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        for err in &errors {
            warn!(query, error = %err, "ignoring unparsable part of query");
        }

        let collector =
            TopDocs::with_limit(limit).tweak_score(|segment_reader: &SegmentReader| {
                let seq = segment_reader
                    .fast_fields()
                    .u64(ART_SEQ_FIELD)
                    .ok()
                    .map(|column| column.first_or_default_col(u64::MAX));
                move |doc: DocId, score: Score| -> RankKey {
                    let seq = seq.as_ref().map_or(u64::MAX, |column| column.get_val(doc));
                    (score, Reverse(seq))
                }
            });
        let top: Vec<(RankKey, DocAddress)> = searcher.search(&parsed, &collector)?;

        let mut hits = Vec::with_capacity(top.len());
        for ((score, _), address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(self.hit_from_doc(score, &doc));
        }
        Ok(hits)
    }

    fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    fn shutdown(&self) -> Result<()> {
        if self.lock_writer().take().is_some() {
            warn!(path = %self.path.display(), "discarding uncommitted index documents");
        }
        Ok(())
    }
}

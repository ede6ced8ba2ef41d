//! # Article Store
//!
//! Durable storage for ingested articles with a full-text index over their
//! bodies.
//!
//! Articles arrive fully assembled from the ingestion side (feed polling,
//! fetching and text extraction happen elsewhere). The store keeps the
//! canonical copy in SQLite and mirrors every body into a tantivy inverted
//! index, so articles can be fetched by their external id or found by
//! free-text query.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   Article ────▶ │ ArticleStore │ ── search ───────────┐
//!                 └──────┬───────┘                      │
//!             1. insert  │  2. index + commit           ▼
//!                 ┌──────▼───────┐              ┌──────────────┐
//!                 │   SQLite     │ ─reconcile─▶ │   tantivy    │
//!                 │  store.db    │              │ term_index/  │
//!                 └──────────────┘              └──────────────┘
//! ```
//!
//! The repository commit always precedes the index write, so the index can
//! lag the repository but never lead it. [`store::ArticleStore::reconcile`]
//! indexes whatever a crash or failed index write left behind.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | `StoreError` taxonomy |
//! | [`models`] | `Article` and write/search outcome types |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`repository`] | Content repository over SQLite |
//! | [`index`] | Full-text index over tantivy |
//! | [`store`] | Coordinator: ordered writes, idempotency, reconciliation |

pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod migrate;
pub mod models;
pub mod repository;
pub mod store;

pub use config::Config;
pub use error::{Result, StoreError};
pub use index::{ArticleIndex, SearchIndex};
pub use models::{AddOutcome, Article, IndexWrite, ReconcileReport, RepositoryWrite, SearchHit};
pub use repository::ContentRepository;
pub use store::ArticleStore;

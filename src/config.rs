//! Configuration parsing and validation.
//!
//! The store is configured from a TOML file. Only `[store]` is required;
//! every other table falls back to defaults that match the on-disk layout
//! produced by earlier versions of the store.
//!
//! ```toml
//! [store]
//! root = "./data/store"
//!
//! [db]
//! max_connections = 5
//!
//! [index]
//! token_limit = 1048576
//! writer_heap_bytes = 50000000
//! reconcile_batch = 500
//!
//! [search]
//! default_limit = 10
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the relational store inside the store root.
pub const STORE_DB_FILE: &str = "store.db";

/// Directory name of the full-text index inside the store root.
pub const TERM_INDEX_DIR: &str = "term_index";

/// Smallest writer heap tantivy accepts for a single indexing thread.
pub const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Maximum number of analyzer tokens taken from a document body or a
    /// query string. Applied identically at index and query time.
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_writer_heap_bytes")]
    pub writer_heap_bytes: usize,
    /// Documents indexed between commits during reconciliation.
    #[serde(default = "default_reconcile_batch")]
    pub reconcile_batch: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            writer_heap_bytes: default_writer_heap_bytes(),
            reconcile_batch: default_reconcile_batch(),
        }
    }
}

fn default_token_limit() -> usize {
    1_048_576
}
fn default_writer_heap_bytes() -> usize {
    50_000_000
}
fn default_reconcile_batch() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    10
}

impl Config {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig { root: root.into() },
            db: DbConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
        }
    }

    pub fn store_db_path(&self) -> PathBuf {
        self.store.root.join(STORE_DB_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.store.root.join(TERM_INDEX_DIR)
    }

    /// Check value ranges. Called by [`load_config`]; library callers that
    /// build a `Config` by hand may call it directly.
    pub fn validate(&self) -> Result<()> {
        if self.store.root.as_os_str().is_empty() {
            anyhow::bail!("store.root must not be empty");
        }

        if self.db.max_connections == 0 {
            anyhow::bail!("db.max_connections must be >= 1");
        }

        if self.index.token_limit == 0 {
            anyhow::bail!("index.token_limit must be >= 1");
        }

        if self.index.writer_heap_bytes < MIN_WRITER_HEAP_BYTES {
            anyhow::bail!(
                "index.writer_heap_bytes must be >= {}",
                MIN_WRITER_HEAP_BYTES
            );
        }

        if self.index.reconcile_batch == 0 {
            anyhow::bail!("index.reconcile_batch must be >= 1");
        }

        if self.search.default_limit == 0 {
            anyhow::bail!("search.default_limit must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.validate()?;

    Ok(config)
}

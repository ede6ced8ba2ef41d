//! # Article Store CLI (`artstore`)
//!
//! Operator tool over the article store library: initialize a store,
//! import articles handed over by the ingestion side, inspect and search
//! what is stored, and heal the index after an interrupted run.
//!
//! ## Usage
//!
//! ```bash
//! artstore --config ./config/artstore.toml <command>
//! artstore --root ./data/store <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `artstore init` | Create the database schema and the index directory |
//! | `artstore import <file>` | Add articles from a JSON-lines file |
//! | `artstore get <id>` | Print a stored article |
//! | `artstore has <id>` | Exit 0 if the article is stored, 1 otherwise |
//! | `artstore ids` | List stored ids with non-empty content |
//! | `artstore search "<query>"` | Ranked full-text search |
//! | `artstore reconcile` | Index stored articles missing from the index |
//! | `artstore stats` | Row and index document counts |
//!
//! Logs go to stderr and honour `RUST_LOG`.

use anyhow::{Context, Result};
use article_store::config::{self, Config};
use article_store::{Article, ArticleStore, IndexWrite, RepositoryWrite, StoreError};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Article Store CLI — durable article storage with full-text search.
#[derive(Parser)]
#[command(
    name = "artstore",
    about = "Article Store — durable article storage with a full-text index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/artstore.toml")]
    config: PathBuf,

    /// Store root directory. Overrides `--config` and uses default settings.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store.
    ///
    /// Creates the store root, the SQLite schema and the index directory.
    /// Running it again is safe.
    Init,

    /// Add articles from a JSON-lines file (one article object per line).
    ///
    /// Articles whose id is already stored are skipped.
    Import {
        /// Path to the `.jsonl` file, or `-` for stdin.
        path: PathBuf,
    },

    /// Print a stored article.
    Get {
        /// External article id.
        id: i64,

        /// Print every stored row for the id instead of the first one.
        #[arg(long)]
        all: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Check whether an article is stored.
    Has {
        /// External article id.
        id: i64,
    },

    /// List stored article ids.
    Ids {
        /// Include articles with empty extracted text.
        #[arg(long)]
        all: bool,
    },

    /// Search article bodies.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Index stored articles that are missing from the index.
    Reconcile,

    /// Show repository and index counts.
    Stats,
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    match &cli.root {
        Some(root) => {
            let cfg = Config::with_root(root);
            cfg.validate()?;
            Ok(cfg)
        }
        None => config::load_config(&cli.config),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("article_store=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;
    let store = ArticleStore::open(&cfg)
        .await
        .with_context(|| format!("Failed to open store at {}", cfg.store.root.display()))?;

    let result = run(&cli.command, &cfg, &store).await;
    let closed = store.close().await;

    let code = match result {
        Ok(code) => {
            closed?;
            code
        }
        Err(err) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "failed to close store");
            }
            return Err(err);
        }
    };

    match code {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

/// Run one command and return the process exit code.
async fn run(command: &Commands, cfg: &Config, store: &ArticleStore) -> Result<i32> {
    match command {
        Commands::Init => {
            println!("Store initialized at {}", cfg.store.root.display());
        }
        Commands::Import { path } => {
            return run_import(store, path).await;
        }
        Commands::Get { id, all, json } => {
            let articles = if *all {
                store.get_article_duplicates(*id).await?
            } else {
                match store.get_article(*id).await {
                    Ok(article) => vec![article],
                    Err(StoreError::NotFound { .. }) => Vec::new(),
                    Err(e) => return Err(e.into()),
                }
            };

            if articles.is_empty() {
                eprintln!("Error: article not found: {}", id);
                return Ok(1);
            }

            if *json {
                if *all {
                    println!("{}", serde_json::to_string_pretty(&articles)?);
                } else {
                    println!("{}", serde_json::to_string_pretty(&articles[0])?);
                }
            } else {
                for article in &articles {
                    print_article(article);
                }
            }
        }
        Commands::Has { id } => {
            let stored = store.has_article(*id).await?;
            println!("{}", stored);
            if !stored {
                return Ok(1);
            }
        }
        Commands::Ids { all } => {
            let mut ids = store.list_ids(!*all);
            while let Some(id) = ids.try_next().await? {
                println!("{}", id);
            }
        }
        Commands::Search { query, limit } => {
            let limit = limit.unwrap_or(cfg.search.default_limit);
            let hits = store.search(query, limit)?;

            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let id = hit
                    .external_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("{}. [{:.3}] article {}", i + 1, hit.score, id);
                println!("    excerpt: \"{}\"", excerpt(&hit.body, 160));
            }
        }
        Commands::Reconcile => {
            let report = store.reconcile().await?;
            println!("reconcile");
            println!("  scanned: {}", report.scanned);
            println!("  already indexed: {}", report.already_indexed);
            println!("  healed: {}", report.healed);
            println!("ok");
        }
        Commands::Stats => {
            let rows = store.count().await?;
            let indexed = store.indexed_count()?;
            println!("Article Store — Stats");
            println!("=====================");
            println!();
            println!("  Root:         {}", cfg.store.root.display());
            println!("  Content rows: {}", rows);
            println!("  Indexed docs: {}", indexed);
            println!();
        }
    }

    Ok(0)
}

async fn run_import(store: &ArticleStore, path: &Path) -> Result<i32> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(std::io::BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open import file: {}", path.display()))?;
        Box::new(std::io::BufReader::new(file))
    };

    let mut read = 0u64;
    let mut inserted = 0u64;
    let mut skipped = 0u64;
    let mut index_failures = 0u64;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let article: Article = serde_json::from_str(&line)
            .with_context(|| format!("Invalid article on line {}", line_no + 1))?;
        read += 1;

        let outcome = store.add_article(&article).await?;
        match outcome.repository {
            RepositoryWrite::Inserted => inserted += 1,
            RepositoryWrite::AlreadyStored => skipped += 1,
        }
        if let IndexWrite::Failed(_) = outcome.index {
            index_failures += 1;
        }
    }

    println!("import");
    println!("  read: {} articles", read);
    println!("  inserted: {}", inserted);
    println!("  already stored: {}", skipped);
    println!("  index failures: {}", index_failures);

    if index_failures > 0 {
        println!("run `artstore reconcile` to index the remaining articles");
        return Ok(2);
    }
    println!("ok");
    Ok(0)
}

fn print_article(article: &Article) {
    println!("--- Article ---");
    match article.external_id {
        Some(id) => println!("id:       {}", id),
        None => println!("id:       (none)"),
    }
    println!("title:    {}", article.title);
    println!("date:     {}", article.date);
    println!("summary:  {}", article.summary);
    println!("tags:     {}", article.tags.join(", "));
    println!();
    println!("--- Body ---");
    println!("{}", article.cooked_doc);
    println!();
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let flat = body.replace('\n', " ");
    let trimmed = flat.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

//! # RAG Harness CLI (`rag`)
//!
//! The `rag` binary drives the ingestion and query pipelines.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite schema and provision the vector index |
//! | `rag ingest` | Load, chunk, embed, and store the configured document |
//! | `rag search "<query>"` | Print the chunks retrieved for a query |
//! | `rag ask "<question>"` | Answer a question from the retrieved chunks |
//! | `rag stats` | Show record counts and the index definition |
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); results go to stdout.
//! Any failure exits with status 1.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rag_harness::search::QueryOverrides;
use rag_harness::{ask, config, ingest, migrate, search, stats};

/// RAG Harness CLI — ingest one document and answer questions from it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness — a minimal retrieval-augmented generation pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and provision the vector index.
    ///
    /// Idempotent. Refuses to change the dimensions or model of an existing
    /// index unless `--force` is given.
    Init {
        /// Replace an existing index definition.
        #[arg(long)]
        force: bool,
    },

    /// Ingest the configured document.
    ///
    /// Loads the document, splits it into token-sized chunks, embeds every
    /// chunk concurrently, clears the collection (unless `--append`), and
    /// inserts the records.
    Ingest {
        /// Ingest this file instead of `[document].path`.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Keep existing records instead of clearing the collection.
        #[arg(long)]
        append: bool,

        /// Load and chunk only; print counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve the chunks closest to a query.
    Search {
        /// Query text.
        query: String,

        #[command(flatten)]
        retrieval: RetrievalArgs,
    },

    /// Answer a question grounded in the retrieved chunks.
    Ask {
        /// The question.
        question: String,

        #[command(flatten)]
        retrieval: RetrievalArgs,

        /// Print the retrieved context before the answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Show record counts and index details.
    Stats,
}

#[derive(clap::Args)]
struct RetrievalArgs {
    /// Number of results to return.
    #[arg(long)]
    limit: Option<u32>,

    /// Candidate pool for approximate search.
    #[arg(long)]
    num_candidates: Option<u32>,

    /// Exhaustive (exact) search instead of approximate.
    #[arg(long)]
    exact: bool,

    /// Only retrieve records from this source.
    #[arg(long, conflicts_with = "all_sources")]
    source: Option<String>,

    /// Retrieve from every source, ignoring the configured filter.
    #[arg(long)]
    all_sources: bool,
}

impl RetrievalArgs {
    fn overrides(&self) -> QueryOverrides {
        QueryOverrides {
            limit: self.limit,
            num_candidates: self.num_candidates,
            exact: self.exact,
            source: self.source.clone(),
            all_sources: self.all_sources,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "rag_harness=debug,rag=debug"
    } else {
        "rag_harness=info,rag=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "command failed");
            println!("Error: {:?}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { force } => {
            migrate::run_init(&cfg, force).await?;
        }
        Commands::Ingest {
            file,
            append,
            dry_run,
        } => {
            ingest::run_ingest(&cfg, file, append, dry_run).await?;
        }
        Commands::Search { query, retrieval } => {
            search::run_search(&cfg, &query, &retrieval.overrides()).await?;
        }
        Commands::Ask {
            question,
            retrieval,
            show_context,
        } => {
            ask::run_ask(&cfg, &question, &retrieval.overrides(), show_context).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

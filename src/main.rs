//! # Hybrid Context CLI (`hctx`)
//!
//! Operator interface to the retrieval engine: initialize the database,
//! ingest files, run searches, and manage documents and agent links.
//!
//! ## Usage
//!
//! ```bash
//! hctx --config ./config/hctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hctx init` | Create the SQLite database and schema |
//! | `hctx ingest <path> --owner <id>` | Chunk, enrich, embed and store a PDF or text file |
//! | `hctx search "<query>" --owner <id>` | Hybrid search over an owner's documents |
//! | `hctx context "<query>" --owner <id>` | Prompt-ready context for a query |
//! | `hctx get <id> --owner <id>` | Show a document and its chunks |
//! | `hctx list --owner <id>` | List an owner's documents |
//! | `hctx delete <id> --owner <id>` | Delete a document |
//! | `hctx migrate <id> --owner <id>` | Add generated context to an existing document |
//! | `hctx link <agent> <doc> --owner <id>` | Give an agent access to a document |
//! | `hctx unlink <agent> <doc>` | Remove an agent link |
//! | `hctx stats` | Database summary |
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=hybrid_context=debug`)
//! to change verbosity.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hybrid_context::{config, documents, ingest, migrate, search, stats};

/// Hybrid Context CLI: semantic + BM25 retrieval with generated chunk
/// context.
#[derive(Parser)]
#[command(
    name = "hctx",
    about = "Hybrid Context: semantic + BM25 document retrieval with contextual enrichment",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest a PDF or text file.
    Ingest {
        /// File to ingest.
        path: PathBuf,

        #[arg(long)]
        owner: String,

        /// Document title (defaults to the file name).
        #[arg(long)]
        title: Option<String>,

        /// `pdf` or `text` (inferred from the extension when omitted).
        #[arg(long = "type")]
        file_type: Option<String>,
    },

    /// Search an owner's documents.
    Search {
        query: String,

        #[arg(long)]
        owner: String,

        /// Restrict to documents linked to this agent.
        #[arg(long)]
        agent: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity for semantic matches.
        #[arg(long)]
        threshold: Option<f64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build prompt context for a query.
    Context {
        query: String,

        #[arg(long)]
        owner: String,

        #[arg(long)]
        agent: Option<String>,

        /// Character budget for the returned context.
        #[arg(long, default_value_t = 2000)]
        max_tokens: usize,
    },

    /// Show a document with its chunks.
    Get {
        id: String,

        #[arg(long)]
        owner: String,
    },

    /// List an owner's documents, newest first.
    List {
        #[arg(long)]
        owner: String,
    },

    /// Delete a document, its chunks and agent links.
    Delete {
        id: String,

        #[arg(long)]
        owner: String,
    },

    /// Generate context for chunks of an existing document that lack it.
    Migrate {
        id: String,

        #[arg(long)]
        owner: String,
    },

    /// Link an agent to a document.
    Link {
        agent: String,
        document: String,

        #[arg(long)]
        owner: String,
    },

    /// Remove an agent link.
    Unlink { agent: String, document: String },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            owner,
            title,
            file_type,
        } => {
            ingest::run_ingest(&cfg, &path, &owner, title, file_type).await?;
        }
        Commands::Search {
            query,
            owner,
            agent,
            limit,
            threshold,
            json,
        } => {
            search::run_search(&cfg, &query, &owner, agent, limit, threshold, json).await?;
        }
        Commands::Context {
            query,
            owner,
            agent,
            max_tokens,
        } => {
            search::run_context(&cfg, &query, &owner, agent, max_tokens).await?;
        }
        Commands::Get { id, owner } => {
            documents::run_get(&cfg, &id, &owner).await?;
        }
        Commands::List { owner } => {
            documents::run_list(&cfg, &owner).await?;
        }
        Commands::Delete { id, owner } => {
            documents::run_delete(&cfg, &id, &owner).await?;
        }
        Commands::Migrate { id, owner } => {
            ingest::run_migrate(&cfg, &id, &owner).await?;
        }
        Commands::Link {
            agent,
            document,
            owner,
        } => {
            documents::run_link(&cfg, &agent, &document, &owner).await?;
        }
        Commands::Unlink { agent, document } => {
            documents::run_unlink(&cfg, &agent, &document).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

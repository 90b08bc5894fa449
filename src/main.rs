//! # Issue Dedup CLI (`dedup`)
//!
//! ## Usage
//!
//! ```bash
//! dedup --config ./config/dedup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dedup ingest --corpus <file>` | Embed a corpus and publish a new artifact set |
//! | `dedup search --summary .. --description ..` | One-shot duplicate lookup |
//! | `dedup serve` | Start the HTTP server |
//! | `dedup stats` | Summarize the published artifact set |
//!
//! Log verbosity is controlled by `DEDUP_LOG` (e.g. `DEDUP_LOG=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use issue_dedup::{config, ingest, query, server, stats};

/// Issue Dedup CLI: find likely duplicates of a bug report in an existing
/// issue corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dedup.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dedup",
    about = "Issue Dedup — semantic duplicate detection for bug reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dedup.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed an issue corpus and publish a new artifact set.
    ///
    /// Unchanged issues reuse their cached embedding. The previous artifact
    /// set stays in place until the new one is complete.
    Ingest {
        /// JSON array of `{id, summary, description}` objects.
        #[arg(long)]
        corpus: PathBuf,
    },

    /// Look up likely duplicates of a single report.
    Search {
        /// Report title.
        #[arg(long)]
        summary: String,

        /// Report body.
        #[arg(long, default_value = "")]
        description: String,

        /// Number of nearest neighbors to consider (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,

        /// Print `{"matches": [...]}` instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server.
    Serve,

    /// Summarize the published artifact set.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DEDUP_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { corpus } => {
            ingest::run_ingest(&cfg, &corpus).await?;
        }
        Commands::Search {
            summary,
            description,
            k,
            json,
        } => {
            query::run_search(&cfg, &summary, &description, k, json).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}

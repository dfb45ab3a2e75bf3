//! # Pathwise CLI (`pathwise`)
//!
//! Builds the knowledge-base index and serves relevance-gated lookups and
//! roadmap enrichment from it.
//!
//! ## Usage
//!
//! ```bash
//! pathwise --config ./config/pathwise.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pathwise build` | Load, embed, and upsert the knowledge base |
//! | `pathwise query "<objective>"` | Relevance-gated top-k lookup |
//! | `pathwise enrich <roadmap.json>` | Attach sources to every roadmap step |
//! | `pathwise info` | Show collection metadata and entry count |
//!
//! Command output (JSON) goes to stdout; logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};

use pathwise::builder::build_index;
use pathwise::config;
use pathwise::enrich::RoadmapDocument;
use pathwise::logging;
use pathwise::retrieval::RetrievalService;

/// Pathwise: retrieval-augmented learning-roadmap enrichment.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pathwise.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pathwise",
    about = "Pathwise: relevance-gated knowledge-base retrieval for learning roadmaps",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pathwise.toml`. A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/pathwise.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build (or rebuild) the index from the knowledge-base directory.
    ///
    /// Re-running over the same directory overwrites existing entries.
    /// Entries whose source records were removed are not deleted.
    Build {
        /// Knowledge-base directory (overrides `sources.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Look up sources for one learning objective.
    Query {
        /// The objective or question to look up.
        query: String,

        /// Maximum number of sources (defaults to `retrieval.default_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Relevance threshold override (maximum nearest distance).
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Enrich a roadmap file with sources for every learning objective.
    ///
    /// Accepts a JSON array of steps, or an object carrying the steps under
    /// `personalized_learning_path` (directly or inside `career_advice`).
    /// Prints the enriched roadmap in the same shape.
    Enrich {
        /// Path to the roadmap JSON file.
        roadmap: PathBuf,

        /// Sources per objective (defaults to `retrieval.default_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show collection metadata and entry count.
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { data_dir } => {
            if let Some(dir) = data_dir {
                cfg.sources.data_dir = dir;
            }
            let report = build_index(&cfg).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query {
            query,
            k,
            threshold,
        } => {
            let service = RetrievalService::open(&cfg).await?;
            let result = service.query(&query, k, threshold).await;
            service.close().await;
            println!("{}", serde_json::to_string_pretty(&result?)?);
        }
        Commands::Enrich { roadmap, k } => {
            let raw = std::fs::read_to_string(&roadmap)
                .with_context(|| format!("Failed to read roadmap: {}", roadmap.display()))?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("roadmap is not valid JSON")?;
            let (steps, frame) = RoadmapDocument::from_value(value)?.into_parts();

            let service = RetrievalService::open(&cfg).await?;
            let outcome = service.enrich(steps, k).await;
            service.close().await;

            if !outcome.failures.is_empty() {
                warn!(
                    failed = outcome.failures.len(),
                    "some objectives were left without sources"
                );
            }
            let enriched = RoadmapDocument::reassemble(outcome.steps, frame)?;
            println!("{}", serde_json::to_string_pretty(&enriched)?);
        }
        Commands::Info => {
            let service = RetrievalService::open(&cfg).await?;
            let count = service.count().await;
            let info = service.collection().clone();
            service.close().await;

            let mut value = serde_json::to_value(&info)?;
            value["count"] = serde_json::json!(count?);
            value["default_k"] = serde_json::json!(cfg.retrieval.default_k);
            value["relevance_threshold"] =
                serde_json::json!(cfg.retrieval.relevance_threshold);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

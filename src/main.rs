//! # Pattern Loom CLI (`loom`)
//!
//! The `loom` binary is the primary interface for the classification
//! engine. It can run the HTTP gateway, classify a single text from the
//! command line, or validate an index artifact without publishing it.
//!
//! ## Usage
//!
//! ```bash
//! loom [--config ./config/loom.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loom serve` | Start the HTTP gateway and load the configured artifact |
//! | `loom classify "<text>"` | One-shot classification, printed as JSON |
//! | `loom inspect` | Validate an artifact and print its header and domains |
//!
//! ## Examples
//!
//! ```bash
//! # Serve with the default configuration
//! loom serve
//!
//! # Classify against a specific artifact
//! loom classify "early morning nap in the crib" --artifact ./patterns.loom.json
//!
//! # Restrict to one domain with a custom threshold
//! loom classify "picnic by the lake" --domain health --threshold 0.3
//!
//! # Check an artifact produced by the cold path
//! loom inspect --artifact ./patterns.loom.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use pattern_loom::classifier::{Classifier, Deadline};
use pattern_loom::config::{load_config, Config};
use pattern_loom::embedding::create_provider;
use pattern_loom::loader::IndexLoader;
use pattern_loom::models::{ClassificationRequest, ClassificationResponse, WeaveUnit};
use pattern_loom::server::{run_server, AppState};

/// Pattern Loom — classify short observations into a hierarchical
/// pattern taxonomy by embedding similarity.
#[derive(Parser)]
#[command(
    name = "loom",
    about = "Pattern Loom — hot-path pattern classification over an in-memory vector index",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. When omitted, built-in
    /// defaults plus `LOOM_*` environment overrides apply.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway.
    ///
    /// Attempts to load the configured artifact at boot; when that fails
    /// the gateway starts with an empty index (classify answers
    /// `index_empty`) and `/reload-patterns` can populate it later.
    Serve,

    /// Classify one text and print the response as JSON.
    Classify {
        /// The observation text to classify.
        text: String,
        /// Cap on ranked alternatives (1–10).
        #[arg(long)]
        max_alternatives: Option<u32>,
        /// Minimum confidence for a match (0–1).
        #[arg(long)]
        threshold: Option<f64>,
        /// Only consider patterns in this domain.
        #[arg(long)]
        domain: Option<String>,
        /// Artifact to load; defaults to the configured path.
        #[arg(long)]
        artifact: Option<PathBuf>,
    },

    /// Validate an artifact and print its header and domain counts
    /// without publishing anything.
    Inspect {
        /// Artifact to inspect; defaults to the configured path.
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Classify {
            text,
            max_alternatives,
            threshold,
            domain,
            artifact,
        } => classify_once(config, text, max_alternatives, threshold, domain, artifact),
        Commands::Inspect { artifact } => inspect(config, artifact),
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let provider = create_provider(&config.embedding)?;
    info!(
        descriptor = provider.descriptor(),
        dim = provider.dimension(),
        "embedding provider ready"
    );

    let classifier = Arc::new(Classifier::new(Arc::clone(&provider)));
    let loader = Arc::new(IndexLoader::new(provider));

    match loader.load_and_publish(&config.index.artifact, &classifier) {
        Ok(outcome) => info!(
            patterns = outcome.pattern_count,
            load_time_ms = outcome.load_time_ms,
            "initial index loaded"
        ),
        Err(e) => warn!(
            artifact = %config.index.artifact.display(),
            error = %e,
            "starting with an empty index; publish one via /reload-patterns"
        ),
    }

    run_server(AppState::new(config, classifier, loader)).await
}

fn classify_once(
    config: Config,
    text: String,
    max_alternatives: Option<u32>,
    threshold: Option<f64>,
    domain: Option<String>,
    artifact: Option<PathBuf>,
) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let classifier = Classifier::new(Arc::clone(&provider));
    let loader = IndexLoader::new(provider);

    let path = artifact.unwrap_or_else(|| config.index.artifact.clone());
    let snapshot = loader
        .load_from_path(&path)
        .with_context(|| format!("Failed to load artifact {}", path.display()))?;
    classifier.publish(Arc::new(snapshot));

    let request = ClassificationRequest {
        weave_unit: WeaveUnit::new(text),
        max_alternatives: max_alternatives.unwrap_or(config.engine.max_alternatives),
        confidence_threshold: threshold.unwrap_or(config.engine.confidence_threshold),
        filter_by_domain: domain,
    };

    let response = match classifier.classify(&request, &Deadline::unbounded()) {
        Ok(response) => response,
        Err(e) => {
            let request_id = request.weave_unit.id.unwrap_or_default();
            ClassificationResponse::failure(request_id, &e, 0.0)
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn inspect(config: Config, artifact: Option<PathBuf>) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let loader = IndexLoader::new(provider);

    let path = artifact.unwrap_or_else(|| config.index.artifact.clone());
    let parsed = loader
        .read_artifact(&path)
        .with_context(|| format!("Failed to read artifact {}", path.display()))?;

    println!("artifact: {}", path.display());
    println!("  schema version: {}", parsed.header.schema_version);
    println!("  model descriptor: {}", parsed.header.model_descriptor);
    println!("  vector dim: {}", parsed.header.vector_dim);
    println!("  declared count: {}", parsed.header.count);
    println!("  embedding source: {:?}", parsed.header.embedding_source);

    let snapshot = loader
        .build_snapshot(&parsed)
        .with_context(|| "Artifact failed validation")?;
    println!("validation: ok ({} patterns)", snapshot.len());
    println!("domains:");
    for (domain, count) in snapshot.catalogue().domains() {
        println!("  {domain}: {count}");
    }
    Ok(())
}

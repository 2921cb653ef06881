//! mvr CLI - Command-line interface for multi-strategy retrieval.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mvr_core::{MvrConfig, NewDocument};
use mvr_service::{
    IngestParams, MetricsParams, RetrievalService, SearchParams, StrategiesParams, ToolResult,
};

/// mvr - Multi-strategy retrieval with rank fusion and reranking
#[derive(Parser)]
#[command(name = "mvr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Index path (default: from configuration)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Configuration file (default: ~/.config/mvr/config.toml, then ./mvr.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index
    Init,

    /// Ingest documents from a JSON array of {id?, content, metadata}
    Ingest {
        /// Path to the JSON file
        path: PathBuf,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        max_results: Option<usize>,

        /// Skip reranking
        #[arg(long)]
        no_rerank: bool,

        /// Conversation session id; turns are kept in the index database and
        /// feed query intelligence when `intelligence.model` is configured
        #[arg(long)]
        session: Option<String>,

        /// Print the structured response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show quality metrics for a query
    Metrics {
        /// Query to evaluate
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        max_results: Option<usize>,
    },

    /// Show strategy weights
    Strategies {
        /// Show weights adjusted for this query
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show statistics
    Stats,
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn load_config(path: Option<&Path>) -> Result<MvrConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => MvrConfig::load(path)?,
        None => MvrConfig::load_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(path) = cli.database {
        config.database.path = path;
    }
    let db_path = config.database.path.clone();
    debug!("Using index at {:?}", db_path);

    match cli.command {
        Commands::Init => {
            init_database(&db_path, config)?;
        }
        Commands::Ingest { path } => {
            let service = get_service(&db_path, config)?;
            ingest(&service, &path).await?;
        }
        Commands::Search {
            query,
            max_results,
            no_rerank,
            session,
            json,
        } => {
            let service = get_service(&db_path, config)?;
            let params = SearchParams {
                query,
                max_results,
                rerank: no_rerank.then_some(false),
                session_id: session,
            };
            report(service.search(params).await, json)?;
        }
        Commands::Metrics { query, max_results } => {
            let service = get_service(&db_path, config)?;
            let params = MetricsParams { query, max_results };
            report(service.quality_metrics(params).await, false)?;
        }
        Commands::Strategies { query } => {
            let service = get_service(&db_path, config)?;
            report(service.strategies(StrategiesParams { query }), false)?;
        }
        Commands::Stats => {
            let service = get_service(&db_path, config)?;
            report(service.stats().await, false)?;
        }
    }

    Ok(())
}

fn init_database(db_path: &Path, config: MvrConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Opening the service creates the index and its parent directory
    let _service = RetrievalService::new(db_path, config)?;
    println!("Initialized index at: {}", db_path.display());
    Ok(())
}

fn get_service(
    db_path: &Path,
    config: MvrConfig,
) -> Result<RetrievalService, Box<dyn std::error::Error>> {
    if !db_path.exists() {
        eprintln!(
            "Index does not exist at {}. Run 'mvr init' first, or specify a path with -d.",
            db_path.display()
        );
        std::process::exit(1);
    }

    Ok(RetrievalService::new(db_path, config)?)
}

async fn ingest(service: &RetrievalService, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let documents: Vec<NewDocument> = serde_json::from_str(&content)?;

    if documents.is_empty() {
        println!("No documents found in: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} document(s)...", documents.len());
    report(service.ingest(IngestParams { documents }).await, false)
}

fn report(result: ToolResult, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !result.success {
        eprintln!("Error: {}", result.message);
        std::process::exit(1);
    }

    match (&result.data, json) {
        (Some(data), true) => println!("{}", serde_json::to_string_pretty(data)?),
        _ => println!("{}", result.message),
    }
    Ok(())
}

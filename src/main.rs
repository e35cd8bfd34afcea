//! reflect_rag CLI - main entry point
//!
//! Builds a retrieval session for one user and answers queries, or prints
//! corpus statistics and graph insights.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reflect_rag::{metrics, Config, HybridRetriever, RetrievalStrategy};

#[derive(Parser)]
#[command(name = "reflect_rag")]
#[command(about = "Hybrid vector + knowledge-graph context retrieval", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML config file (defaults to reflect_rag.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Corpus root directory (overrides config)
    #[arg(long, global = true, env = "RAG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true, default_value_t = false)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve ranked context for a query
    Query {
        /// User whose corpus is searched
        #[arg(short, long)]
        user: String,

        /// Query text
        text: String,

        /// Number of results (defaults to config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Retrieval mode: hybrid | vector | graph
        #[arg(short, long)]
        mode: Option<String>,

        /// Print results and summary as JSON
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Only use the previous calendar week
        #[arg(long, default_value_t = false)]
        last_week: bool,
    },

    /// Corpus statistics and graph stats as JSON
    Stats {
        #[arg(short, long)]
        user: String,
    },

    /// Graph insights as JSON
    Insights {
        #[arg(short, long)]
        user: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Query { .. } => "query",
            Commands::Stats { .. } => "stats",
            Commands::Insights { .. } => "insights",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reflect_rag=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::new(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(cli.command, &config).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    if cli.print_metrics {
        print!("{}", metrics::render());
    }

    result
}

async fn execute_command(command: Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Query {
            user,
            text,
            top_k,
            mode,
            json,
            last_week,
        } => {
            let strategy = match mode {
                Some(mode) => mode.parse::<RetrievalStrategy>()?,
                None => config.strategy,
            };
            let top_k = top_k.unwrap_or(config.top_k);

            let retriever = HybridRetriever::from_config(config)?
                .last_week_only(last_week || config.last_week_only);
            let session = retriever.open_session(&user).await?;
            let outcome = session.retrieve_with(&text, top_k, strategy).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }

            info!(
                intent = %outcome.summary.intent,
                strategy = %outcome.summary.strategy,
                "Vector results: {}, graph results: {}",
                outcome.summary.vector_count,
                outcome.summary.graph_count
            );

            if outcome.results.is_empty() {
                println!("No context found for \"{}\"", text);
                return Ok(());
            }

            for (i, result) in outcome.results.iter().enumerate() {
                let date = result
                    .entity
                    .start
                    .map(|s| s.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let mut line = format!(
                    "{}. [{:.3}] {} ({}, {}, {})",
                    i + 1,
                    result.score,
                    result.entity.title,
                    result.entity.kind.as_str(),
                    result.source,
                    date
                );
                if let Some(label) = &result.emotion_label {
                    line.push_str(&format!(" emotion: {}", label));
                }
                if !result.matched_keywords.is_empty() {
                    line.push_str(&format!(" keywords: {}", result.matched_keywords.join(", ")));
                }
                println!("{line}");
            }
        }
        Commands::Stats { user } => {
            let session = open_graph_session(config, &user).await?;
            println!("{}", serde_json::to_string_pretty(&session.stats())?);
        }
        Commands::Insights { user } => {
            let session = open_graph_session(config, &user).await?;
            println!("{}", serde_json::to_string_pretty(&session.insights())?);
        }
    }

    Ok(())
}

/// Session for read-only reporting; embeddings are not needed.
async fn open_graph_session(
    config: &Config,
    user: &str,
) -> anyhow::Result<reflect_rag::RetrievalSession> {
    let mut config = config.clone();
    config.embedding.backend = reflect_rag::analysis::EmbeddingBackend::Disabled;
    let retriever =
        HybridRetriever::from_config(&config)?.last_week_only(config.last_week_only);
    Ok(retriever.open_session(user).await?)
}

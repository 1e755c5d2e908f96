//! # memexd
//!
//! Daemon and CLI for memex, a semantic filesystem index.
//!
//! memexd watches directory trees, embeds file contents locally, and
//! keeps a persistent vector index that can be searched by meaning.
//!
//! ## Commands
//!
//! - `memexd start` - run the indexing pipeline until SIGINT/SIGTERM
//! - `memexd search <QUERY>` - search indexed files by meaning
//! - `memexd status` - show index statistics
//! - `memexd config show|init|path` - manage configuration
//!
//! ## Examples
//!
//! ```bash
//! # Start watching and indexing (Ctrl+C to stop)
//! memexd start
//!
//! # Search
//! memexd search "user authentication"
//!
//! # JSON output
//! memexd search "vector database" --format json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memex_core::{Embedder, IndexStats, VectorStore};
use memex_embed::{EmbedderPool, MiniLmEmbedder, RetryPolicy};
use memex_index::{
    BatchSettings, IndexUpdate, IndexerPipeline, PathFilter, PipelineConfig,
};
use memex_query::QueryExecutor;
use memex_store::LanceStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{data_dir, Config};

/// Embedding dimension for all-MiniLM-L6-v2.
const EMBEDDING_DIM: usize = 384;

#[derive(Parser)]
#[command(name = "memexd")]
#[command(about = "Semantic filesystem index daemon")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/memex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexing pipeline and block until shutdown
    Start,

    /// Search the index by meaning
    Search {
        /// Query text
        query: String,

        /// Maximum results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
    },

    /// Show index status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Print sample configuration file
    Init,
    /// Show config file path
    Path,
}

/// Output structure for query results.
#[derive(Serialize)]
struct QueryOutput {
    query: String,
    results: Vec<ResultItem>,
}

#[derive(Serialize)]
struct ResultItem {
    file: String,
    score: f32,
    size: u64,
    modified: String,
}

/// Output structure for status.
#[derive(Serialize)]
struct StatusOutput {
    store_path: String,
    total_documents: u64,
    total_files: u64,
    index_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(ref path) = cli.config {
        Config::load_from(Some(path.clone())).map_err(anyhow::Error::msg)?
    } else {
        Config::load().map_err(anyhow::Error::msg)?
    };
    Ok(config)
}

/// Build the embedder stack shared by `start` and `search`.
async fn create_embedder() -> Result<Arc<dyn Embedder>> {
    let models_dir = data_dir()
        .context("Failed to resolve data directory")?
        .join("models");

    let embedder = MiniLmEmbedder::new(models_dir);
    info!("Initializing embedder (first run downloads the model)...");
    embedder
        .init()
        .await
        .context("Failed to initialize embedder")?;

    Ok(Arc::new(embedder))
}

fn create_store(config: &Config) -> Result<Arc<LanceStore>> {
    let db_path = config
        .store_path()
        .context("Failed to resolve store path")?;
    Ok(Arc::new(LanceStore::new(
        db_path,
        EMBEDDING_DIM,
        config.embedding.model.clone(),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Start => {
            if config.watch.roots.is_empty() {
                anyhow::bail!(
                    "No watch roots configured. Add [watch] roots to the config file \
                     (see 'memexd config init')."
                );
            }

            let store = create_store(&config)?;
            let embedder = create_embedder().await?;

            let retry = RetryPolicy {
                max_attempts: config.embedding.max_attempts,
                retry_delay: Duration::from_millis(config.embedding.retry_delay_ms),
                timeout: Duration::from_secs(config.embedding.timeout_secs),
            };
            let pool = Arc::new(EmbedderPool::with_retry(
                embedder,
                config.embedding.max_concurrent,
                retry,
            ));

            let pipeline_config = PipelineConfig {
                roots: config.watch.roots.clone(),
                filter: PathFilter {
                    extensions: config.watch.extensions.clone(),
                    ignore_names: config.watch.ignore.clone(),
                    max_file_size: config.watch.max_file_size,
                },
                debounce_window: Duration::from_millis(config.pipeline.debounce_ms),
                queue_capacity: config.pipeline.queue_capacity,
                workers: config.pipeline.workers,
                batch: BatchSettings {
                    max_ops: config.pipeline.batch_max_ops,
                    max_delay: Duration::from_millis(config.pipeline.batch_max_delay_ms),
                    ..Default::default()
                },
                ..Default::default()
            };

            let pipeline = Arc::new(IndexerPipeline::new(
                pipeline_config,
                store.clone() as Arc<dyn VectorStore>,
                pool,
            ));

            // Progress reporting from the pipeline's update stream.
            let mut updates = pipeline.subscribe();
            tokio::spawn(async move {
                while let Ok(update) = updates.recv().await {
                    match update {
                        IndexUpdate::Indexed { path } => info!("Indexed {:?}", path),
                        IndexUpdate::Removed { path } => info!("Removed {:?}", path),
                        IndexUpdate::Failed { path, error } => {
                            warn!("Failed {:?}: {error}", path);
                        }
                        IndexUpdate::Skipped { .. } => {}
                    }
                }
            });

            let shutdown = CancellationToken::new();

            if config.ingest.enabled {
                let addr: std::net::SocketAddr = config
                    .ingest
                    .bind
                    .parse()
                    .with_context(|| format!("Invalid ingest bind address: {}", config.ingest.bind))?;
                let sender = pipeline
                    .event_sender()
                    .context("Pipeline event channel unavailable")?;
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = memex_ingest::run(addr, sender, token).await {
                        warn!("Ingestion listener failed: {e}");
                    }
                });
            }

            // SIGINT/SIGTERM trigger the staged drain.
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                info!("Shutdown signal received");
                signal_token.cancel();
            });

            info!("memexd starting, watching {:?}", config.watch.roots);
            pipeline.run(shutdown).await?;

            let stats = pipeline.stats().await;
            print_final_stats(&stats);
        }

        Commands::Search { query, limit } => {
            let db_path = config
                .store_path()
                .context("Failed to resolve store path")?;
            if !db_path.exists() {
                anyhow::bail!(
                    "No index found at {}. Run 'memexd start' first to build one.",
                    db_path.display()
                );
            }

            let store = create_store(&config)?;
            store.init().await.context("Failed to open store")?;

            let embedder = create_embedder().await?;
            let executor =
                QueryExecutor::new(store as Arc<dyn VectorStore>, embedder)?;

            let results = executor
                .search(&query, limit)
                .await
                .context("Query execution failed")?;

            match cli.format {
                OutputFormat::Json => {
                    let output = QueryOutput {
                        query: query.clone(),
                        results: results
                            .iter()
                            .map(|hit| ResultItem {
                                file: hit.path.to_string_lossy().to_string(),
                                score: hit.score,
                                size: hit.size,
                                modified: hit.mtime.to_rfc3339(),
                            })
                            .collect(),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!("Query: {query}\n");
                    if results.is_empty() {
                        println!("No matching files.");
                    } else {
                        for (i, hit) in results.iter().enumerate() {
                            println!(
                                "{}. {} (score: {:.3})",
                                i + 1,
                                hit.path.display(),
                                hit.score
                            );
                        }
                    }
                }
            }
        }

        Commands::Status => {
            let db_path = config
                .store_path()
                .context("Failed to resolve store path")?;
            if !db_path.exists() {
                match cli.format {
                    OutputFormat::Json => println!(r#"{{"error": "Index not found"}}"#),
                    OutputFormat::Text => {
                        println!("Index not found at {}", db_path.display());
                        println!("Run 'memexd start' to create it.");
                    }
                }
                return Ok(());
            }

            let store = create_store(&config)?;
            store.init().await.context("Failed to open store")?;
            let stats = store.stats().await?;

            match cli.format {
                OutputFormat::Json => {
                    let output = StatusOutput {
                        store_path: db_path.to_string_lossy().to_string(),
                        total_documents: stats.total_documents,
                        total_files: stats.total_files,
                        index_size_bytes: stats.index_size_bytes,
                        last_updated: stats.last_updated.map(|t| t.to_rfc3339()),
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    println!("Index status for {}", db_path.display());
                    println!("  Documents: {}", stats.total_documents);
                    println!("  Files:     {}", stats.total_files);
                    println!("  Size:      {} bytes", stats.index_size_bytes);
                }
            }
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show => match cli.format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", toml::to_string_pretty(&config)?);
                    }
                },
                ConfigAction::Init => {
                    println!("{}", Config::sample_toml());
                }
                ConfigAction::Path => {
                    if let Some(path) = Config::config_path() {
                        println!("{}", path.display());
                    } else {
                        println!("Could not determine config directory");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("Cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_final_stats(stats: &IndexStats) {
    println!(
        "Indexed {} files, removed {}, {} failures across {} batches.",
        stats.indexed_files, stats.removed_files, stats.failed_files, stats.batches_committed
    );
}

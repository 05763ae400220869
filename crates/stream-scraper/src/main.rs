//! Stream scraper CLI application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::Config;
use std::path::PathBuf;
use stream_scraper::StreamCatalog;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the catalog by title
    Search {
        query: String,
    },

    /// List one page of an anime's episodes
    Episodes {
        /// Anime session id from a search result
        session: String,

        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },

    /// Resolve playable streams for an episode
    Streams {
        /// Anime session id
        session: String,

        /// Episode session id
        episode: String,
    },

    /// Drop expired entries from the in-process and durable caches
    PruneCache,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging; stdout is reserved for JSON output
    shared::logging::init(shared::LogConfig::from_config(
        &config,
        "stream-scraper",
        args.verbose,
    ))?;

    info!(config_file = %args.config.display(), "Stream scraper starting");

    let catalog = StreamCatalog::from_config(&config);
    let stats = catalog.cache_stats();
    info!(
        durable_available = stats.durable_available,
        origin = %config.origin.base_url,
        "Catalog ready"
    );

    let outcome = match args.command {
        Command::Search { query } => print_json(&catalog.search(&query).await),
        Command::Episodes { session, page } => {
            print_json(&catalog.get_episodes(&session, page).await)
        }
        Command::Streams { session, episode } => {
            print_json(&catalog.get_streams(&session, &episode).await)
        }
        Command::PruneCache => {
            let removed = catalog.prune_cache().await;
            print_json(&serde_json::json!({
                "removed": removed,
                "stats": catalog.cache_stats(),
            }))
        }
    };

    catalog.shutdown().await;
    info!("Stream scraper finished");

    outcome
}

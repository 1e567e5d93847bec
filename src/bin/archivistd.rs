use std::path::PathBuf;
use std::sync::Arc;

use archivist::config::Config;
use archivist::events::BroadcastEventBus;
use archivist::orchestrator::Orchestrator;
use archivist::processor::Processor;
use archivist::scanner::Scanner;
use archivist::store::sqlx_store::SqlxStore;
use archivist::watcher;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archivistd", version, about = "Ebook/manga library ingestion and enrichment daemon")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a one-shot library scan and exit, instead of watching continuously
    #[arg(long)]
    scan: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = std::fs::create_dir_all(config.covers_dir()) {
        tracing::error!("Failed to create covers directory {:?}: {e}", config.covers_dir());
        std::process::exit(1);
    }

    let store = SqlxStore::connect(&config.database).await.unwrap_or_else(|e| {
        tracing::error!("Failed to initialize database: {e}");
        std::process::exit(1);
    });
    let store: Arc<dyn archivist::store::LibraryStore> = Arc::new(store);
    tracing::info!("database initialized: {}", config.database.url);

    let events = Arc::new(BroadcastEventBus::default());
    let http = reqwest::Client::new();
    let orchestrator = Arc::new(Orchestrator::new(&config, http, Arc::clone(&store), events.clone()));
    let processor = Arc::new(Processor::new(Arc::clone(&store), events.clone(), orchestrator));

    if cli.scan {
        let scanner = Scanner::new(store, events, processor, config.scanner.extensions.clone());
        match scanner.scan(&config.watch_dir).await {
            Ok(stats) => {
                tracing::info!(
                    files_found = stats.files_found,
                    files_processed = stats.files_processed,
                    files_skipped = stats.files_skipped,
                    errors = stats.errors,
                    "one-shot scan finished"
                );
            }
            Err(e) => {
                tracing::error!("scan failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let _watcher = watcher::watch(config.watch_dir.clone(), config.watcher.clone(), processor)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("failed to start watcher: {e}");
            std::process::exit(1);
        });

    tracing::info!(dir = %config.watch_dir.display(), "watching library directory");

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down");
}

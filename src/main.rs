use clap::{Parser, Subcommand};
use eventdir_ingest::config::Config;
use eventdir_ingest::fetcher::{Fetcher, ReqwestFetcher};
use eventdir_ingest::import::{ImportOptions, ImportOrchestrator};
use eventdir_ingest::logging;
use eventdir_ingest::server::{serve, AppState};
use eventdir_ingest::sources::{configured_source_ids, create_source};
use eventdir_ingest::storage::{InMemoryStore, Promoter, RecordStore};
use eventdir_ingest::sync::{SyncDriver, SyncOrchestrator, SyncRun};
use eventdir_ingest::types::ListingParams;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "eventdir_ingest")]
#[command(about = "Event directory ingestion and sync pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a configured source and preview candidates with
    /// duplicate classification
    Preview {
        /// Source id from config.toml
        #[arg(long)]
        source: String,
        /// Maximum candidates to scrape
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Scrape a source and import everything not already in the catalog
    Import {
        #[arg(long)]
        source: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Update existing events instead of skipping them
        #[arg(long)]
        update_existing: bool,
    },
    /// Refresh schema.org snapshots for imported events in batches
    Sync {
        /// Only events without a snapshot yet
        #[arg(long)]
        only_missing: bool,
    },
    /// Run the operator HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let config = Config::load_or_default();

    // The in-memory store stands in for the catalog database; the
    // deployment wires a real RecordStore here.
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryStore::new());
    let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(&config.fetch));

    match cli.command {
        Commands::Preview { source, limit } => {
            let Some(source) = create_source(&config, &source, fetcher) else {
                anyhow::bail!(
                    "unknown source; configured sources: {:?}",
                    configured_source_ids(&config)
                );
            };
            let orchestrator = ImportOrchestrator::new(store, config.matching.clone());
            let result = orchestrator
                .preview(source.as_ref(), &ListingParams { limit })
                .await?;
            println!(
                "Found {} candidates ({} new, {} existing):",
                result.total, result.new_count, result.existing_count
            );
            for preview in &result.events {
                let marker = if preview.duplicate.is_duplicate { "=" } else { "+" };
                let date = preview
                    .event
                    .start_date
                    .map(|d| d.date_naive().to_string())
                    .unwrap_or_else(|| "????-??-??".to_string());
                println!("  {marker} {date}  {}", preview.event.name);
            }
        }
        Commands::Import {
            source,
            limit,
            update_existing,
        } => {
            let Some(source) = create_source(&config, &source, fetcher) else {
                anyhow::bail!(
                    "unknown source; configured sources: {:?}",
                    configured_source_ids(&config)
                );
            };
            let mut promoter = Promoter {
                id: None,
                name: "CLI import".to_string(),
                website: None,
                created_at: chrono::Utc::now(),
            };
            store.create_promoter(&mut promoter).await?;

            let orchestrator = ImportOrchestrator::new(store, config.matching.clone());
            let candidates = source.list_candidates(&ListingParams { limit }).await?;
            let outcome = orchestrator
                .import(
                    Some(source.as_ref()),
                    candidates,
                    &ImportOptions {
                        venue_id: None,
                        promoter_id: promoter.id.expect("promoter was just created"),
                        fetch_details: false,
                        update_existing,
                    },
                )
                .await?;

            println!("Import results:");
            println!("   Imported: {}", outcome.imported);
            println!("   Updated:  {}", outcome.updated);
            println!("   Skipped:  {}", outcome.skipped);
            println!("   Venues created: {}", outcome.venues_created);
            if !outcome.errors.is_empty() {
                println!("   Errors:");
                for error in &outcome.errors {
                    println!("     - {error}");
                }
            }
        }
        Commands::Sync { only_missing } => {
            let orchestrator = Arc::new(SyncOrchestrator::new(
                store,
                fetcher,
                config.sync.workers,
            ));
            let driver = SyncDriver::new(
                orchestrator,
                config.sync.batch_size,
                config.sync.safety_cap,
            );
            let run = driver.run(only_missing).await;
            match &run {
                SyncRun::Capped(progress) => {
                    println!("Sync stopped at the safety cap:");
                    print_progress(progress);
                }
                SyncRun::Done(progress) => {
                    println!("Sync finished:");
                    print_progress(progress);
                }
                SyncRun::Idle | SyncRun::Running(_) => unreachable!("driver returns a final state"),
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            info!("Starting operator API");
            let state = Arc::new(AppState::new(config, store));
            serve(state, port).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
    }
    Ok(())
}

fn print_progress(progress: &eventdir_ingest::types::SyncProgress) {
    println!("   Processed: {}/{}", progress.processed, progress.total);
    println!("   Success:   {}", progress.success);
    println!("   Not found: {}", progress.not_found);
    println!("   Failed:    {}", progress.failed);
    if let Some(error) = &progress.last_error {
        println!("   Stopped on error: {error}");
    }
}

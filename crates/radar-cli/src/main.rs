use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use radar_adapters::CrawlerRegistry;
use radar_storage::EventStore;
use radar_sync::{SyncConfig, SyncPipeline};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "radar-cli")]
#[command(about = "NYC Events Radar command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand, PartialEq)]
enum Commands {
    /// List registered crawlers.
    List,
    /// Run crawlers and write their batches without ingesting.
    Crawl {
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },
    /// Ingest every batch in the batch directory.
    Ingest,
    /// Crawl, ingest and write a run report.
    Sync {
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },
    Migrate,
    /// Verify that the search index mirrors the events table.
    Check,
    Stats,
    /// Serve the JSON API, with the sync scheduler when enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync {
        sources: Vec::new(),
    }) {
        Commands::List => {
            for name in CrawlerRegistry::builtin()?.names() {
                println!("{name}");
            }
        }
        Commands::Crawl { sources } => {
            let pipeline = SyncPipeline::new(config).await?;
            let summary = pipeline.runner().run_all(Some(sources.as_slice())).await?;
            for outcome in &summary.succeeded {
                println!(
                    "{}: {} drafts -> {}",
                    outcome.source,
                    outcome.drafts,
                    outcome.batch_path.display()
                );
            }
            for failure in &summary.failed {
                println!("{}: FAILED {}", failure.source, failure.error);
            }
        }
        Commands::Ingest => {
            let pipeline = SyncPipeline::new(config).await?;
            let report = pipeline.ingestor().ingest_batches(pipeline.batches()).await?;
            println!(
                "ingest complete: processed={} rejected={} batches={} skipped={}",
                report.processed,
                report.rejected,
                report.batches_read,
                report.skipped_batches.len()
            );
        }
        Commands::Sync { sources } => {
            let pipeline = SyncPipeline::new(config).await?;
            let summary = pipeline.run_once(Some(sources.as_slice())).await?;
            println!(
                "sync complete: run_id={} crawled={} failed={} processed={} report={}",
                summary.run_id,
                summary.crawled.len(),
                summary.failed.len(),
                summary.ingest.processed,
                summary.report_path.display()
            );
        }
        Commands::Migrate => {
            open_store(&config).await?;
            println!("migrations applied to {}", config.database_url);
        }
        Commands::Check => {
            let store = open_store(&config).await?;
            let mismatches = store.index_mismatches().await?;
            if !mismatches.is_empty() {
                bail!("search index out of sync for event ids {mismatches:?}");
            }
            println!("search index consistent");
        }
        Commands::Stats => {
            let store = open_store(&config).await?;
            let stats = store.stats().await?;
            println!(
                "events={} sources={} categories={} free={} boroughs={}",
                stats.total_events,
                stats.total_sources,
                stats.total_categories,
                stats.free_events,
                stats.boroughs_covered
            );
        }
        Commands::Serve => {
            let port = config.web_port;
            let pipeline = Arc::new(SyncPipeline::new(config).await?);
            let scheduler = pipeline.maybe_build_scheduler().await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
                info!(cron = %pipeline.config().sync_cron, "sync scheduler started");
            }
            radar_web::serve(pipeline.store().clone(), port).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &SyncConfig) -> Result<EventStore> {
    let store = EventStore::open(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    store.migrate().await.context("applying migrations")?;
    Ok(store)
}

//! Crawl, ingest and report: the pipeline that keeps the event store fresh.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use radar_adapters::CrawlerRegistry;
use radar_storage::{BatchStore, CatalogStats, EventStore};
use serde::Serialize;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

pub mod config;
pub mod crawl;
pub mod ingest;
pub mod normalize;

pub use config::{SourceOverride, SourceOverrides, SyncConfig};
pub use crawl::{CrawlFailure, CrawlOutcome, CrawlRun, CrawlRunner, CrawlSummary};
pub use ingest::{IngestReport, Ingestor, SkippedBatch};
pub use normalize::{check_is_free, extract_borough, normalize_draft, DraftRejected};

pub const CRATE_NAME: &str = "radar-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub crawled: Vec<CrawlOutcome>,
    pub failed: Vec<CrawlFailure>,
    pub ingest: IngestReport,
    pub catalog: CatalogStats,
    pub report_path: PathBuf,
    pub brief_path: PathBuf,
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: EventStore,
    batches: BatchStore,
    runner: CrawlRunner,
    ingestor: Ingestor,
}

impl SyncPipeline {
    /// Open and migrate the store, load `sources.yaml`, and register the shipped
    /// crawlers.
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let store = EventStore::open(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?;
        store.migrate().await.context("applying migrations")?;
        let overrides = SourceOverrides::load(&config.sources_file).await?;
        let registry = CrawlerRegistry::builtin().context("registering crawlers")?;
        Ok(Self::from_parts(config, store, Arc::new(registry), overrides))
    }

    pub fn from_parts(
        config: SyncConfig,
        store: EventStore,
        registry: Arc<CrawlerRegistry>,
        overrides: SourceOverrides,
    ) -> Self {
        let batches = BatchStore::new(config.batch_dir.clone());
        let runner = CrawlRunner::new(registry, batches.clone())
            .with_overrides(overrides)
            .with_http_timeout(config.http_timeout());
        let ingestor = Ingestor::new(store.clone());
        Self {
            config,
            store,
            batches,
            runner,
            ingestor,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn batches(&self) -> &BatchStore {
        &self.batches
    }

    pub fn runner(&self) -> &CrawlRunner {
        &self.runner
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Crawl the selected sources, ingest every batch on disk, then write the
    /// run report and daily brief.
    pub async fn run_once(&self, names: Option<&[String]>) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, "sync started");

        let crawl = self.runner.run_all(names).await?;
        let ingest = self.ingestor.ingest_batches(&self.batches).await?;
        let catalog = self.store.stats().await.context("reading catalog stats")?;

        let mut summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            crawled: crawl.succeeded,
            failed: crawl.failed,
            ingest,
            catalog,
            report_path: self.config.reports_dir.join(format!("{run_id}.json")),
            brief_path: self.config.reports_dir.join(format!("{run_id}.md")),
        };
        self.write_reports(&mut summary).await?;

        info!(
            %run_id,
            crawled = summary.crawled.len(),
            failed = summary.failed.len(),
            processed = summary.ingest.processed,
            report = %summary.report_path.display(),
            "sync finished"
        );
        Ok(summary)
    }

    /// A scheduler that runs `run_once` for every source on `SYNC_CRON`, or
    /// `None` when scheduling is disabled. The caller starts it.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let pipeline = Arc::clone(self);
        let job = Job::new_async(&self.config.sync_cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once(None).await {
                    Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {}", self.config.sync_cron))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    async fn write_reports(&self, summary: &mut SyncRunSummary) -> Result<()> {
        let dir = &self.config.reports_dir;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        summary.finished_at = Utc::now();
        let json = serde_json::to_vec_pretty(&*summary).context("serializing run report")?;
        fs::write(&summary.report_path, json)
            .await
            .with_context(|| format!("writing {}", summary.report_path.display()))?;
        fs::write(&summary.brief_path, daily_brief(summary))
            .await
            .with_context(|| format!("writing {}", summary.brief_path.display()))?;
        Ok(())
    }
}

/// Markdown digest of one run for people skimming the reports directory.
pub fn daily_brief(summary: &SyncRunSummary) -> String {
    let mut per_source: BTreeMap<&str, String> = BTreeMap::new();
    for outcome in &summary.crawled {
        per_source.insert(&outcome.source, format!("{} drafts", outcome.drafts));
    }
    for failure in &summary.failed {
        per_source.insert(&failure.source, format!("failed ({})", failure.error));
    }

    let mut lines = vec![
        "# NYC Events Radar Daily Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!(
            "- Ingested: {} processed, {} rejected, {} batches ({} skipped)",
            summary.ingest.processed,
            summary.ingest.rejected,
            summary.ingest.batches_read,
            summary.ingest.skipped_batches.len()
        ),
        format!(
            "- Catalog: {} events from {} sources, {} free, {} boroughs",
            summary.catalog.total_events,
            summary.catalog.total_sources,
            summary.catalog.free_events,
            summary.catalog.boroughs_covered
        ),
        String::new(),
        "## Sources".to_string(),
    ];
    if per_source.is_empty() {
        lines.push("- none".to_string());
    }
    lines.extend(per_source.iter().map(|(source, status)| format!("- {source}: {status}")));
    lines.push(String::new());
    lines.join("\n")
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use radar_adapters::{CrawlerError, CrawlerRegistry};
use radar_core::EventDraft;
use radar_storage::{BatchStore, HttpFetcher};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use crate::config::SourceOverrides;

#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutcome {
    pub source: String,
    pub drafts: usize,
    pub batch_path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlFailure {
    pub source: String,
    pub error: String,
}

/// Result of one successful crawler run.
#[derive(Debug, Clone)]
pub struct CrawlRun {
    pub outcome: CrawlOutcome,
    pub drafts: Vec<EventDraft>,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub drafts: Vec<EventDraft>,
    pub succeeded: Vec<CrawlOutcome>,
    pub failed: Vec<CrawlFailure>,
}

/// Runs crawlers from a shared registry, each with its own fetcher, and writes
/// one batch per successful run.
#[derive(Debug, Clone)]
pub struct CrawlRunner {
    registry: Arc<CrawlerRegistry>,
    batches: BatchStore,
    overrides: Arc<SourceOverrides>,
    http_timeout: Duration,
}

impl CrawlRunner {
    pub fn new(registry: Arc<CrawlerRegistry>, batches: BatchStore) -> Self {
        Self {
            registry,
            batches,
            overrides: Arc::new(SourceOverrides::default()),
            http_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_overrides(mut self, overrides: SourceOverrides) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &CrawlerRegistry {
        &self.registry
    }

    /// Crawlers to run. No names means every enabled crawler; named crawlers run
    /// even when disabled. Any unknown name fails the whole selection.
    pub fn resolve(&self, names: Option<&[String]>) -> Result<Vec<String>> {
        let requested = names.unwrap_or_default();
        if requested.is_empty() {
            return Ok(self
                .registry
                .names()
                .into_iter()
                .filter(|name| {
                    let enabled = self.overrides.is_enabled(name);
                    if !enabled {
                        info!(source = %name, "skipping disabled source");
                    }
                    enabled
                })
                .map(str::to_string)
                .collect());
        }

        let mut selected: Vec<String> = Vec::with_capacity(requested.len());
        for name in requested {
            if !self.registry.contains(name) {
                return Err(CrawlerError::UnknownSource(name.clone()))
                    .with_context(|| format!("registered sources: {}", self.registry.names().join(", ")));
            }
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        }
        Ok(selected)
    }

    pub async fn run_one(&self, name: &str) -> Result<CrawlRun> {
        let span = info_span!("crawler_run", source = %name);
        async move {
            let crawler = self.registry.create(name)?;
            let settings = self.overrides.apply(crawler.settings().clone());

            let drafts = {
                let http = HttpFetcher::new(name, settings.http_config(self.http_timeout))?;
                crawler.scrape(&http).await?
            };

            let stored = self
                .batches
                .write_batch(name, Local::now().date_naive(), &drafts)
                .await
                .with_context(|| format!("writing batch for {name}"))?;
            info!(drafts = stored.drafts, path = %stored.path.display(), "batch written");

            Ok::<_, anyhow::Error>(CrawlRun {
                outcome: CrawlOutcome {
                    source: stored.source,
                    drafts: stored.drafts,
                    batch_path: stored.path,
                    sha256: stored.sha256,
                },
                drafts,
            })
        }
        .instrument(span)
        .await
    }

    /// Run the selected crawlers concurrently. Each failure, panics included, is
    /// logged and listed in the summary without affecting the others.
    pub async fn run_all(&self, names: Option<&[String]>) -> Result<CrawlSummary> {
        let selected = self.resolve(names)?;

        let handles: Vec<(String, JoinHandle<Result<CrawlRun>>)> = selected
            .into_iter()
            .map(|name| {
                let runner = self.clone();
                let task_name = name.clone();
                let handle = tokio::spawn(async move { runner.run_one(&task_name).await });
                (name, handle)
            })
            .collect();

        let mut summary = CrawlSummary::default();
        for (name, handle) in handles {
            let error = match handle.await {
                Ok(Ok(run)) => {
                    summary.drafts.extend(run.drafts);
                    summary.succeeded.push(run.outcome);
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(join) => format!("crawler task aborted: {join}"),
            };
            error!(source = %name, error = %error, "crawler failed");
            summary.failed.push(CrawlFailure {
                source: name,
                error,
            });
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            drafts = summary.drafts.len(),
            "crawl finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use radar_adapters::{CrawlerSettings, SourceCrawler};
    use radar_core::EventTime;
    use tempfile::tempdir;

    struct Gallery {
        settings: CrawlerSettings,
        url: String,
    }

    #[async_trait]
    impl SourceCrawler for Gallery {
        fn settings(&self) -> &CrawlerSettings {
            &self.settings
        }

        async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
            let page = http.fetch(&self.url).await?;
            let start = EventTime::parse("2026-03-01T18:00:00")
                .map_err(|e| CrawlerError::Parse(e.to_string()))?;
            Ok(vec![EventDraft::new("gallery", page.text(), start)])
        }
    }

    struct Listing {
        failures: usize,
        hits: AtomicUsize,
    }

    async fn listing(State(state): State<Arc<Listing>>) -> (StatusCode, &'static str) {
        if state.hits.fetch_add(1, Ordering::SeqCst) < state.failures {
            (StatusCode::BAD_GATEWAY, "upstream down")
        } else {
            (StatusCode::OK, "Gallery Opening")
        }
    }

    async fn spawn_listing(failures: usize) -> (String, Arc<Listing>) {
        let state = Arc::new(Listing {
            failures,
            hits: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/events", get(listing))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/events"), state)
    }

    fn gallery_registry(url: String) -> Arc<CrawlerRegistry> {
        let mut registry = CrawlerRegistry::new();
        registry
            .register("gallery", move || {
                let settings = CrawlerSettings::new("gallery")?
                    .with_rate_limit(Duration::ZERO)
                    .with_retry_backoff(Duration::from_millis(10));
                Ok(Box::new(Gallery {
                    settings,
                    url: url.clone(),
                }) as Box<dyn SourceCrawler>)
            })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn transient_failures_within_budget_still_produce_a_batch() {
        let (url, state) = spawn_listing(2).await;
        let dir = tempdir().unwrap();
        let batches = BatchStore::new(dir.path());
        let runner = CrawlRunner::new(gallery_registry(url), batches.clone());

        let summary = runner.run_all(None).await.unwrap();
        assert!(summary.failed.is_empty(), "{:?}", summary.failed);
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);
        assert_eq!(summary.drafts.len(), 1);
        assert_eq!(summary.drafts[0].title, "Gallery Opening");

        let outcome = &summary.succeeded[0];
        assert_eq!(outcome.source, "gallery");
        assert_eq!(outcome.drafts, 1);
        assert_eq!(batches.list_batches().await.unwrap(), vec![outcome.batch_path.clone()]);
    }

    #[tokio::test]
    async fn exhausted_retries_are_reported_and_write_no_batch() {
        let (url, state) = spawn_listing(usize::MAX).await;
        let dir = tempdir().unwrap();
        let batches = BatchStore::new(dir.path());
        let runner = CrawlRunner::new(gallery_registry(url), batches.clone());

        let summary = runner.run_all(None).await.unwrap();
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].source, "gallery");
        assert!(summary.failed[0].error.contains("3 attempts"));
        assert!(batches.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_names_fail_before_any_crawler_starts() {
        let (url, state) = spawn_listing(0).await;
        let dir = tempdir().unwrap();
        let runner = CrawlRunner::new(gallery_registry(url), BatchStore::new(dir.path()));

        let names = vec!["gallery".to_string(), "nope".to_string()];
        let err = runner.run_all(Some(names.as_slice())).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlerError>(),
            Some(CrawlerError::UnknownSource(name)) if name == "nope"
        ));
        assert_eq!(state.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_sources_run_only_when_named() {
        let (url, state) = spawn_listing(0).await;
        let dir = tempdir().unwrap();
        let overrides =
            SourceOverrides::from_yaml("sources:\n  gallery:\n    enabled: false\n").unwrap();
        let runner =
            CrawlRunner::new(gallery_registry(url), BatchStore::new(dir.path())).with_overrides(overrides);

        let all = runner.run_all(None).await.unwrap();
        assert!(all.succeeded.is_empty() && all.failed.is_empty());
        assert_eq!(state.hits.load(Ordering::SeqCst), 0);

        let named = runner.run_all(Some(&["gallery".to_string()][..])).await.unwrap();
        assert_eq!(named.succeeded.len(), 1);
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_secrets_fail_only_their_crawler() {
        let dir = tempdir().unwrap();
        let mut registry = CrawlerRegistry::new();
        registry
            .register("locked", || {
                Err(CrawlerError::Configuration("LOCKED_API_KEY is not set".to_string()))
            })
            .unwrap();
        let runner = CrawlRunner::new(Arc::new(registry), BatchStore::new(dir.path()));

        let summary = runner.run_all(None).await.unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].error.contains("LOCKED_API_KEY"));
    }
}

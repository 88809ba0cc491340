//! Source crawler contract, the crawler registry, and the shipped NYC crawlers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
use thiserror::Error;

mod extract;
pub mod sources;

pub use sources::dice::DiceCrawler;
pub use sources::donyc::DoNycCrawler;
pub use sources::edmtrain::EdmTrainCrawler;
pub use sources::eventbrite::EventbriteCrawler;
pub use sources::nyc_parks::NycParksCrawler;
pub use sources::resident_advisor::ResidentAdvisorCrawler;
pub use sources::the_skint::TheSkintCrawler;
pub use sources::ticketmaster::TicketmasterCrawler;

pub const CRATE_NAME: &str = "radar-adapters";

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unparseable payload: {0}")]
    Parse(String),
    #[error("unknown source {0:?}")]
    UnknownSource(String),
}

/// Politeness settings a crawler declares for its own fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerSettings {
    name: String,
    pub rate_limit: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl CrawlerSettings {
    pub fn new(name: impl Into<String>) -> Result<Self, CrawlerError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CrawlerError::Configuration(
                "crawler name must not be empty".to_string(),
            ));
        }
        let backoff = BackoffPolicy::default();
        Ok(Self {
            name,
            rate_limit: Duration::from_secs(1),
            max_retries: backoff.max_retries,
            retry_backoff: backoff.retry_backoff,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn http_config(&self, timeout: Duration) -> HttpClientConfig {
        HttpClientConfig {
            timeout,
            rate_limit: self.rate_limit,
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                retry_backoff: self.retry_backoff,
            },
        }
    }
}

/// One event source. Crawlers differ only in `scrape`; fetching, politeness and
/// batch output live in the fetcher and the runner.
#[async_trait]
pub trait SourceCrawler: Send + Sync {
    fn settings(&self) -> &CrawlerSettings;

    fn name(&self) -> &str {
        self.settings().name()
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError>;
}

pub type CrawlerFactory =
    Arc<dyn Fn() -> Result<Box<dyn SourceCrawler>, CrawlerError> + Send + Sync>;

/// Name to factory map. Built once, then shared read-only behind an `Arc`.
#[derive(Clone, Default)]
pub struct CrawlerRegistry {
    factories: BTreeMap<String, CrawlerFactory>,
}

impl fmt::Debug for CrawlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CrawlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every shipped crawler.
    pub fn builtin() -> Result<Self, CrawlerError> {
        let mut registry = Self::new();
        registry.register(sources::nyc_parks::NAME, || {
            Ok(Box::new(NycParksCrawler::from_env()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::ticketmaster::NAME, || {
            Ok(Box::new(TicketmasterCrawler::from_env()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::eventbrite::NAME, || {
            Ok(Box::new(EventbriteCrawler::new()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::dice::NAME, || {
            Ok(Box::new(DiceCrawler::new()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::donyc::NAME, || {
            Ok(Box::new(DoNycCrawler::new()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::edmtrain::NAME, || {
            Ok(Box::new(EdmTrainCrawler::from_env()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::resident_advisor::NAME, || {
            Ok(Box::new(ResidentAdvisorCrawler::new()?) as Box<dyn SourceCrawler>)
        })?;
        registry.register(sources::the_skint::NAME, || {
            Ok(Box::new(TheSkintCrawler::new()?) as Box<dyn SourceCrawler>)
        })?;
        Ok(registry)
    }

    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), CrawlerError>
    where
        F: Fn() -> Result<Box<dyn SourceCrawler>, CrawlerError> + Send + Sync + 'static,
    {
        if name.trim().is_empty() {
            return Err(CrawlerError::Configuration(
                "cannot register a crawler without a name".to_string(),
            ));
        }
        if self.factories.contains_key(name) {
            return Err(CrawlerError::Configuration(format!(
                "crawler {name:?} is already registered"
            )));
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SourceCrawler>, CrawlerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CrawlerError::UnknownSource(name.to_string()))?;
        factory()
    }
}

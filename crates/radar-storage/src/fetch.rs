use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Browser identities rotated across retries. Read-only and shared by every fetcher.
pub static USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts per request, the first one included.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait before retry `retry` (1-based). Linear: `retry_backoff * retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.retry_backoff.saturating_mul(retry)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub rate_limit: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            rate_limit: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Enforces a minimum gap between consecutive requests through one fetcher.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{url} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: FetchFailure,
    },
}

/// HTTP client owned by one crawler run. Dropping it closes its connection pool.
#[derive(Debug)]
pub struct HttpFetcher {
    source: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(source: impl Into<String>, config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            source: source.into(),
            client,
            limiter: RateLimiter::new(config.rate_limit),
            backoff: config.backoff,
            agent: AtomicUsize::new(fastrand::usize(..USER_AGENTS.len())),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn rate_limit(&self) -> Duration {
        self.limiter.interval()
    }

    pub fn user_agent(&self) -> &'static str {
        USER_AGENTS[self.agent.load(Ordering::Relaxed) % USER_AGENTS.len()]
    }

    fn rotate_user_agent(&self) {
        self.agent
            .store(fastrand::usize(..USER_AGENTS.len()), Ordering::Relaxed);
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_query(url, &[] as &[(&str, &str)]).await
    }

    /// GET `url` with `query` appended, waiting out the rate limit before every
    /// attempt and retrying transport errors and non-2xx statuses.
    pub async fn fetch_with_query<Q>(&self, url: &str, query: &Q) -> Result<FetchedResponse, FetchError>
    where
        Q: Serialize + ?Sized,
    {
        self.send_with_retries("GET", url, |client| client.get(url).query(query))
            .await
    }

    /// POST `body` as JSON with the same politeness and retry rules as a GET.
    /// `headers` are sent on every attempt; the user agent is still rotated.
    pub async fn post_json<B>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError>
    where
        B: Serialize + ?Sized,
    {
        self.send_with_retries("POST", url, |client| {
            headers
                .iter()
                .fold(client.post(url).json(body), |request, (name, value)| {
                    request.header(*name, *value)
                })
        })
        .await
    }

    async fn send_with_retries<F>(
        &self,
        method: &'static str,
        url: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let span = info_span!("http_fetch", source = %self.source, method, url);
        async move {
            let attempts = self.backoff.attempts();
            let mut attempt = 1;
            loop {
                self.limiter.wait().await;
                let failure = match self.send_once(build(&self.client)).await {
                    Ok(response) => {
                        debug!(attempt, status = response.status.as_u16(), "fetched");
                        return Ok(response);
                    }
                    Err(failure) => failure,
                };

                if attempt >= attempts {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        last: failure,
                    });
                }

                let delay = self.backoff.delay_for_retry(attempt);
                warn!(attempt, ?delay, error = %failure, "fetch failed, retrying");
                tokio::time::sleep(delay).await;
                self.rotate_user_agent();
                attempt += 1;
            }
        }
        .instrument(span)
        .await
    }

    async fn send_once(&self, request: reqwest::RequestBuilder) -> Result<FetchedResponse, FetchFailure> {
        let response = request.header(USER_AGENT, self.user_agent()).send().await?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = response.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

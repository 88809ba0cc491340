//! Fetching, batch files and the canonical event store for the events radar.
//!
//! * [`HttpFetcher`]: polite per-crawler HTTP client (rate limit, linear retry
//!   backoff, user-agent rotation).
//! * [`BatchStore`]: dated, all-or-nothing output batches written by crawler runs.
//! * [`EventStore`]: SQLite table of canonical events plus the FTS5 index that is
//!   kept in lockstep with it, and the read-side query engine.

mod batch;
mod db;
mod fetch;
mod query;

pub use batch::{BatchStore, StoredBatch};
pub use db::{EventStore, StoreError, UpsertOutcome};
pub use fetch::{
    random_user_agent, BackoffPolicy, FetchError, FetchFailure, FetchedResponse, HttpClientConfig,
    HttpFetcher, RateLimiter, USER_AGENTS,
};
pub use query::{
    fts_match_expression, page_count, CatalogStats, EventFilters, EventPage, FacetCount,
    PageRequest, DEFAULT_PER_PAGE, MAX_PER_PAGE,
};

pub const CRATE_NAME: &str = "radar-storage";

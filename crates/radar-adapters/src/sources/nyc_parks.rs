//! NYC Parks events from the city's Socrata open data API.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::extract::{absolute_url, description, json_first_str, json_id, json_str, parse_time};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "nyc_parks";
pub const ENDPOINT: &str = "https://data.cityofnewyork.us/resource/w3wp-dpdi.json";
pub const APP_TOKEN_ENV: &str = "NYC_OPEN_DATA_APP_TOKEN";
const PAGE_SIZE: usize = 1000;
const SITE: &str = "https://www.nycgovparks.org/";

#[derive(Debug, Clone)]
pub struct NycParksCrawler {
    settings: CrawlerSettings,
    endpoint: String,
    app_token: Option<String>,
    page_size: usize,
}

impl NycParksCrawler {
    pub fn new(app_token: Option<String>) -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_millis(500)),
            endpoint: ENDPOINT.to_string(),
            app_token: app_token.filter(|t| !t.trim().is_empty()),
            page_size: PAGE_SIZE,
        })
    }

    /// The app token is optional; it only raises Socrata's throttle limits.
    pub fn from_env() -> Result<Self, CrawlerError> {
        Self::new(std::env::var(APP_TOKEN_ENV).ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn page_params(&self, offset: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("$limit", self.page_size.to_string()),
            ("$offset", offset.to_string()),
            ("$order", "start_date_time ASC".to_string()),
        ];
        if let Some(token) = &self.app_token {
            params.push(("$$app_token", token.clone()));
        }
        params
    }
}

#[async_trait]
impl SourceCrawler for NycParksCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let mut drafts = Vec::new();
        let mut offset = 0;
        loop {
            let response = http
                .fetch_with_query(&self.endpoint, &self.page_params(offset))
                .await?;
            let rows: Vec<JsonValue> = response
                .json()
                .map_err(|e| CrawlerError::Parse(format!("{NAME} page at offset {offset}: {e}")))?;
            if rows.is_empty() {
                break;
            }
            drafts.extend(parse_rows(&rows));
            if rows.len() < self.page_size {
                break;
            }
            offset += self.page_size;
        }
        Ok(drafts)
    }
}

/// Drafts from one page of Socrata rows; rows without a title or a readable
/// start time are skipped.
pub fn parse_rows(rows: &[JsonValue]) -> Vec<EventDraft> {
    let Ok(site) = Url::parse(SITE) else {
        return Vec::new();
    };
    rows.iter().filter_map(|row| parse_row(row, &site)).collect()
}

fn parse_row(row: &JsonValue, site: &Url) -> Option<EventDraft> {
    let Some(title) = json_first_str(row, &["title", "name"]) else {
        debug!(source = NAME, "skipping row without title");
        return None;
    };
    let Some(start_time) = json_str(row, &["start_date_time"]).and_then(parse_time) else {
        debug!(source = NAME, title, "skipping row without start time");
        return None;
    };

    let address = ["address", "borough", "zip"]
        .iter()
        .filter_map(|key| json_str(row, &[*key]))
        .collect::<Vec<_>>()
        .join(", ");

    let mut draft = EventDraft::new(NAME, title, start_time);
    draft.description = description(json_str(row, &["description"]));
    draft.url = json_str(row, &["url"]).and_then(|href| absolute_url(site, href));
    draft.venue = json_str(row, &["location"]).map(str::to_string);
    draft.address = (!address.is_empty()).then_some(address);
    draft.end_time = json_str(row, &["end_date_time"]).and_then(parse_time);
    draft.category = json_str(row, &["category"]).map(str::to_string);
    draft.source_id = json_str(row, &["uid"])
        .map(str::to_string)
        .or_else(|| row.get("id").and_then(json_id));
    draft.image_url = json_str(row, &["image"]).and_then(|href| absolute_url(site, href));
    draft.price = json_str(row, &["cost_description"]).map(str::to_string);
    Some(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixture;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Query, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use radar_storage::{BackoffPolicy, HttpClientConfig};

    fn fixture_rows() -> Vec<JsonValue> {
        serde_json::from_str(&fixture(NAME, "page.json")).expect("fixture json")
    }

    #[test]
    fn parses_socrata_rows_and_skips_incomplete_ones() {
        let drafts = parse_rows(&fixture_rows());
        assert_eq!(drafts.len(), 2);

        let walk = &drafts[0];
        assert_eq!(walk.title, "Bird Walk in Prospect Park");
        assert_eq!(walk.start_time.to_string(), "2026-03-07T08:00:00");
        assert_eq!(walk.end_time.map(|t| t.to_string()).as_deref(), Some("2026-03-07T09:30:00"));
        assert_eq!(walk.venue.as_deref(), Some("Prospect Park Audubon Center"));
        assert_eq!(
            walk.address.as_deref(),
            Some("101 East Drive, Brooklyn, 11225")
        );
        assert_eq!(walk.price.as_deref(), Some("Free"));
        assert_eq!(walk.source_id.as_deref(), Some("evt-1001"));
        assert_eq!(
            walk.url.as_deref(),
            Some("https://www.nycgovparks.org/events/2026/03/07/bird-walk")
        );

        let movie = &drafts[1];
        assert_eq!(movie.title, "Movies Under the Stars");
        assert_eq!(movie.address.as_deref(), Some("Queens"));
        assert_eq!(movie.source_id.as_deref(), Some("2002"));
    }

    #[derive(Default)]
    struct Pages {
        offsets: Mutex<Vec<String>>,
        tokens: Mutex<Vec<Option<String>>>,
    }

    async fn page_handler(
        State(state): State<Arc<Pages>>,
        Query(params): Query<std::collections::HashMap<String, String>>,
    ) -> Json<JsonValue> {
        let offset = params.get("$offset").cloned().unwrap_or_default();
        state.offsets.lock().unwrap().push(offset.clone());
        state
            .tokens
            .lock()
            .unwrap()
            .push(params.get("$$app_token").cloned());
        let rows = match offset.as_str() {
            "0" => serde_json::json!([
                {"title": "A", "start_date_time": "2026-03-01T10:00:00.000"},
                {"title": "B", "start_date_time": "2026-03-02T10:00:00.000"}
            ]),
            "2" => serde_json::json!([
                {"title": "C", "start_date_time": "2026-03-03T10:00:00.000"}
            ]),
            _ => serde_json::json!([]),
        };
        Json(rows)
    }

    #[tokio::test]
    async fn follows_offset_pagination_until_a_short_page() {
        let state = Arc::new(Pages::default());
        let app = Router::new()
            .route("/resource.json", get(page_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let crawler = NycParksCrawler::new(Some("token-123".to_string()))
            .unwrap()
            .with_endpoint(format!("http://{addr}/resource.json"))
            .with_page_size(2);
        let http = HttpFetcher::new(
            NAME,
            HttpClientConfig {
                timeout: Duration::from_secs(5),
                rate_limit: Duration::ZERO,
                backoff: BackoffPolicy::default(),
            },
        )
        .unwrap();

        let drafts = crawler.scrape(&http).await.unwrap();
        let titles: Vec<_> = drafts.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(*state.offsets.lock().unwrap(), vec!["0", "2"]);
        assert!(state
            .tokens
            .lock()
            .unwrap()
            .iter()
            .all(|t| t.as_deref() == Some("token-123")));
    }
}

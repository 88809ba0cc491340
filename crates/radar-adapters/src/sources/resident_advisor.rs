//! Resident Advisor's GraphQL event listings for the New York area.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::extract::{description, json_id, json_str, parse_time};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "resident_advisor";
pub const GRAPHQL_URL: &str = "https://ra.co/graphql";
const REFERER: &str = "https://ra.co/events/us/newyork";
const SITE: &str = "https://ra.co";
const NEW_YORK_AREA: u32 = 218;
const WINDOW_DAYS: u64 = 14;
const PAGE_SIZE: u32 = 50;
const CATEGORY: &str = "music";

const EVENTS_QUERY: &str = r#"
query GET_DEFAULT_EVENTS_LISTING($filters: FilterInputDtoInput, $pageSize: Int, $page: Int) {
  eventListings(filters: $filters, pageSize: $pageSize, page: $page) {
    data {
      listingDate
      event {
        id
        title
        date
        startTime
        endTime
        contentUrl
        images { filename }
        venue { id name address }
        pick { blurb }
      }
    }
    totalResults
  }
}
"#;

#[derive(Debug, Clone)]
pub struct ResidentAdvisorCrawler {
    settings: CrawlerSettings,
    endpoint: String,
}

impl ResidentAdvisorCrawler {
    pub fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_secs(2)),
            endpoint: GRAPHQL_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for ResidentAdvisorCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let payload = listings_request(Local::now().date_naive());
        let response = http
            .post_json(&self.endpoint, &payload, &[("Referer", REFERER)])
            .await?;
        let body: JsonValue = response
            .json()
            .map_err(|e| CrawlerError::Parse(format!("{NAME}: {e}")))?;
        Ok(parse_listings(&body))
    }
}

/// GraphQL request for the first page of listings dated `today` through two
/// weeks out.
pub fn listings_request(today: NaiveDate) -> JsonValue {
    let until = today
        .checked_add_days(chrono::Days::new(WINDOW_DAYS))
        .unwrap_or(today);
    json!({
        "query": EVENTS_QUERY,
        "variables": {
            "filters": {
                "areas": { "eq": NEW_YORK_AREA },
                "listingDate": {
                    "gte": today.format("%Y-%m-%d").to_string(),
                    "lte": until.format("%Y-%m-%d").to_string(),
                },
            },
            "pageSize": PAGE_SIZE,
            "page": 1,
        },
    })
}

pub fn parse_listings(body: &JsonValue) -> Vec<EventDraft> {
    body.pointer("/data/eventListings/data")
        .and_then(JsonValue::as_array)
        .map(|listings| listings.iter().filter_map(parse_listing).collect())
        .unwrap_or_default()
}

fn parse_listing(listing: &JsonValue) -> Option<EventDraft> {
    let event = listing.get("event")?;
    let title = json_str(event, &["title"])?;
    let start = json_str(event, &["startTime"])
        .or_else(|| json_str(event, &["date"]))
        .or_else(|| json_str(listing, &["listingDate"]))
        .and_then(parse_time);
    let Some(start) = start else {
        debug!(source = NAME, title, "skipping listing without a usable date");
        return None;
    };

    let mut draft = EventDraft::new(NAME, title, start);
    draft.end_time = json_str(event, &["endTime"]).and_then(parse_time);
    draft.venue = json_str(event, &["venue", "name"]).map(str::to_string);
    draft.address = json_str(event, &["venue", "address"]).map(str::to_string);
    draft.url = json_str(event, &["contentUrl"]).map(|path| format!("{SITE}{path}"));
    draft.image_url = event
        .pointer("/images/0/filename")
        .and_then(JsonValue::as_str)
        .filter(|f| !f.trim().is_empty())
        .map(|f| format!("{SITE}/images/events/{f}"));
    draft.description = description(json_str(event, &["pick", "blurb"]));
    draft.category = Some(CATEGORY.to_string());
    draft.source_id = event.get("id").and_then(json_id);
    Some(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixture;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use radar_storage::{BackoffPolicy, HttpClientConfig};

    #[test]
    fn request_covers_two_weeks_of_new_york() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let request = listings_request(today);
        let vars = &request["variables"];
        assert_eq!(vars["filters"]["areas"]["eq"], 218);
        assert_eq!(vars["filters"]["listingDate"]["gte"], "2026-02-20");
        assert_eq!(vars["filters"]["listingDate"]["lte"], "2026-03-06");
        assert_eq!(vars["pageSize"], 50);
        assert!(request["query"].as_str().unwrap().contains("eventListings"));
    }

    #[test]
    fn parses_graphql_listings() {
        let body: JsonValue =
            serde_json::from_str(&fixture(NAME, "listings.json")).expect("fixture json");
        let drafts = parse_listings(&body);
        let titles: Vec<_> = drafts.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["Basement Techno All Night", "Sunday Soul Brunch"]);

        let techno = &drafts[0];
        assert_eq!(techno.start_time.to_string(), "2026-02-20T23:00:00");
        assert_eq!(
            techno.end_time.map(|t| t.to_string()).as_deref(),
            Some("2026-02-21T06:00:00")
        );
        assert_eq!(techno.venue.as_deref(), Some("Basement"));
        assert_eq!(techno.address.as_deref(), Some("52-19 Flushing Ave, Queens"));
        assert_eq!(techno.url.as_deref(), Some("https://ra.co/events/2101234"));
        assert_eq!(
            techno.image_url.as_deref(),
            Some("https://ra.co/images/events/flyer/2026/2/us-0220-2101234-front.jpg")
        );
        assert_eq!(techno.description.as_deref(), Some("Twelve hours in the dark."));
        assert_eq!(techno.category.as_deref(), Some("music"));
        assert_eq!(techno.source_id.as_deref(), Some("2101234"));

        let brunch = &drafts[1];
        assert_eq!(brunch.start_time.to_string(), "2026-02-22T00:00:00");
        assert_eq!(brunch.image_url, None);
        assert_eq!(brunch.description, None);
    }

    #[tokio::test]
    async fn scrape_posts_the_query_with_a_referer() {
        type Seen = Arc<Mutex<Vec<(JsonValue, Option<String>)>>>;
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/graphql",
                post(
                    |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<JsonValue>| async move {
                        let referer = headers
                            .get("referer")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((body, referer));
                        Json(json!({"data": {"eventListings": {"data": [
                            {"listingDate": "2026-02-20T00:00:00.000",
                             "event": {"id": "1", "title": "Warmup", "date": "2026-02-20T00:00:00.000"}}
                        ]}}}))
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let crawler = ResidentAdvisorCrawler::new()
            .unwrap()
            .with_endpoint(format!("http://{addr}/graphql"));
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
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Warmup");

        let seen = seen.lock().unwrap();
        let (body, referer) = &seen[0];
        assert_eq!(body["variables"]["filters"]["areas"]["eq"], 218);
        assert_eq!(referer.as_deref(), Some(REFERER));
    }
}

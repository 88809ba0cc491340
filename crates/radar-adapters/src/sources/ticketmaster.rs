//! Ticketmaster Discovery API v2, New York DMA.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::{EventDraft, EventTime};
use radar_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::extract::{description, json_first_str, json_str, parse_time};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "ticketmaster";
pub const ENDPOINT: &str = "https://app.ticketmaster.com/discovery/v2/events.json";
pub const API_KEY_ENV: &str = "TICKETMASTER_API_KEY";
const DMA_NEW_YORK: &str = "345";
const PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone)]
pub struct TicketmasterCrawler {
    settings: CrawlerSettings,
    endpoint: String,
    api_key: String,
}

impl TicketmasterCrawler {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CrawlerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CrawlerError::Configuration(format!(
                "{API_KEY_ENV} must not be empty"
            )));
        }
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_millis(250)),
            endpoint: ENDPOINT.to_string(),
            api_key,
        })
    }

    pub fn from_env() -> Result<Self, CrawlerError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            CrawlerError::Configuration(format!("{API_KEY_ENV} environment variable is required"))
        })?;
        Self::new(api_key)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for TicketmasterCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let mut drafts = Vec::new();
        let mut page: u32 = 0;
        loop {
            let params = [
                ("apikey", self.api_key.clone()),
                ("dmaId", DMA_NEW_YORK.to_string()),
                ("size", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
                ("sort", "date,asc".to_string()),
            ];
            let response = http.fetch_with_query(&self.endpoint, &params).await?;
            let body: JsonValue = response
                .json()
                .map_err(|e| CrawlerError::Parse(format!("{NAME} page {page}: {e}")))?;

            let Some(items) = body
                .pointer("/_embedded/events")
                .and_then(JsonValue::as_array)
            else {
                break;
            };
            drafts.extend(items.iter().filter_map(parse_event));

            page += 1;
            let total_pages = body
                .pointer("/page/totalPages")
                .and_then(JsonValue::as_u64)
                .unwrap_or(0);
            if u64::from(page) >= total_pages {
                break;
            }
        }
        Ok(drafts)
    }
}

/// Drafts from one Discovery API response body.
pub fn parse_page(body: &JsonValue) -> Vec<EventDraft> {
    body.pointer("/_embedded/events")
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().filter_map(parse_event).collect())
        .unwrap_or_default()
}

fn start_time(item: &JsonValue) -> Option<EventTime> {
    if let Some(at) = json_str(item, &["dates", "start", "dateTime"]) {
        return parse_time(at);
    }
    let date = json_str(item, &["dates", "start", "localDate"])?;
    match json_str(item, &["dates", "start", "localTime"]) {
        Some(time) => parse_time(&format!("{date}T{time}")).or_else(|| parse_time(date)),
        None => parse_time(date),
    }
}

fn price_range(item: &JsonValue) -> Option<String> {
    let range = item.pointer("/priceRanges/0")?;
    let currency = json_str(range, &["currency"]).unwrap_or("USD");
    let min = range.get("min").and_then(JsonValue::as_f64);
    let max = range.get("max").and_then(JsonValue::as_f64);
    match (min, max) {
        (Some(lo), Some(hi)) => Some(format!("{currency} {lo:.0}-{hi:.0}")),
        (Some(lo), None) => Some(format!("From {currency} {lo:.0}")),
        _ => None,
    }
}

fn parse_event(item: &JsonValue) -> Option<EventDraft> {
    let title = json_str(item, &["name"])?;
    let Some(start) = start_time(item) else {
        debug!(source = NAME, title, "skipping event without a start date");
        return None;
    };

    let mut draft = EventDraft::new(NAME, title, start);
    draft.end_time = json_str(item, &["dates", "end", "dateTime"]).and_then(parse_time);
    draft.description = description(json_first_str(item, &["info", "pleaseNote"]));
    draft.url = json_str(item, &["url"]).map(str::to_string);
    draft.source_id = json_str(item, &["id"]).map(str::to_string);
    draft.category = item
        .pointer("/classifications/0/segment/name")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    draft.image_url = item
        .pointer("/images/0/url")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    draft.price = price_range(item);

    if let Some(venue) = item.pointer("/_embedded/venues/0") {
        draft.venue = json_str(venue, &["name"]).map(str::to_string);
        let address = [
            json_str(venue, &["address", "line1"]),
            json_str(venue, &["city", "name"]),
            json_str(venue, &["state", "stateCode"]),
            json_str(venue, &["postalCode"]),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
        draft.address = (!address.is_empty()).then_some(address);
    }
    Some(draft)
}

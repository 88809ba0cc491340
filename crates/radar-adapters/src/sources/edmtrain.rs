//! EDMTrain's event API, filtered to New York state.

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::extract::{absolute_url, json_first_str, json_id, json_str, parse_time, price_from_json};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "edmtrain";
pub const ENDPOINT: &str = "https://edmtrain.com/api/events";
pub const API_KEY_ENV: &str = "EDMTRAIN_API_KEY";
const STATE: &str = "New York";
const SITE: &str = "https://edmtrain.com/";
const CATEGORY: &str = "Music/EDM";
const TITLE_ARTISTS: usize = 3;

#[derive(Debug, Clone)]
pub struct EdmTrainCrawler {
    settings: CrawlerSettings,
    endpoint: String,
    api_key: String,
}

impl EdmTrainCrawler {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CrawlerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CrawlerError::Configuration(format!(
                "{API_KEY_ENV} must not be empty"
            )));
        }
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?,
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
impl SourceCrawler for EdmTrainCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let params = [("client", self.api_key.as_str()), ("state", STATE)];
        let response = http.fetch_with_query(&self.endpoint, &params).await?;
        let body: JsonValue = response
            .json()
            .map_err(|e| CrawlerError::Parse(format!("{NAME}: {e}")))?;
        parse_events(&body)
    }
}

/// Drafts from an API body, which is either a bare array or `{"data": [...]}`.
pub fn parse_events(body: &JsonValue) -> Result<Vec<EventDraft>, CrawlerError> {
    let site = Url::parse(SITE).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let items = body
        .as_array()
        .or_else(|| body.get("data").and_then(JsonValue::as_array));
    Ok(items
        .map(|items| items.iter().filter_map(|item| parse_event(item, &site)).collect())
        .unwrap_or_default())
}

fn artist_names(item: &JsonValue) -> Vec<&str> {
    item.get("artistList")
        .and_then(JsonValue::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|artist| json_str(artist, &["name"]))
                .collect()
        })
        .unwrap_or_default()
}

/// The billed name, else up to three headliners.
fn title(item: &JsonValue, artists: &[&str]) -> Option<String> {
    if let Some(name) = json_first_str(item, &["name", "title"]) {
        return Some(name.to_string());
    }
    if artists.is_empty() {
        return None;
    }
    let mut title = artists[..artists.len().min(TITLE_ARTISTS)].join(", ");
    if artists.len() > TITLE_ARTISTS {
        title.push_str(" + more");
    }
    Some(title)
}

fn parse_event(item: &JsonValue, site: &Url) -> Option<EventDraft> {
    let artists = artist_names(item);
    let title = title(item, &artists)?;

    let venue = item.get("venue");
    if let Some(state) = venue.and_then(|v| json_str(v, &["state"])) {
        if state != STATE {
            debug!(source = NAME, title = %title, state, "skipping out-of-state event");
            return None;
        }
    }
    let Some(start) = json_str(item, &["date"]).and_then(parse_time) else {
        debug!(source = NAME, title = %title, "skipping event without a date");
        return None;
    };

    let mut draft = EventDraft::new(NAME, title, start);
    draft.description = (!artists.is_empty()).then(|| artists.join(", "));
    draft.venue = venue.and_then(|v| json_str(v, &["name"])).map(str::to_string);
    draft.address = venue
        .and_then(|v| json_str(v, &["location"]))
        .map(str::to_string);
    draft.url = json_str(item, &["link"]).and_then(|link| absolute_url(site, link));
    draft.category = Some(CATEGORY.to_string());
    draft.source_id = item.get("id").and_then(json_id);
    draft.image_url = json_str(item, &["image"]).map(str::to_string);
    draft.price = item.get("ticketPrice").and_then(price_from_json);
    Some(draft)
}

//! Eventbrite's New York search listing: JSON-LD first, event cards as fallback.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use scraper::{ElementRef, Html};
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::extract::{
    absolute_url, description, element_text, first_attr, first_text, json_str, parse_time,
    price_from_json, selector,
};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "eventbrite";
pub const SEARCH_URL: &str = "https://www.eventbrite.com/d/ny--new-york/events/";
const SITE: &str = "https://www.eventbrite.com/";

#[derive(Debug, Clone)]
pub struct EventbriteCrawler {
    settings: CrawlerSettings,
    listing_url: String,
}

impl EventbriteCrawler {
    pub fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_secs(2)),
            listing_url: SEARCH_URL.to_string(),
        })
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = url.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for EventbriteCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let page = http.fetch(&self.listing_url).await?;
        parse_listing(&page.text())
    }
}

/// Events from a search listing page. Structured data wins; cards are only
/// consulted when the page carries no JSON-LD events.
pub fn parse_listing(html: &str) -> Result<Vec<EventDraft>, CrawlerError> {
    let site = Url::parse(SITE).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    let drafts = from_json_ld(&document)?;
    if !drafts.is_empty() {
        return Ok(drafts);
    }
    from_cards(&document, &site)
}

fn from_json_ld(document: &Html) -> Result<Vec<EventDraft>, CrawlerError> {
    let scripts = selector(r#"script[type="application/ld+json"]"#)?;
    let mut drafts = Vec::new();
    for script in document.select(&scripts) {
        let text = script.text().collect::<String>();
        let data: JsonValue = match serde_json::from_str(&text) {
            Ok(data) => data,
            Err(err) => {
                debug!(source = NAME, error = %err, "skipping unreadable JSON-LD block");
                continue;
            }
        };
        let items = match data {
            JsonValue::Array(items) => items,
            other => vec![other],
        };
        drafts.extend(
            items
                .iter()
                .filter(|item| json_str(item, &["@type"]) == Some("Event"))
                .filter_map(event_from_json_ld),
        );
    }
    Ok(drafts)
}

fn event_from_json_ld(item: &JsonValue) -> Option<EventDraft> {
    let title = json_str(item, &["name"])?;
    let start = json_str(item, &["startDate"]).and_then(parse_time)?;

    let mut draft = EventDraft::new(NAME, title, start);
    draft.end_time = json_str(item, &["endDate"]).and_then(parse_time);
    draft.description = description(json_str(item, &["description"]));

    if let Some(location) = item.get("location").filter(|l| l.is_object()) {
        draft.venue = json_str(location, &["name"]).map(str::to_string);
        draft.address = json_str(location, &["address", "streetAddress"])
            .or_else(|| json_str(location, &["address"]))
            .map(str::to_string);
    }

    draft.image_url = match item.get("image") {
        Some(JsonValue::Array(images)) => images.first().and_then(JsonValue::as_str),
        Some(image) => image.as_str(),
        None => None,
    }
    .map(str::to_string);

    let offer = match item.get("offers") {
        Some(JsonValue::Array(offers)) => offers.first(),
        other => other,
    };
    draft.price = offer
        .and_then(|o| o.get("price"))
        .and_then(price_from_json);

    if let Some(url) = json_str(item, &["url"]) {
        draft.source_id = url
            .trim_end_matches('/')
            .rsplit('-')
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        draft.url = Some(url.to_string());
    }
    Some(draft)
}

fn from_cards(document: &Html, site: &Url) -> Result<Vec<EventDraft>, CrawlerError> {
    let cards = selector("a[href*='/e/']")?;
    let heading = selector("h2, h3")?;
    let time = selector("time[datetime]")?;

    let mut drafts = Vec::new();
    for card in document.select(&cards) {
        if let Some(draft) = event_from_card(card, site, &heading, &time) {
            drafts.push(draft);
        }
    }
    Ok(drafts)
}

fn event_from_card(
    card: ElementRef<'_>,
    site: &Url,
    heading: &scraper::Selector,
    time: &scraper::Selector,
) -> Option<EventDraft> {
    let href = card.value().attr("href")?;
    let title = first_text(card, heading).unwrap_or_else(|| element_text(card));
    if title.chars().count() < 3 {
        return None;
    }
    let Some(start) = first_attr(card, time, "datetime").and_then(|t| parse_time(&t)) else {
        debug!(source = NAME, title = %title, "skipping card without a start time");
        return None;
    };

    let mut draft = EventDraft::new(NAME, title, start);
    draft.url = absolute_url(site, href);
    Some(draft)
}

//! Dice's New York city page. The listing ships its data as embedded page
//! state; rendered cards are the last resort.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use crate::extract::{
    absolute_url, description, first_attr, first_text, json_first_str, json_id, json_str,
    parse_time, price_from_json, selector,
};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "dice";
pub const CITY_URL: &str = "https://dice.fm/city/new-york";
const SITE: &str = "https://dice.fm/";
const NEXT_DATA_KEYS: [&str; 4] = ["events", "initialEvents", "eventList", "data"];
const STATE_KEYS: [&str; 3] = ["events", "listings", "cityEvents"];

#[derive(Debug, Clone)]
pub struct DiceCrawler {
    settings: CrawlerSettings,
    listing_url: String,
}

impl DiceCrawler {
    pub fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_secs(2)),
            listing_url: CITY_URL.to_string(),
        })
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = url.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for DiceCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let page = http.fetch(&self.listing_url).await?;
        parse_listing(&page.text())
    }
}

/// Try `__NEXT_DATA__`, then `window.__DICE_STATE__`, then rendered cards,
/// stopping at the first strategy that yields events.
pub fn parse_listing(html: &str) -> Result<Vec<EventDraft>, CrawlerError> {
    let site = Url::parse(SITE).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    let next_data = selector("script#__NEXT_DATA__")?;
    if let Some(script) = document.select(&next_data).next() {
        let text = script.text().collect::<String>();
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(data) => {
                let drafts = from_next_data(&data, &site);
                if !drafts.is_empty() {
                    return Ok(drafts);
                }
            }
            Err(err) => debug!(source = NAME, error = %err, "unreadable __NEXT_DATA__"),
        }
    }

    if let Some(state) = embedded_state(&document)? {
        let drafts = from_state(&state, &site);
        if !drafts.is_empty() {
            return Ok(drafts);
        }
    }

    from_cards(&document, &site)
}

fn from_next_data(data: &JsonValue, site: &Url) -> Vec<EventDraft> {
    let Some(props) = data.pointer("/props/pageProps") else {
        return Vec::new();
    };
    for key in NEXT_DATA_KEYS {
        let items = match props.get(key) {
            Some(JsonValue::Object(inner)) => inner.get("data").or_else(|| inner.get("events")),
            other => other,
        };
        let Some(items) = items.and_then(JsonValue::as_array) else {
            continue;
        };
        let drafts: Vec<_> = items.iter().filter_map(|i| parse_event(i, site)).collect();
        if !drafts.is_empty() {
            return drafts;
        }
    }
    Vec::new()
}

fn from_state(state: &JsonValue, site: &Url) -> Vec<EventDraft> {
    STATE_KEYS
        .iter()
        .filter_map(|key| state.get(*key).and_then(JsonValue::as_array))
        .flatten()
        .filter_map(|item| parse_event(item, site))
        .collect()
}

/// The object literal assigned to `window.__DICE_STATE__` in any inline script.
fn embedded_state(document: &Html) -> Result<Option<JsonValue>, CrawlerError> {
    let scripts = selector("script")?;
    let assignment = Regex::new(r"window\.__DICE_STATE__\s*=\s*")
        .map_err(|e| CrawlerError::Parse(e.to_string()))?;

    for script in document.select(&scripts) {
        let text = script.text().collect::<String>();
        let Some(found) = assignment.find(&text) else {
            continue;
        };
        let mut values =
            serde_json::Deserializer::from_str(&text[found.end()..]).into_iter::<JsonValue>();
        return Ok(match values.next() {
            Some(Ok(state)) if state.is_object() => Some(state),
            Some(Err(err)) => {
                debug!(source = NAME, error = %err, "unreadable __DICE_STATE__");
                None
            }
            _ => None,
        });
    }
    Ok(None)
}

fn parse_event(item: &JsonValue, site: &Url) -> Option<EventDraft> {
    let title = json_first_str(item, &["name", "title"])?;
    let start = json_first_str(item, &["date", "startDate", "start_date"])
        .or_else(|| json_str(item, &["dates", "start"]))
        .and_then(parse_time)?;

    let mut draft = EventDraft::new(NAME, title, start);
    draft.end_time = json_first_str(item, &["endDate", "end_date"])
        .or_else(|| json_str(item, &["dates", "end"]))
        .and_then(parse_time);
    draft.description = description(json_str(item, &["description"]));
    draft.category = json_first_str(item, &["genre", "category"]).map(str::to_string);
    draft.source_id = item.get("id").and_then(json_id);
    draft.url = json_first_str(item, &["url", "link"]).and_then(|href| absolute_url(site, href));
    draft.image_url = image(item);

    match item.get("venue") {
        Some(JsonValue::String(name)) => draft.venue = Some(name.trim().to_string()),
        Some(venue) => {
            draft.venue = json_str(venue, &["name"]).map(str::to_string);
            draft.address = json_str(venue, &["address"]).map(str::to_string);
        }
        None => {}
    }

    let raw_price = item
        .get("price")
        .filter(|p| !p.is_null())
        .or_else(|| item.get("cost"));
    draft.price = match raw_price {
        Some(price @ JsonValue::Object(_)) => {
            json_first_str(price, &["display", "formatted"]).map(str::to_string)
        }
        Some(price) => price_from_json(price),
        None => None,
    };
    Some(draft)
}

fn image(item: &JsonValue) -> Option<String> {
    let images = item.get("images").or_else(|| item.get("image"))?;
    let url = match images {
        JsonValue::String(url) => Some(url.as_str()),
        JsonValue::Array(list) => list.first().and_then(|first| match first {
            JsonValue::String(url) => Some(url.as_str()),
            other => json_str(other, &["url"]),
        }),
        JsonValue::Object(_) => json_first_str(images, &["url", "src"]),
        _ => None,
    }?;
    Some(url.to_string())
}

fn from_cards(document: &Html, site: &Url) -> Result<Vec<EventDraft>, CrawlerError> {
    let cards = selector("a[href*='/event/']")?;
    let heading = selector("h3, h2, span")?;
    let time = selector("time[datetime]")?;
    Ok(document
        .select(&cards)
        .filter_map(|card| event_from_card(card, site, &heading, &time))
        .collect())
}

fn event_from_card(
    card: ElementRef<'_>,
    site: &Url,
    heading: &Selector,
    time: &Selector,
) -> Option<EventDraft> {
    let href = card.value().attr("href")?;
    let title = first_text(card, heading)?;
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

//! DoNYC listing cards, read through their schema.org microdata.

use async_trait::async_trait;
use radar_core::EventDraft;
use radar_storage::HttpFetcher;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::extract::{absolute_url, element_text, first_attr, first_text, parse_time, selector};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "donyc";
pub const EVENTS_URL: &str = "https://donyc.com/events";
const SITE: &str = "https://donyc.com/";
const CATEGORY_CLASS_PREFIX: &str = "ds-event-category-";

#[derive(Debug, Clone)]
pub struct DoNycCrawler {
    settings: CrawlerSettings,
    listing_url: String,
}

impl DoNycCrawler {
    pub fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?,
            listing_url: EVENTS_URL.to_string(),
        })
    }

    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = url.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for DoNycCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let page = http.fetch(&self.listing_url).await?;
        parse_listing(&page.text())
    }
}

struct CardSelectors {
    title: Selector,
    link: Selector,
    start: Selector,
    end: Selector,
    location: Selector,
    venue: Selector,
    street: Selector,
    cover: Selector,
    banner: Selector,
    cover_url: Regex,
}

impl CardSelectors {
    fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            title: selector("span[itemprop='name']")?,
            link: selector("a[itemprop='url']")?,
            start: selector("meta[itemprop='startDate']")?,
            end: selector("meta[itemprop='endDate']")?,
            location: selector("[itemprop='location']")?,
            venue: selector("span[itemprop='name']")?,
            street: selector("meta[itemprop='streetAddress']")?,
            cover: selector(".ds-cover-image")?,
            banner: selector(".ds-listing-banners")?,
            cover_url: Regex::new(r#"url\(['"]?(https?://[^'")\s]+)"#)
                .map_err(|e| CrawlerError::Parse(e.to_string()))?,
        })
    }
}

pub fn parse_listing(html: &str) -> Result<Vec<EventDraft>, CrawlerError> {
    let site = Url::parse(SITE).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let selectors = CardSelectors::new()?;
    let listings = selector(".ds-listing")?;
    let document = Html::parse_document(html);

    Ok(document
        .select(&listings)
        .filter_map(|card| parse_card(card, &selectors, &site))
        .collect())
}

fn parse_card(card: ElementRef<'_>, sel: &CardSelectors, site: &Url) -> Option<EventDraft> {
    let title = first_text(card, &sel.title)?;
    let href = first_attr(card, &sel.link, "href")?;
    let Some(start) = first_attr(card, &sel.start, "content").and_then(|t| parse_time(&t)) else {
        debug!(source = NAME, title = %title, "skipping card without startDate");
        return None;
    };

    let mut draft = EventDraft::new(NAME, title, start);
    draft.url = absolute_url(site, &href);
    draft.end_time = first_attr(card, &sel.end, "content").and_then(|t| parse_time(&t));

    if let Some(location) = card.select(&sel.location).next() {
        draft.venue = first_text(location, &sel.venue);
        draft.address = first_attr(location, &sel.street, "content");
    }

    draft.image_url = first_attr(card, &sel.cover, "style").and_then(|style| {
        sel.cover_url
            .captures(&style)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    });

    draft.category = card
        .value()
        .classes()
        .find_map(|class| class.strip_prefix(CATEGORY_CLASS_PREFIX))
        .map(title_case);

    draft.price = card
        .select(&sel.banner)
        .next()
        .map(element_text)
        .filter(|text| text.contains("Free"))
        .map(|_| "Free".to_string());

    draft.source_id = card
        .value()
        .attr("data-permalink")
        .and_then(|p| p.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    Some(draft)
}

/// `comedy-shows` becomes `Comedy Shows`.
fn title_case(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixture;

    #[test]
    fn microdata_cards_are_parsed() {
        let drafts = parse_listing(&fixture(NAME, "listing.html")).unwrap();
        assert_eq!(drafts.len(), 2);

        let comedy = &drafts[0];
        assert_eq!(comedy.title, "Late Night Standup Showcase");
        assert_eq!(comedy.start_time.to_string(), "2026-02-15T19:00:00-05:00");
        assert_eq!(
            comedy.end_time.map(|t| t.to_string()).as_deref(),
            Some("2026-02-15T21:00:00-05:00")
        );
        assert_eq!(
            comedy.url.as_deref(),
            Some("https://donyc.com/events/2026/2/15/late-night-standup-showcase")
        );
        assert_eq!(comedy.venue.as_deref(), Some("Union Hall"));
        assert_eq!(comedy.address.as_deref(), Some("702 Union St, Brooklyn, NY"));
        assert_eq!(comedy.category.as_deref(), Some("Comedy Shows"));
        assert_eq!(comedy.price.as_deref(), Some("Free"));
        assert_eq!(comedy.source_id.as_deref(), Some("late-night-standup-showcase"));
        assert_eq!(
            comedy.image_url.as_deref(),
            Some("https://donyc-images.example/standup.jpg")
        );

        let gig = &drafts[1];
        assert_eq!(gig.category.as_deref(), Some("Music"));
        assert_eq!(gig.price, None);
        assert_eq!(gig.image_url, None);
    }

    #[test]
    fn slugs_become_title_case() {
        assert_eq!(title_case("music"), "Music");
        assert_eq!(title_case("arts-and-THEATRE"), "Arts And Theatre");
    }
}

//! The Skint's daily roundup: find the newest post on the homepage, then read
//! one event per paragraph or list item of that post.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime};
use radar_core::{clip_text, EventDraft, EventTime};
use radar_storage::HttpFetcher;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::extract::{absolute_url, description, element_text, first_attr, first_text, selector};
use crate::{CrawlerError, CrawlerSettings, SourceCrawler};

pub const NAME: &str = "the_skint";
pub const HOME_URL: &str = "https://theskint.com/";
const POST_LINK_SELECTORS: [&str; 5] = [
    "article a",
    "h2 a",
    ".entry-title a",
    ".post-title a",
    "a[rel='bookmark']",
];
const CONTENT_SELECTORS: [&str; 3] = ["div.entry-content", "div.post-content", "article"];
const BOILERPLATE: [&str; 5] = ["subscribe", "follow us", "copyright", "advertisement", "sign up"];
const MIN_BLOCK_CHARS: usize = 15;
const MIN_TITLE_CHARS: usize = 5;
const TITLE_MAX_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct TheSkintCrawler {
    settings: CrawlerSettings,
    home_url: String,
}

impl TheSkintCrawler {
    pub fn new() -> Result<Self, CrawlerError> {
        Ok(Self {
            settings: CrawlerSettings::new(NAME)?.with_rate_limit(Duration::from_secs(2)),
            home_url: HOME_URL.to_string(),
        })
    }

    pub fn with_home_url(mut self, url: impl Into<String>) -> Self {
        self.home_url = url.into();
        self
    }
}

#[async_trait]
impl SourceCrawler for TheSkintCrawler {
    fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    async fn scrape(&self, http: &HttpFetcher) -> Result<Vec<EventDraft>, CrawlerError> {
        let home = http.fetch(&self.home_url).await?;
        let Some(post_url) = latest_post_url(&home.text(), &home.final_url)? else {
            warn!(source = NAME, "no post link on the homepage");
            return Ok(Vec::new());
        };
        debug!(source = NAME, post = %post_url, "reading latest post");
        let post = http.fetch(&post_url).await?;
        let day = post_date(&post_url).unwrap_or_else(|| Local::now().date_naive());
        parse_post(&post.text(), &post.final_url, day)
    }
}

/// Absolute URL of the newest post linked from the homepage.
pub fn latest_post_url(html: &str, home_url: &str) -> Result<Option<String>, CrawlerError> {
    let base = Url::parse(home_url).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    for css in POST_LINK_SELECTORS {
        let sel = selector(css)?;
        if let Some(href) = first_attr(document.root_element(), &sel, "href") {
            return Ok(absolute_url(&base, &href));
        }
    }

    let dated = Regex::new(r"/\d{4}/\d{2}/").map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let anchors = selector("a[href]")?;
    Ok(document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| dated.is_match(href))
        .and_then(|href| absolute_url(&base, href)))
}

/// Publication date encoded in a WordPress permalink like `/2026/02/14/slug/`.
pub fn post_date(url: &str) -> Option<NaiveDate> {
    let dated = Regex::new(r"/(\d{4})/(\d{2})/(\d{2})/").ok()?;
    let caps = dated.captures(url)?;
    NaiveDate::from_ymd_opt(
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    )
}

struct BlockPatterns {
    bold: Selector,
    link: Selector,
    time: Regex,
    price: Regex,
    venue: Regex,
}

impl BlockPatterns {
    fn new() -> Result<Self, CrawlerError> {
        let regex = |pattern: &str| Regex::new(pattern).map_err(|e| CrawlerError::Parse(e.to_string()));
        Ok(Self {
            bold: selector("strong, b")?,
            link: selector("a[href]")?,
            time: regex(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b\.?")?,
            price: regex(r"\$(\d+(?:\.\d{2})?)")?,
            venue: regex(r"\bat\s+([A-Z][^,.;:(\n]{3,40})")?,
        })
    }
}

/// Events from one roundup post. Every listing is dated `day`; blocks without
/// a clock time start at 19:00.
pub fn parse_post(html: &str, post_url: &str, day: NaiveDate) -> Result<Vec<EventDraft>, CrawlerError> {
    let base = Url::parse(post_url).map_err(|e| CrawlerError::Parse(e.to_string()))?;
    let patterns = BlockPatterns::new()?;
    let blocks = selector("p, li")?;
    let document = Html::parse_document(html);

    let mut content = None;
    for css in CONTENT_SELECTORS {
        let sel = selector(css)?;
        if let Some(found) = document.select(&sel).next() {
            content = Some(found);
            break;
        }
    }
    let Some(content) = content else {
        return Ok(Vec::new());
    };

    Ok(content
        .select(&blocks)
        .filter_map(|block| parse_block(block, &patterns, &base, day))
        .collect())
}

fn parse_block(block: ElementRef<'_>, pat: &BlockPatterns, base: &Url, day: NaiveDate) -> Option<EventDraft> {
    let text = element_text(block);
    if text.chars().count() < MIN_BLOCK_CHARS {
        return None;
    }
    let lower = text.to_lowercase();
    if BOILERPLATE.iter().any(|kw| lower.contains(kw)) {
        return None;
    }

    let title = first_text(block, &pat.bold)
        .or_else(|| first_text(block, &pat.link))
        .or_else(|| text.split('.').next().map(|s| s.trim().to_string()))?;
    if title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }
    let title = clip_text(&title, TITLE_MAX_CHARS)?;

    let start = day.and_time(clock_time(&pat.time, &text));
    let mut draft = EventDraft::new(NAME, title, EventTime::naive(start));
    if text != draft.title {
        draft.description = description(Some(text.as_str()));
    }
    draft.url = first_attr(block, &pat.link, "href").and_then(|href| absolute_url(base, &href));
    draft.venue = pat
        .venue
        .captures(&text)
        .map(|c| c[1].trim().to_string());
    draft.price = if lower.contains("free") {
        Some("Free".to_string())
    } else {
        pat.price.captures(&text).map(|c| format!("${}", &c[1]))
    };
    Some(draft)
}

/// First `7pm`, `7:30 p.m.` style time in the text; 19:00 when absent or nonsense.
fn clock_time(pattern: &Regex, text: &str) -> NaiveTime {
    let evening = NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default();
    let Some(caps) = pattern.captures(text) else {
        return evening;
    };
    let hour: u32 = caps[1].parse().unwrap_or(0);
    let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    if !(1..=12).contains(&hour) {
        return evening;
    }
    let pm = caps[3].eq_ignore_ascii_case("p");
    let hour = match (pm, hour) {
        (false, 12) => 0,
        (true, 12) => 12,
        (true, h) => h + 12,
        (false, h) => h,
    };
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(evening)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixture;

    use axum::routing::get;
    use axum::Router;
    use radar_storage::{BackoffPolicy, HttpClientConfig};

    fn valentines() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 14).unwrap()
    }

    #[test]
    fn homepage_links_to_the_newest_post() {
        let url = latest_post_url(&fixture(NAME, "home.html"), HOME_URL).unwrap();
        assert_eq!(
            url.as_deref(),
            Some("https://theskint.com/2026/02/14/sat-2-14-valentines-roundup/")
        );
    }

    #[test]
    fn dated_hrefs_are_the_fallback_post_link() {
        let html = r#"<html><body><nav><a href="/about">about</a></nav>
            <div><a href="/2026/02/13/fri-2-13/">friday</a></div></body></html>"#;
        let url = latest_post_url(html, HOME_URL).unwrap();
        assert_eq!(url.as_deref(), Some("https://theskint.com/2026/02/13/fri-2-13/"));
        assert_eq!(latest_post_url("<p>nothing here</p>", HOME_URL).unwrap(), None);
    }

    #[test]
    fn permalinks_carry_the_post_date() {
        assert_eq!(
            post_date("https://theskint.com/2026/02/14/sat-2-14-valentines-roundup/"),
            Some(valentines())
        );
        assert_eq!(post_date("https://theskint.com/about/"), None);
    }

    #[test]
    fn roundup_blocks_become_events() {
        let drafts = parse_post(
            &fixture(NAME, "post.html"),
            "https://theskint.com/2026/02/14/sat-2-14-valentines-roundup/",
            valentines(),
        )
        .unwrap();
        let titles: Vec<_> = drafts.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Anti-Valentine's Karaoke", "Moonlit Botanic Garden Walk", "Zine Fair Afterparty"]
        );

        let karaoke = &drafts[0];
        assert_eq!(karaoke.start_time.to_string(), "2026-02-14T21:30:00");
        assert_eq!(karaoke.venue.as_deref(), Some("Union Pool"));
        assert_eq!(karaoke.price.as_deref(), Some("Free"));
        assert_eq!(karaoke.url.as_deref(), Some("https://unionpool.example/karaoke"));
        assert!(karaoke
            .description
            .as_deref()
            .unwrap()
            .starts_with("Anti-Valentine's Karaoke"));

        let walk = &drafts[1];
        assert_eq!(walk.start_time.to_string(), "2026-02-14T19:00:00");
        assert_eq!(walk.price.as_deref(), Some("$12"));
        assert_eq!(walk.venue.as_deref(), Some("Brooklyn Botanic Garden"));
        assert_eq!(
            walk.url.as_deref(),
            Some("https://theskint.com/events/moonlit-walk")
        );

        let fair = &drafts[2];
        assert_eq!(fair.start_time.to_string(), "2026-02-14T08:00:00");
        assert_eq!(fair.url, None);
    }

    #[test]
    fn clock_times_cover_the_common_spellings() {
        let pattern = BlockPatterns::new().unwrap().time;
        let at = |text: &str| clock_time(&pattern, text).format("%H:%M").to_string();
        assert_eq!(at("doors 7pm"), "19:00");
        assert_eq!(at("starts 7:30 p.m. sharp"), "19:30");
        assert_eq!(at("12am till late"), "00:00");
        assert_eq!(at("noon-ish 12 PM"), "12:00");
        assert_eq!(at("8 amazing bands"), "19:00");
        assert_eq!(at("13pm"), "19:00");
    }

    #[tokio::test]
    async fn scrape_follows_the_homepage_to_the_post() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { r#"<html><body><article><h2><a href="/2026/02/14/sat/">sat</a></h2></article></body></html>"# }),
            )
            .route(
                "/2026/02/14/sat/",
                get(|| async {
                    r#"<html><body><div class="entry-content">
                        <p><strong>Rooftop Film Club</strong> screens classics at Elsewhere Rooftop, 8pm, $15.</p>
                    </div></body></html>"#
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let crawler = TheSkintCrawler::new()
            .unwrap()
            .with_home_url(format!("http://{addr}/"));
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
        assert_eq!(drafts[0].title, "Rooftop Film Club");
        assert_eq!(drafts[0].start_time.to_string(), "2026-02-14T20:00:00");
        assert_eq!(drafts[0].venue.as_deref(), Some("Elsewhere Rooftop"));
        assert_eq!(drafts[0].price.as_deref(), Some("$15"));
    }
}

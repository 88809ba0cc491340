//! Small extraction helpers shared by the HTML and JSON crawlers.

use radar_core::{clip_text, EventTime, DESCRIPTION_MAX_CHARS};
use scraper::{ElementRef, Selector};
use serde_json::Value as JsonValue;
use url::Url;

use crate::CrawlerError;

pub(crate) fn selector(css: &str) -> Result<Selector, CrawlerError> {
    Selector::parse(css).map_err(|e| CrawlerError::Parse(format!("selector {css:?}: {e}")))
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Element text with runs of whitespace collapsed to single spaces.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| text_or_none(&element_text(n)))
}

pub(crate) fn first_attr(scope: ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    scope
        .select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none)
}

pub(crate) fn parse_time(text: &str) -> Option<EventTime> {
    EventTime::parse(text).ok()
}

pub(crate) fn description(text: Option<&str>) -> Option<String> {
    text.and_then(|t| clip_text(t, DESCRIPTION_MAX_CHARS))
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub(crate) fn absolute_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Numeric ticket price: zero is "Free", anything else "$N.NN".
pub(crate) fn format_price(value: f64) -> String {
    if value == 0.0 {
        "Free".to_string()
    } else {
        format!("${value:.2}")
    }
}

/// Price that may arrive as a number, a numeric string, or display text.
pub(crate) fn price_from_json(raw: &JsonValue) -> Option<String> {
    match raw {
        JsonValue::Number(n) => n.as_f64().map(format_price),
        JsonValue::String(s) => match s.trim().parse::<f64>() {
            Ok(v) => Some(format_price(v)),
            Err(_) => text_or_none(s),
        },
        _ => None,
    }
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// First non-blank string among `keys` on `value`.
pub(crate) fn json_first_str<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| json_str(value, &[*key]))
}

/// Identifiers published either as strings or as numbers.
pub(crate) fn json_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

//! Core event model shared by crawlers, ingestion, storage and the query layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const CRATE_NAME: &str = "radar-core";

/// Longest description a crawler keeps when it derives one from free text.
pub const DESCRIPTION_MAX_CHARS: usize = 500;

const ZONED_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized timestamp {input:?}")]
pub struct TimeParseError {
    pub input: String,
}

/// Event timestamp as the source published it: a wall-clock time plus the UTC
/// offset when the source supplied one.
///
/// The canonical text form (`Display`) is part of the natural key, so two
/// observations of one occurrence must render identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTime {
    local: NaiveDateTime,
    offset: Option<FixedOffset>,
}

impl EventTime {
    pub fn naive(local: NaiveDateTime) -> Self {
        Self {
            local,
            offset: None,
        }
    }

    pub fn zoned(at: DateTime<FixedOffset>) -> Self {
        Self {
            local: at.naive_local(),
            offset: Some(*at.offset()),
        }
    }

    pub fn local(&self) -> NaiveDateTime {
        self.local
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset
    }

    /// Calendar date as written, with no timezone conversion.
    pub fn date(&self) -> NaiveDate {
        self.local.date()
    }

    pub fn parse(input: &str) -> Result<Self, TimeParseError> {
        let text = input.trim();
        let err = || TimeParseError {
            input: input.to_string(),
        };
        if text.is_empty() {
            return Err(err());
        }

        if let Ok(at) = DateTime::parse_from_rfc3339(text) {
            return Ok(Self::zoned(at));
        }
        for fmt in ZONED_FORMATS {
            if let Ok(at) = DateTime::parse_from_str(text, fmt) {
                return Ok(Self::zoned(at));
            }
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(local) = NaiveDateTime::parse_from_str(text, fmt) {
                return Ok(Self::naive(local));
            }
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(Self::naive)
            .ok_or_else(err)
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.local.format("%Y-%m-%dT%H:%M:%S"))?;
        if self.local.nanosecond() != 0 {
            write!(f, "{}", self.local.format("%.6f"))?;
        }
        if let Some(offset) = self.offset {
            let secs = offset.local_minus_utc();
            let sign = if secs < 0 { '-' } else { '+' };
            let secs = secs.unsigned_abs();
            write!(f, "{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)?;
        }
        Ok(())
    }
}

impl FromStr for EventTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DateTime<FixedOffset>> for EventTime {
    fn from(at: DateTime<FixedOffset>) -> Self {
        Self::zoned(at)
    }
}

impl From<NaiveDateTime> for EventTime {
    fn from(local: NaiveDateTime) -> Self {
        Self::naive(local)
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// The five boroughs, serialized by display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Borough {
    Manhattan,
    Brooklyn,
    Queens,
    Bronx,
    #[serde(rename = "Staten Island")]
    StatenIsland,
}

impl Borough {
    pub const ALL: [Borough; 5] = [
        Borough::Manhattan,
        Borough::Brooklyn,
        Borough::Queens,
        Borough::Bronx,
        Borough::StatenIsland,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Borough::Manhattan => "Manhattan",
            Borough::Brooklyn => "Brooklyn",
            Borough::Queens => "Queens",
            Borough::Bronx => "Bronx",
            Borough::StatenIsland => "Staten Island",
        }
    }
}

impl fmt::Display for Borough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown borough {0:?}")]
pub struct UnknownBorough(pub String);

impl FromStr for Borough {
    type Err = UnknownBorough;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownBorough(s.to_string()))
    }
}

/// Unvalidated candidate produced by a crawler; the unit of an output batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub start_time: EventTime,
    #[serde(default)]
    pub end_time: Option<EventTime>,
    #[serde(default)]
    pub category: Option<String>,
    pub source: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

impl EventDraft {
    pub fn new(source: impl Into<String>, title: impl Into<String>, start_time: EventTime) -> Self {
        Self {
            title: title.into(),
            description: None,
            url: None,
            venue: None,
            address: None,
            start_time,
            end_time: None,
            category: None,
            source: source.into(),
            source_id: None,
            image_url: None,
            price: None,
        }
    }
}

/// Normalized record ready for upsert: derived fields are filled in and the
/// venue is never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub venue: String,
    pub address: Option<String>,
    pub borough: Option<Borough>,
    pub start_time: EventTime,
    pub end_time: Option<EventTime>,
    pub category: Option<String>,
    pub source: String,
    pub source_id: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub is_free: bool,
}

impl NewEvent {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            title: self.title.clone(),
            start_time: self.start_time.to_string(),
            venue: self.venue.clone(),
        }
    }
}

/// (title, start_time, venue): identifies one real-world occurrence for dedup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NaturalKey {
    pub title: String,
    pub start_time: String,
    pub venue: String,
}

/// Canonical stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub venue: String,
    pub address: Option<String>,
    pub borough: Option<Borough>,
    pub start_time: EventTime,
    pub end_time: Option<EventTime>,
    pub category: Option<String>,
    pub source: String,
    pub source_id: Option<String>,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub is_free: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trim `text` and cut it to at most `max` characters; blank input yields `None`.
pub fn clip_text(text: &str, max: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max).collect())
}

use radar_core::{Borough, EventDraft, NewEvent};
use thiserror::Error;
use url::Url;

/// Checked in order; the first keyword found in the address wins.
const BOROUGH_KEYWORDS: [(&str, Borough); 6] = [
    ("manhattan", Borough::Manhattan),
    ("brooklyn", Borough::Brooklyn),
    ("queens", Borough::Queens),
    ("bronx", Borough::Bronx),
    ("the bronx", Borough::Bronx),
    ("staten island", Borough::StatenIsland),
];

const FREE_PRICES: [&str; 6] = ["", "free", "$0", "$0.00", "0", "0.00"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftRejected {
    #[error("title is blank")]
    BlankTitle,
    #[error("source is blank")]
    BlankSource,
    #[error("{field} is not an absolute http(s) URL: {value:?}")]
    InvalidUrl { field: &'static str, value: String },
}

pub fn extract_borough(address: Option<&str>) -> Option<Borough> {
    let address = address?.to_lowercase();
    if address.is_empty() {
        return None;
    }
    if let Some((_, borough)) = BOROUGH_KEYWORDS.iter().find(|(key, _)| address.contains(key)) {
        return Some(*borough);
    }
    // Plain "New York, NY" addresses are taken to be Manhattan.
    if address.contains("new york") || address.contains(", ny ") {
        return Some(Borough::Manhattan);
    }
    None
}

/// Exact membership after trim and lowercase; "Free admission" is not free.
pub fn check_is_free(price: Option<&str>) -> bool {
    price.is_some_and(|p| FREE_PRICES.contains(&p.trim().to_lowercase().as_str()))
}

fn check_url(field: &'static str, value: Option<String>) -> Result<Option<String>, DraftRejected> {
    let Some(value) = value else {
        return Ok(None);
    };
    match Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Some(value.trim().to_string())),
        _ => Err(DraftRejected::InvalidUrl { field, value }),
    }
}

/// Validate a crawler draft and derive the stored fields.
pub fn normalize_draft(draft: EventDraft) -> Result<NewEvent, DraftRejected> {
    if draft.title.trim().is_empty() {
        return Err(DraftRejected::BlankTitle);
    }
    if draft.source.trim().is_empty() {
        return Err(DraftRejected::BlankSource);
    }
    let url = check_url("url", draft.url)?;
    let image_url = check_url("image_url", draft.image_url)?;

    Ok(NewEvent {
        borough: extract_borough(draft.address.as_deref()),
        is_free: check_is_free(draft.price.as_deref()),
        title: draft.title,
        description: draft.description,
        url,
        venue: draft.venue.unwrap_or_default(),
        address: draft.address,
        start_time: draft.start_time,
        end_time: draft.end_time,
        category: draft.category,
        source: draft.source,
        source_id: draft.source_id,
        image_url,
        price: draft.price,
    })
}

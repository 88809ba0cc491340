use chrono::NaiveDate;
use radar_core::{Borough, Event};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::{event_from_row, EventStore, StoreError};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Conjunctive filters for [`EventStore::list`]. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilters {
    pub text: Option<String>,
    pub category: Option<String>,
    pub borough: Option<Borough>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub is_free: Option<bool>,
    pub source: Option<String>,
}

impl EventFilters {
    pub fn validate(&self) -> Result<(), StoreError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(StoreError::Validation(format!(
                    "date_from {from} is after date_to {to}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Result<Self, StoreError> {
        let request = Self { page, per_page };
        request.validate()?;
        Ok(request)
    }

    /// Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.page < 1 {
            return Err(StoreError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PER_PAGE).contains(&self.per_page) {
            return Err(StoreError::Validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}, got {}",
                self.per_page
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

/// `max(1, ceil(total / per_page))`.
pub fn page_count(total: u64, per_page: u32) -> u32 {
    let per_page = u64::from(per_page.max(1));
    u32::try_from(total.div_ceil(per_page).max(1)).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub total_events: i64,
    pub total_sources: i64,
    pub total_categories: i64,
    pub free_events: i64,
    pub boroughs_covered: i64,
}

/// Turn free text into an FTS5 expression: each whitespace token becomes a quoted
/// phrase and the phrases are ANDed. Tokens with no word characters are dropped,
/// so blank or punctuation-only text yields `None`.
pub fn fts_match_expression(text: &str) -> Option<String> {
    let phrases: Vec<String> = text
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" AND "))
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &EventFilters, fts: Option<&str>) {
    qb.push(" WHERE 1 = 1");
    if let Some(expr) = fts {
        qb.push(" AND e.id IN (SELECT rowid FROM events_fts WHERE events_fts MATCH ")
            .push_bind(expr.to_string())
            .push(")");
    }
    if let Some(category) = &filters.category {
        qb.push(" AND e.category = ").push_bind(category.clone());
    }
    if let Some(borough) = filters.borough {
        qb.push(" AND e.borough = ").push_bind(borough.as_str());
    }
    // Compare the date as written; SQLite's date() would shift offsets to UTC.
    if let Some(from) = filters.date_from {
        qb.push(" AND substr(e.start_time, 1, 10) >= ")
            .push_bind(from.format("%Y-%m-%d").to_string());
    }
    if let Some(to) = filters.date_to {
        qb.push(" AND substr(e.start_time, 1, 10) <= ")
            .push_bind(to.format("%Y-%m-%d").to_string());
    }
    if let Some(is_free) = filters.is_free {
        qb.push(" AND e.is_free = ").push_bind(is_free);
    }
    if let Some(source) = &filters.source {
        qb.push(" AND e.source = ").push_bind(source.clone());
    }
}

impl EventStore {
    /// One page of matching events ordered by start time, then id. The count and
    /// the page are read from the same snapshot.
    pub async fn list(
        &self,
        filters: &EventFilters,
        page: PageRequest,
    ) -> Result<EventPage, StoreError> {
        page.validate()?;
        filters.validate()?;
        let text = filters.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let fts = text.and_then(fts_match_expression);
        if text.is_some() && fts.is_none() {
            // Text with no searchable tokens matches nothing.
            return Ok(EventPage {
                events: Vec::new(),
                total: 0,
                page: page.page,
                per_page: page.per_page,
                pages: page_count(0, page.per_page),
            });
        }

        let mut tx = self.pool().begin().await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM events e");
        push_filters(&mut count, filters, fts.as_deref());
        let total: i64 = count.build_query_scalar().fetch_one(&mut *tx).await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT e.* FROM events e");
        push_filters(&mut select, filters, fts.as_deref());
        select
            .push(" ORDER BY e.start_time ASC, e.id ASC LIMIT ")
            .push_bind(i64::from(page.per_page))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let total = u64::try_from(total).unwrap_or_default();
        Ok(EventPage {
            events,
            total,
            page: page.page,
            per_page: page.per_page,
            pages: page_count(total, page.per_page),
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    pub async fn sources(&self) -> Result<Vec<FacetCount>, StoreError> {
        self.facet(
            "SELECT source AS name, COUNT(*) AS count FROM events \
             GROUP BY source ORDER BY count DESC, name ASC",
        )
        .await
    }

    pub async fn categories(&self) -> Result<Vec<FacetCount>, StoreError> {
        self.facet(
            "SELECT category AS name, COUNT(*) AS count FROM events \
             WHERE category IS NOT NULL GROUP BY category ORDER BY count DESC, name ASC",
        )
        .await
    }

    async fn facet(&self, sql: &'static str) -> Result<Vec<FacetCount>, StoreError> {
        let rows = sqlx::query(sql).fetch_all(self.pool()).await?;
        rows.iter()
            .map(|row| -> Result<FacetCount, StoreError> {
                Ok(FacetCount {
                    name: row.try_get("name")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<CatalogStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_events,
                COUNT(DISTINCT source) AS total_sources,
                COUNT(DISTINCT category) AS total_categories,
                COALESCE(SUM(is_free), 0) AS free_events,
                COUNT(DISTINCT borough) AS boroughs_covered
            FROM events
            "#,
        )
        .fetch_one(self.pool())
        .await?;

        Ok(CatalogStats {
            total_events: row.try_get("total_events")?,
            total_sources: row.try_get("total_sources")?,
            total_categories: row.try_get("total_categories")?,
            free_events: row.try_get("free_events")?,
            boroughs_covered: row.try_get("boroughs_covered")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{new_event, scratch_store};
    use radar_core::NewEvent;

    fn jazz_night() -> NewEvent {
        let mut event = new_event("Jazz Night", "2026-02-14T20:00:00", "Blue Note");
        event.address = Some("131 W 3rd St, New York, NY".to_string());
        event.borough = Some(Borough::Manhattan);
        event.price = Some("Free".to_string());
        event.is_free = true;
        event.category = Some("Music".to_string());
        event
    }

    async fn seeded() -> (tempfile::TempDir, EventStore) {
        let (dir, store) = scratch_store().await;

        let mut market = new_event("Winter Market", "2026-02-10T09:00:00", "Union Square");
        market.category = Some("Food".to_string());
        market.borough = Some(Borough::Manhattan);
        market.source = "nyc_parks".to_string();

        let mut comedy = new_event("Late Comedy", "2026-02-14T23:00:00-05:00", "Union Hall");
        comedy.category = Some("Comedy".to_string());
        comedy.borough = Some(Borough::Brooklyn);
        comedy.description = Some("jazz-free stand up".to_string());
        comedy.source = "donyc".to_string();

        let mut tasting = new_event("Cheese Tasting", "2026-02-20T18:00:00", "Murray's");
        tasting.category = Some("Food".to_string());
        tasting.source = "nyc_parks".to_string();

        for event in [jazz_night(), market, comedy, tasting] {
            store.upsert(&event).await.unwrap();
        }
        (dir, store)
    }

    fn titles(page: &EventPage) -> Vec<&str> {
        page.events.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn page_count_rounds_up_with_a_floor_of_one() {
        assert_eq!(page_count(45, 20), 3);
        assert_eq!(page_count(40, 20), 2);
        assert_eq!(page_count(0, 20), 1);
        assert_eq!(page_count(1, 100), 1);
    }

    #[test]
    fn free_text_becomes_anded_phrases() {
        assert_eq!(
            fts_match_expression("jazz  night").as_deref(),
            Some("\"jazz\" AND \"night\"")
        );
        assert_eq!(
            fts_match_expression("say \"hi\"").as_deref(),
            Some("\"say\" AND \"\"\"hi\"\"\"")
        );
        assert_eq!(fts_match_expression("   "), None);
        assert_eq!(fts_match_expression("- *"), None);
    }

    #[test]
    fn out_of_range_pages_are_rejected() {
        assert!(PageRequest::new(0, 20).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, MAX_PER_PAGE + 1).is_err());
        assert_eq!(PageRequest::new(3, 20).unwrap().offset(), 40);
    }

    #[tokio::test]
    async fn jazz_night_is_found_by_free_and_not_by_brooklyn() {
        let (_dir, store) = seeded().await;

        let free = store
            .list(
                &EventFilters {
                    is_free: Some(true),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(titles(&free), vec!["Jazz Night"]);
        assert_eq!(free.events[0].borough, Some(Borough::Manhattan));

        let brooklyn = store
            .list(
                &EventFilters {
                    borough: Some(Borough::Brooklyn),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(titles(&brooklyn), vec!["Late Comedy"]);
    }

    #[tokio::test]
    async fn text_search_intersects_with_other_filters() {
        let (_dir, store) = seeded().await;

        let jazz = store
            .list(
                &EventFilters {
                    text: Some("jazz".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(titles(&jazz), vec!["Jazz Night", "Late Comedy"]);

        let jazz_in_music = store
            .list(
                &EventFilters {
                    text: Some("jazz".to_string()),
                    category: Some("Music".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(titles(&jazz_in_music), vec!["Jazz Night"]);

        let blank = store
            .list(
                &EventFilters {
                    text: Some("  ".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(blank.total, 4);
    }

    #[tokio::test]
    async fn punctuation_only_text_matches_nothing() {
        let (_dir, store) = seeded().await;
        for text in ["!!!", "-- ...", "\"\""] {
            let page = store
                .list(
                    &EventFilters {
                        text: Some(text.to_string()),
                        ..Default::default()
                    },
                    PageRequest::default(),
                )
                .await
                .unwrap();
            assert_eq!(page.total, 0, "{text}");
            assert!(page.events.is_empty(), "{text}");
            assert_eq!(page.pages, 1);
        }
    }

    #[tokio::test]
    async fn date_range_uses_the_date_as_written() {
        let (_dir, store) = seeded().await;
        let day = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();

        let valentines = store
            .list(
                &EventFilters {
                    date_from: Some(day),
                    date_to: Some(day),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(titles(&valentines), vec!["Jazz Night", "Late Comedy"]);

        let inverted = store
            .list(
                &EventFilters {
                    date_from: Some(day),
                    date_to: day.pred_opt(),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await;
        assert!(matches!(inverted, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn pages_are_ordered_and_counted_before_slicing() {
        let (_dir, store) = seeded().await;
        let first = store
            .list(&EventFilters::default(), PageRequest::new(1, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(first.total, 4);
        assert_eq!(first.pages, 2);
        assert_eq!(
            titles(&first),
            vec!["Winter Market", "Jazz Night", "Late Comedy"]
        );

        let second = store
            .list(&EventFilters::default(), PageRequest::new(2, 3).unwrap())
            .await
            .unwrap();
        assert_eq!(titles(&second), vec!["Cheese Tasting"]);

        let past_end = store
            .list(&EventFilters::default(), PageRequest::new(5, 3).unwrap())
            .await
            .unwrap();
        assert!(past_end.events.is_empty());
        assert_eq!(past_end.total, 4);
    }

    #[tokio::test]
    async fn get_misses_are_none() {
        let (_dir, store) = seeded().await;
        assert!(store.get(9_999).await.unwrap().is_none());
        let found = store.get(1).await.unwrap().expect("first event");
        assert_eq!(found.title, "Jazz Night");
    }

    #[tokio::test]
    async fn facets_order_by_count_then_name() {
        let (_dir, store) = seeded().await;

        let sources = store.sources().await.unwrap();
        assert_eq!(
            sources,
            vec![
                FacetCount { name: "nyc_parks".into(), count: 2 },
                FacetCount { name: "donyc".into(), count: 1 },
                FacetCount { name: "manual".into(), count: 1 },
            ]
        );

        let categories = store.categories().await.unwrap();
        assert_eq!(categories[0], FacetCount { name: "Food".into(), count: 2 });
        assert_eq!(categories.len(), 3);
    }

    #[tokio::test]
    async fn stats_summarize_the_catalog() {
        let (_dir, store) = seeded().await;
        assert_eq!(
            store.stats().await.unwrap(),
            CatalogStats {
                total_events: 4,
                total_sources: 3,
                total_categories: 3,
                free_events: 1,
                boroughs_covered: 2,
            }
        );

        let (_empty_dir, empty) = scratch_store().await;
        assert_eq!(empty.stats().await.unwrap(), CatalogStats::default());
    }
}

//! Read-only JSON API over the event store.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use radar_core::Borough;
use radar_storage::{EventFilters, EventStore, PageRequest, StoreError, DEFAULT_PER_PAGE};
use radar_sync::SyncConfig;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "radar-web";

#[derive(Clone)]
pub struct AppState {
    pub store: EventStore,
}

impl AppState {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }
}

/// Raw query string values; parsed by hand so that bad values come back as JSON
/// 400s instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    q: Option<String>,
    category: Option<String>,
    borough: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    is_free: Option<String>,
    source: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m),
            Self::Internal(m) => {
                error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .route("/events/{id}", get(event_detail_handler))
        .route("/sources", get(sources_handler))
        .route("/categories", get(categories_handler))
        .route("/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(store: EventStore, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "serving events api");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let store = EventStore::open(&config.database_url).await?;
    store.migrate().await?;
    serve(store, config.web_port).await
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let (filters, page) = parse_events_query(query)?;
    let events = state.store.list(&filters, page).await?;
    Ok(Json(events).into_response())
}

async fn event_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("event id must be an integer, got {id:?}")))?;
    match state.store.get(id).await? {
        Some(event) => Ok(Json(event).into_response()),
        None => Err(ApiError::NotFound(format!("event {id} not found"))),
    }
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.store.sources().await?).into_response())
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.store.categories().await?).into_response())
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.store.stats().await?).into_response())
}

fn parse_events_query(query: EventsQuery) -> Result<(EventFilters, PageRequest), ApiError> {
    let filters = EventFilters {
        text: non_blank(query.q),
        category: non_blank(query.category),
        borough: non_blank(query.borough)
            .map(|b| b.parse::<Borough>())
            .transpose()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        date_from: parse_date("date_from", query.date_from)?,
        date_to: parse_date("date_to", query.date_to)?,
        is_free: non_blank(query.is_free)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ApiError::BadRequest(format!("is_free must be true or false, got {v:?}"))),
            })
            .transpose()?,
        source: non_blank(query.source),
    };
    filters.validate()?;

    let page = PageRequest::new(
        parse_number("page", query.page)?.unwrap_or(1),
        parse_number("per_page", query.per_page)?.unwrap_or(DEFAULT_PER_PAGE),
    )?;
    Ok((filters, page))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    non_blank(value)
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|_| ApiError::BadRequest(format!("{field} must be YYYY-MM-DD, got {v:?}")))
        })
        .transpose()
}

fn parse_number(field: &str, value: Option<String>) -> Result<Option<u32>, ApiError> {
    non_blank(value)
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| ApiError::BadRequest(format!("{field} must be a positive integer, got {v:?}")))
        })
        .transpose()
}

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use radar_core::{Borough, Event, EventTime, NewEvent};
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] MigrateError),
    #[error("preparing database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid query: {0}")]
    Validation(String),
    #[error("event {id} has an unreadable column: {detail}")]
    CorruptRow { id: i64, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Canonical event table plus its full-text index.
///
/// There are no triggers. Every write runs the matching `events_fts` mutation in
/// the same transaction, and writers queue on `write_lock` so there is a single
/// logical writer per process. Reads go straight to the pool.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl EventStore {
    /// Open `sqlite://path` (or `sqlite:path`), creating the parent directory and
    /// the database file when missing.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        if let Some(path) = sqlite_file_path(database_url) {
            ensure_parent_dir(&path).await?;
        }
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect(options).await
    }

    pub async fn open_path(path: &Path) -> Result<Self, StoreError> {
        ensure_parent_dir(path).await?;
        Self::connect(SqliteConnectOptions::new().filename(path)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert or refresh one event keyed by (title, start_time, venue).
    pub async fn upsert(&self, event: &NewEvent) -> Result<UpsertOutcome, StoreError> {
        let _writer = self.write_lock.lock().await;
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let outcome = upsert_in(&mut *tx, event, &now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Upsert a whole batch in one transaction; nothing is visible unless every
    /// row lands.
    pub async fn upsert_many(
        &self,
        events: &[NewEvent],
        now: DateTime<Utc>,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let _writer = self.write_lock.lock().await;
        let now = timestamp(now);
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(upsert_in(&mut *tx, event, &now).await?);
        }
        tx.commit().await?;
        debug!(rows = outcomes.len(), "batch upserted");
        Ok(outcomes)
    }

    /// Remove an event and its index row. Returns whether the event existed.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM events_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Ids whose index row is missing, orphaned, or differs from the canonical row.
    pub async fn index_mismatches(&self) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT e.id
            FROM events e
            LEFT JOIN events_fts f ON f.rowid = e.id
            WHERE f.rowid IS NULL
               OR f.title IS NOT e.title
               OR COALESCE(f.description, '') <> COALESCE(e.description, '')
               OR f.venue IS NOT e.venue
            UNION
            SELECT f.rowid
            FROM events_fts f
            LEFT JOIN events e ON e.id = f.rowid
            WHERE e.id IS NULL
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

async fn upsert_in(
    conn: &mut SqliteConnection,
    event: &NewEvent,
    now: &str,
) -> Result<UpsertOutcome, StoreError> {
    let start_time = event.start_time.to_string();
    let end_time = event.end_time.map(|t| t.to_string());
    let borough = event.borough.map(|b| b.as_str());

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM events WHERE title = ? AND start_time = ? AND venue = ?")
            .bind(&event.title)
            .bind(&start_time)
            .bind(&event.venue)
            .fetch_optional(&mut *conn)
            .await?;

    // `source` and `created_at` stay with the first observation.
    let outcome = match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE events SET
                    description = ?, url = ?, address = ?, borough = ?, end_time = ?,
                    category = ?, source_id = ?, image_url = ?, price = ?, is_free = ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&event.description)
            .bind(&event.url)
            .bind(&event.address)
            .bind(borough)
            .bind(&end_time)
            .bind(&event.category)
            .bind(&event.source_id)
            .bind(&event.image_url)
            .bind(&event.price)
            .bind(event.is_free)
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            sqlx::query("DELETE FROM events_fts WHERE rowid = ?")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            UpsertOutcome::Updated(id)
        }
        None => {
            let inserted = sqlx::query(
                r#"
                INSERT INTO events (
                    title, description, url, venue, address, borough, start_time, end_time,
                    category, source, source_id, image_url, price, is_free, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.title)
            .bind(&event.description)
            .bind(&event.url)
            .bind(&event.venue)
            .bind(&event.address)
            .bind(borough)
            .bind(&start_time)
            .bind(&end_time)
            .bind(&event.category)
            .bind(&event.source)
            .bind(&event.source_id)
            .bind(&event.image_url)
            .bind(&event.price)
            .bind(event.is_free)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            UpsertOutcome::Inserted(inserted.last_insert_rowid())
        }
    };

    sqlx::query("INSERT INTO events_fts (rowid, title, description, venue) VALUES (?, ?, ?, ?)")
        .bind(outcome.id())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.venue)
        .execute(&mut *conn)
        .await?;

    Ok(outcome)
}

pub(crate) fn event_from_row(row: &SqliteRow) -> Result<Event, StoreError> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |detail: String| StoreError::CorruptRow { id, detail };

    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    let borough: Option<String> = row.try_get("borough")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Event {
        id,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        venue: row.try_get("venue")?,
        address: row.try_get("address")?,
        borough: borough
            .as_deref()
            .map(Borough::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?,
        start_time: EventTime::parse(&start_time).map_err(|e| corrupt(e.to_string()))?,
        end_time: end_time
            .as_deref()
            .map(EventTime::parse)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?,
        category: row.try_get("category")?,
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        image_url: row.try_get("image_url")?,
        price: row.try_get("price")?,
        is_free: row.try_get("is_free")?,
        created_at: parse_timestamp(&created_at).map_err(|e| corrupt(e.to_string()))?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| corrupt(e.to_string()))?,
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|at| at.with_timezone(&Utc))
}

fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

async fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

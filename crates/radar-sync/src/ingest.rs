use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use radar_core::{EventDraft, NewEvent};
use radar_storage::{BatchStore, EventStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::normalize::normalize_draft;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedBatch {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Drafts upserted, counting repeats of one natural key separately.
    pub processed: usize,
    pub rejected: usize,
    pub batches_read: usize,
    pub skipped_batches: Vec<SkippedBatch>,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.processed += other.processed;
        self.rejected += other.rejected;
        self.batches_read += other.batches_read;
        self.skipped_batches.extend(other.skipped_batches);
    }
}

/// Moves crawler output into the canonical store.
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: EventStore,
}

impl Ingestor {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }

    /// Ingest every batch file in filename order, one transaction per batch.
    /// Unreadable batches are skipped and reported; they never stop the run.
    pub async fn ingest_batches(&self, batches: &BatchStore) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for path in batches.list_batches().await? {
            let records = match BatchStore::read_batch(&path).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(path = %path.display(), error = %format!("{err:#}"), "skipping unreadable batch");
                    report.skipped_batches.push(SkippedBatch {
                        path,
                        reason: format!("{err:#}"),
                    });
                    continue;
                }
            };

            let mut rejected = 0;
            let events: Vec<NewEvent> = records
                .into_iter()
                .filter_map(|record| match serde_json::from_value::<EventDraft>(record) {
                    Ok(draft) => prepare(draft, &mut rejected),
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "rejecting malformed draft");
                        rejected += 1;
                        None
                    }
                })
                .collect();

            match self.store.upsert_many(&events, Utc::now()).await {
                Ok(outcomes) => {
                    report.batches_read += 1;
                    report.processed += outcomes.len();
                    report.rejected += rejected;
                    debug!(path = %path.display(), upserted = outcomes.len(), rejected, "batch ingested");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "batch upsert rolled back");
                    report.skipped_batches.push(SkippedBatch {
                        path,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = report.processed,
            rejected = report.rejected,
            batches = report.batches_read,
            skipped = report.skipped_batches.len(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// Ingest drafts that never touched disk, in one transaction.
    pub async fn ingest_drafts(&self, drafts: &[EventDraft]) -> Result<IngestReport> {
        let mut rejected = 0;
        let events: Vec<NewEvent> = drafts
            .iter()
            .cloned()
            .filter_map(|draft| prepare(draft, &mut rejected))
            .collect();
        let outcomes = self.store.upsert_many(&events, Utc::now()).await?;
        Ok(IngestReport {
            processed: outcomes.len(),
            rejected,
            ..Default::default()
        })
    }

    /// Batches and in-transit drafts together, as one report.
    pub async fn ingest_all(&self, batches: &BatchStore, drafts: &[EventDraft]) -> Result<IngestReport> {
        let mut report = self.ingest_batches(batches).await?;
        report.absorb(self.ingest_drafts(drafts).await?);
        Ok(report)
    }
}

fn prepare(draft: EventDraft, rejected: &mut usize) -> Option<NewEvent> {
    let title = draft.title.clone();
    match normalize_draft(draft) {
        Ok(event) => Some(event),
        Err(reason) => {
            debug!(title = %title, %reason, "rejecting draft");
            *rejected += 1;
            None
        }
    }
}

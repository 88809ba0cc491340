use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use radar_core::EventDraft;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredBatch {
    pub source: String,
    pub path: PathBuf,
    pub sha256: String,
    pub byte_size: usize,
    pub drafts: usize,
}

/// Directory of per-crawler output batches, one JSON array file per source per day.
#[derive(Debug, Clone)]
pub struct BatchStore {
    root: PathBuf,
}

impl BatchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn batch_file_name(source: &str, date: NaiveDate) -> String {
        format!("{source}_{}.json", date.format("%Y-%m-%d"))
    }

    /// Write the whole batch or nothing: serialize, write a hidden temp file, then
    /// rename over any earlier batch for the same source and day.
    pub async fn write_batch(
        &self,
        source: &str,
        date: NaiveDate,
        drafts: &[EventDraft],
    ) -> anyhow::Result<StoredBatch> {
        let bytes = serde_json::to_vec_pretty(drafts)
            .with_context(|| format!("serializing {} drafts for {source}", drafts.len()))?;

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating batch directory {}", self.root.display()))?;

        let path = self.root.join(Self::batch_file_name(source, date));
        let temp_path = self
            .root
            .join(format!(".{source}.{}.tmp", Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp batch file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp batch file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp batch file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp batch {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        Ok(StoredBatch {
            source: source.to_string(),
            path,
            sha256: Self::sha256_hex(&bytes),
            byte_size: bytes.len(),
            drafts: drafts.len(),
        })
    }

    /// Visible `*.json` files in the batch directory, sorted by name. A missing
    /// directory has no batches.
    pub async fn list_batches(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading batch directory {}", self.root.display()))
            }
        };

        let mut batches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing batch directory {}", self.root.display()))?
        {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if is_json && !hidden && entry.file_type().await.is_ok_and(|t| t.is_file()) {
                batches.push(path);
            }
        }
        batches.sort();
        Ok(batches)
    }

    /// Raw records of one batch file. Records are returned untyped so that the
    /// ingestor can reject bad records one at a time; a single top-level object
    /// counts as a batch of one.
    pub async fn read_batch(path: &Path) -> anyhow::Result<Vec<serde_json::Value>> {
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("reading batch {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing batch {}", path.display()))?;
        Ok(match value {
            serde_json::Value::Array(records) => records,
            other => vec![other],
        })
    }
}

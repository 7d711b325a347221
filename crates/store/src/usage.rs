//! The usage journal: every model invocation, one JSON object per line.
//!
//! The journal is what lets daily and monthly ceilings hold across process
//! restarts: the binary seeds the ledger from [`UsageJournal::load`] and
//! appends each run's records when the run ends.

use std::path::PathBuf;

use chrono::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use pipeline::{Timestamp, UsageRecord};

use crate::StoreError;

/// Records older than this are dropped on load.
pub const RETENTION_DAYS: i64 = 31;

/// Append-only usage log.
#[derive(Debug, Clone)]
pub struct UsageJournal {
    path: PathBuf,
}

impl UsageJournal {
    /// A journal at `path`. A missing file reads as empty history.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Records within the retention window as of `now`, oldest first.
    ///
    /// Expired and unreadable lines are dropped and, if any were, the file is
    /// rewritten without them.
    pub async fn load(&self, now: Timestamp) -> Result<Vec<UsageRecord>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.path)(err)),
        };

        let cutoff = now.as_datetime() - Duration::days(RETENTION_DAYS);
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<UsageRecord>(line) {
                Ok(record) if record.recorded_at.as_datetime() >= cutoff => kept.push(record),
                Ok(_) => dropped += 1,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "Dropping unreadable usage line");
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            info!(dropped, kept = kept.len(), "Pruning usage journal");
            self.rewrite(&kept).await?;
        }
        kept.sort_by_key(|r| r.recorded_at);
        Ok(kept)
    }

    /// Appends `records`.
    pub async fn append(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let buf = encode(records).map_err(StoreError::json(&self.path))?;
        self.ensure_parent().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(StoreError::io(&self.path))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(StoreError::io(&self.path))?;
        file.flush().await.map_err(StoreError::io(&self.path))
    }

    async fn rewrite(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        let buf = encode(records).map_err(StoreError::json(&self.path))?;
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, buf)
            .await
            .map_err(StoreError::io(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StoreError::io(&self.path))
    }

    async fn ensure_parent(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) => tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent)),
            None => Ok(()),
        }
    }
}

fn encode(records: &[UsageRecord]) -> Result<String, serde_json::Error> {
    let mut buf = String::new();
    for record in records {
        buf.push_str(&serde_json::to_string(record)?);
        buf.push('\n');
    }
    Ok(buf)
}

//! Run reports saved as pretty JSON, one file per run.

use std::path::PathBuf;

use tracing::{debug, warn};

use stages::RunReport;

use crate::StoreError;

const EXTENSION: &str = "json";

/// Directory of archived run reports.
#[derive(Debug, Clone)]
pub struct RunArchive {
    dir: PathBuf,
}

impl RunArchive {
    /// Archives reports under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `report` and returns its path. File names sort by run start
    /// time: `<yyyymmdd_hhmmss>_<transcript>_<run>.json`.
    pub async fn save(&self, report: &RunReport) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(StoreError::io(&self.dir))?;
        let state = &report.state;
        let name = format!(
            "{}_{}_{}.{EXTENSION}",
            state.started_at().as_datetime().format("%Y%m%d_%H%M%S"),
            state.transcript(),
            state.id(),
        );
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(report).map_err(StoreError::json(&path))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(StoreError::io(&path))?;
        debug!(path = %path.display(), "Run report archived");
        Ok(path)
    }

    /// Up to `limit` most recent reports, newest first. Files that do not
    /// parse are skipped.
    pub async fn recent(&self, limit: usize) -> Result<Vec<RunReport>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.dir)(err)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io(&self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort_unstable_by(|a, b| b.cmp(a));

        let mut reports = Vec::new();
        for path in paths {
            if reports.len() == limit {
                break;
            }
            let raw = tokio::fs::read(&path).await.map_err(StoreError::io(&path))?;
            match serde_json::from_slice::<RunReport>(&raw) {
                Ok(report) => reports.push(report),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable run report"),
            }
        }
        Ok(reports)
    }
}

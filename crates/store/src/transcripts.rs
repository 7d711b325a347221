//! Transcripts read from a directory of text files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use pipeline::{EpisodeMetadata, SourceError, Transcript, TranscriptId, TranscriptSource};

use crate::StoreError;

const TEXT_EXTENSION: &str = "txt";

/// Loads `<dir>/<id>.txt`, with episode metadata from `<dir>/<id>.json` when
/// present.
#[derive(Debug, Clone)]
pub struct FsTranscriptSource {
    dir: PathBuf,
}

impl FsTranscriptSource {
    /// Reads transcripts from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Every transcript id in the directory, sorted.
    pub async fn list(&self) -> Result<Vec<TranscriptId>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(StoreError::io(&self.dir))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io(&self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEXT_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(TranscriptId::new)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn path_for(&self, id: &TranscriptId, extension: &str) -> Option<PathBuf> {
        let name = id.as_str();
        let plain = !name.contains(['/', '\\']) && name != "." && name != "..";
        plain.then(|| self.dir.join(format!("{name}.{extension}")))
    }

    async fn metadata(&self, path: &Path) -> EpisodeMetadata {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "Ignoring unreadable episode metadata");
                EpisodeMetadata::default()
            }),
            Err(_) => EpisodeMetadata::default(),
        }
    }
}

#[async_trait]
impl TranscriptSource for FsTranscriptSource {
    async fn load(&self, id: &TranscriptId) -> Result<Transcript, SourceError> {
        let Some(path) = self.path_for(id, TEXT_EXTENSION) else {
            return Err(SourceError::Unreadable {
                transcript: id.clone(),
                message: "transcript id must be a plain file name".to_owned(),
            });
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(id.clone()))
            }
            Err(err) => {
                return Err(SourceError::Unreadable {
                    transcript: id.clone(),
                    message: format!("{}: {err}", path.display()),
                })
            }
        };

        let metadata = match self.path_for(id, "json") {
            Some(meta) => self.metadata(&meta).await,
            None => EpisodeMetadata::default(),
        };
        debug!(transcript_id = %id, chars = text.len(), "Transcript loaded");
        Ok(Transcript::new(id.clone(), text, metadata))
    }
}

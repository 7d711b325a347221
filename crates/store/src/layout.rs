//! Where things live under the data directory.

use std::path::{Path, PathBuf};

use crate::StoreError;

/// The data directory tree:
///
/// ```text
/// <root>/transcripts/          <id>.txt (+ optional <id>.json metadata)
/// <root>/content/generated/    archived run reports
/// <root>/content/published/    publishing journal
/// <root>/memory/usage.jsonl    usage journal
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Wraps `root`. Nothing is created until [`DataDir::ensure`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transcripts(&self) -> PathBuf {
        self.root.join("transcripts")
    }

    pub fn generated(&self) -> PathBuf {
        self.root.join("content").join("generated")
    }

    pub fn published_journal(&self) -> PathBuf {
        self.root.join("content").join("published").join("journal.jsonl")
    }

    pub fn usage_journal(&self) -> PathBuf {
        self.root.join("memory").join("usage.jsonl")
    }

    /// Creates every directory in the tree.
    pub async fn ensure(&self) -> Result<(), StoreError> {
        let published = self.root.join("content").join("published");
        let memory = self.root.join("memory");
        for dir in [self.transcripts(), self.generated(), published, memory] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(StoreError::io(&dir))?;
        }
        Ok(())
    }
}

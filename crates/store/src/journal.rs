//! Simulated publishing: accepted items are appended to a JSON-lines journal
//! instead of being sent to a social platform.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use pipeline::{
    ContentItem, ContentItemId, ContentKind, InsightId, PublishOutcome, PublishingSink, RunId,
    Timestamp,
};

use crate::StoreError;

/// One line of the publishing journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Receipt handed back to the pipeline (`sim-<content id>`).
    pub receipt: String,
    /// The published item.
    pub content_id: ContentItemId,
    /// The run that produced it.
    pub run: RunId,
    /// The insight it was written from.
    pub insight: InsightId,
    /// Thread, single post or quote post.
    pub kind: ContentKind,
    /// Post texts in order; one entry for non-thread items.
    pub posts: Vec<String>,
    /// The slot it is scheduled for.
    pub publish_at: Timestamp,
    /// When the entry was written.
    pub recorded_at: Timestamp,
}

/// Publishing sink backed by a journal file. Refuses content whose text is
/// already in the journal.
pub struct JournalSink {
    path: PathBuf,
    /// Bodies already journaled; `None` until first use.
    seen: Mutex<Option<HashSet<String>>>,
}

impl JournalSink {
    /// A sink appending to the JSON-lines file at `path`, created on the
    /// first accepted item.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: Mutex::new(None),
        }
    }

    /// Every entry in the journal, oldest first. Unreadable lines are skipped.
    pub async fn entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.path)(err)),
        };
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "Skipping unreadable journal line");
                    None
                }
            })
            .collect())
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent))?;
        }
        let mut line = serde_json::to_string(entry).map_err(StoreError::json(&self.path))?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(StoreError::io(&self.path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(StoreError::io(&self.path))?;
        file.flush().await.map_err(StoreError::io(&self.path))
    }
}

fn fingerprint(posts: &[String]) -> String {
    posts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl PublishingSink for JournalSink {
    async fn publish(&self, item: &ContentItem, at: Timestamp) -> PublishOutcome {
        let mut seen = self.seen.lock().await;
        if seen.is_none() {
            match self.entries().await {
                Ok(entries) => {
                    *seen = Some(entries.iter().map(|e| fingerprint(&e.posts)).collect());
                }
                Err(err) => {
                    return PublishOutcome::Rejected {
                        reason: err.to_string(),
                    }
                }
            }
        }

        let posts: Vec<String> = item.body().posts().into_iter().map(str::to_owned).collect();
        let key = fingerprint(&posts);
        if seen.as_ref().is_some_and(|s| s.contains(&key)) {
            return PublishOutcome::Rejected {
                reason: "duplicate of previously published content".to_owned(),
            };
        }

        let entry = JournalEntry {
            receipt: format!("sim-{}", item.id()),
            content_id: item.id(),
            run: item.run(),
            insight: item.insight(),
            kind: item.kind(),
            posts,
            publish_at: at,
            recorded_at: Timestamp::now(),
        };
        match self.append(&entry).await {
            Ok(()) => {
                if let Some(seen) = seen.as_mut() {
                    seen.insert(key);
                }
                info!(content_id = %entry.content_id, publish_at = %at, "Content journaled for publishing");
                PublishOutcome::Accepted {
                    receipt: Some(entry.receipt),
                }
            }
            Err(err) => PublishOutcome::Rejected {
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::ContentBody;

    fn item(text: &str) -> ContentItem {
        ContentItem::pending(
            RunId::new_random(),
            InsightId::new_random(),
            ContentKind::SinglePost,
            ContentBody::Single(text.to_owned()),
        )
    }

    #[tokio::test]
    async fn accepted_items_are_journaled_with_a_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JournalSink::new(dir.path().join("published").join("journal.jsonl"));
        let post = item("Revenue is the best investor.");
        let at = Timestamp::now();

        let outcome = sink.publish(&post, at).await;

        assert_eq!(
            outcome,
            PublishOutcome::Accepted {
                receipt: Some(format!("sim-{}", post.id()))
            }
        );
        let entries = sink.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content_id, post.id());
        assert_eq!(entries[0].publish_at, at);
        assert_eq!(entries[0].posts, ["Revenue is the best investor."]);
    }

    #[tokio::test]
    async fn duplicates_are_rejected_across_sink_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let first = JournalSink::new(&path);
        assert!(matches!(
            first.publish(&item("Same words"), Timestamp::now()).await,
            PublishOutcome::Accepted { .. }
        ));

        let reopened = JournalSink::new(&path);
        let outcome = reopened.publish(&item("  same WORDS "), Timestamp::now()).await;

        assert!(matches!(outcome, PublishOutcome::Rejected { .. }));
        assert_eq!(reopened.entries().await.unwrap().len(), 1);
    }
}

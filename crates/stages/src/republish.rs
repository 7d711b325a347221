//! Second attempts for items the sink refused.
//!
//! A `publish_failed` item keeps its status; the retry hands the same item
//! to the sink again at the next slot nobody holds. Whether it went through
//! is recorded by the sink itself, so callers pass in the ids the sink has
//! already accepted and those are skipped.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use pipeline::{
    ContentItem, ContentItemId, ContentStatus, PipelineError, PublishOutcome, PublishingSettings,
    PublishingSink, Timestamp,
};

use crate::schedule::PublishingScheduler;

/// One item's second attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RetryResult {
    /// The sink accepted the item for `at`.
    Published {
        /// The slot used.
        at: Timestamp,
        /// The sink's receipt, if it issued one.
        receipt: Option<String>,
    },
    /// The sink refused the item again.
    Rejected {
        /// The slot tried.
        at: Timestamp,
        /// The sink's reason.
        reason: String,
    },
    /// Every slot in the horizon is taken.
    NoSlot,
}

/// Totals and per-item results of a retry pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrySummary {
    /// Items handed to the sink or left without a slot, in input order.
    pub results: Vec<(ContentItemId, RetryResult)>,
    /// Failed items skipped because the sink already holds them.
    pub skipped: usize,
}

impl RetrySummary {
    /// Items the sink accepted on this pass.
    pub fn published(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| matches!(r, RetryResult::Published { .. }))
            .count()
    }

    /// Items still not published after this pass.
    pub fn still_failed(&self) -> usize {
        self.results.len() - self.published()
    }
}

/// Reschedules and re-publishes refused items.
pub struct PublishRetry {
    scheduler: PublishingScheduler,
    sink: Arc<dyn PublishingSink>,
}

impl PublishRetry {
    /// Builds the retry pass over the same calendar the pipeline publishes to.
    pub fn new(settings: &PublishingSettings, sink: Arc<dyn PublishingSink>) -> Result<Self, PipelineError> {
        Ok(Self {
            scheduler: PublishingScheduler::new(settings)?,
            sink,
        })
    }

    /// Retries every `publish_failed` item in `items` not in `accepted`,
    /// each at the earliest slot after `now` not in `taken`.
    pub async fn retry(
        &self,
        items: &[ContentItem],
        accepted: &HashSet<ContentItemId>,
        taken: &HashSet<Timestamp>,
        now: Timestamp,
    ) -> RetrySummary {
        let mut free = self
            .scheduler
            .slots(now)
            .into_iter()
            .filter(|slot| !taken.contains(slot));
        let mut summary = RetrySummary::default();

        let failed = items
            .iter()
            .filter(|i| matches!(i.status(), ContentStatus::PublishFailed { .. }));
        for item in failed {
            if accepted.contains(&item.id()) {
                summary.skipped += 1;
                continue;
            }
            let Some(at) = free.next() else {
                warn!(content_id = %item.id(), "No available slot for retry");
                summary.results.push((item.id(), RetryResult::NoSlot));
                continue;
            };
            let result = match self.sink.publish(item, at).await {
                PublishOutcome::Accepted { receipt } => RetryResult::Published { at, receipt },
                PublishOutcome::Rejected { reason } => {
                    warn!(content_id = %item.id(), %reason, "Sink refused retried item");
                    RetryResult::Rejected { at, reason }
                }
            };
            summary.results.push((item.id(), result));
        }

        info!(
            retried = summary.results.len(),
            published = summary.published(),
            still_failed = summary.still_failed(),
            skipped = summary.skipped,
            "Publishing retry finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pipeline::{ContentBody, ContentKind, InsightId, RunId};
    use std::sync::Mutex;

    /// Refuses any text in `refuse`; records what it accepts.
    #[derive(Default)]
    struct Sink {
        refuse: Vec<&'static str>,
        accepted: Mutex<Vec<(ContentItemId, Timestamp)>>,
    }

    #[async_trait]
    impl PublishingSink for Sink {
        async fn publish(&self, item: &ContentItem, at: Timestamp) -> PublishOutcome {
            if self.refuse.iter().any(|t| item.body().joined() == *t) {
                return PublishOutcome::Rejected {
                    reason: "still refused".into(),
                };
            }
            self.accepted.lock().unwrap().push((item.id(), at));
            PublishOutcome::Accepted {
                receipt: Some(format!("r-{}", item.id())),
            }
        }
    }

    fn failed(text: &str) -> ContentItem {
        let mut item = ContentItem::pending(
            RunId::new_random(),
            InsightId::new_random(),
            ContentKind::SinglePost,
            ContentBody::Single(text.to_owned()),
        );
        item.approve(None).unwrap();
        item.schedule(Timestamp::now()).unwrap();
        item.mark_publish_failed("sink down").unwrap();
        item
    }

    fn settings() -> PublishingSettings {
        PublishingSettings {
            avoid_weekends: false,
            horizon_days: 2,
            ..PublishingSettings::default()
        }
    }

    #[tokio::test]
    async fn failed_items_take_the_next_free_slots() {
        let sink = Arc::new(Sink {
            refuse: vec!["b"],
            ..Sink::default()
        });
        let retry = PublishRetry::new(&settings(), sink.clone()).unwrap();
        let items = vec![failed("a"), failed("b"), failed("published already")];
        let accepted = HashSet::from([items[2].id()]);
        let now = Timestamp::now();
        let slots = PublishingScheduler::new(&settings()).unwrap().slots(now);
        let taken = HashSet::from([slots[0]]);

        let summary = retry.retry(&items, &accepted, &taken, now).await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.published(), 1);
        assert_eq!(summary.still_failed(), 1);
        assert_eq!(
            summary.results[0],
            (
                items[0].id(),
                RetryResult::Published {
                    at: slots[1],
                    receipt: Some(format!("r-{}", items[0].id())),
                }
            )
        );
        assert!(matches!(&summary.results[1].1, RetryResult::Rejected { at, .. } if *at == slots[2]));
        assert_eq!(sink.accepted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn items_beyond_the_horizon_report_no_slot() {
        let sink = Arc::new(Sink::default());
        let retry = PublishRetry::new(&settings(), sink.clone()).unwrap();
        let now = Timestamp::now();
        let taken: HashSet<_> = PublishingScheduler::new(&settings())
            .unwrap()
            .slots(now)
            .into_iter()
            .collect();

        let item = failed("a");

        let summary = retry.retry(&[item.clone()], &HashSet::new(), &taken, now).await;

        assert_eq!(summary.results, vec![(item.id(), RetryResult::NoSlot)]);
        assert!(sink.accepted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn items_not_refused_are_ignored() {
        let sink = Arc::new(Sink::default());
        let retry = PublishRetry::new(&settings(), sink).unwrap();
        let mut approved = ContentItem::pending(
            RunId::new_random(),
            InsightId::new_random(),
            ContentKind::SinglePost,
            ContentBody::Single("fine".into()),
        );
        approved.approve(None).unwrap();

        let summary = retry
            .retry(&[approved], &HashSet::new(), &HashSet::new(), Timestamp::now())
            .await;

        assert_eq!(summary, RetrySummary::default());
    }
}

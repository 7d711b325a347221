//! Stub ports for orchestrator tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pipeline::{
    BackendError, BackendName, BudgetCeilings, BudgetLedger, ContentItem, ContentItemId,
    EpisodeMetadata, Generation, PipelineConfig, Pricing, Prompt, PublishOutcome,
    PublishingSettings, PublishingSink, RoutingSettings, SourceError, TaskClass, TextBackend,
    Timestamp, TokenCount, Transcript, TranscriptId, TranscriptSource,
};
use stages::{ModelRouter, Orchestrator};

pub const TRANSCRIPT: &str = "Most founders raise too early. We bootstrapped to two million \
in revenue before taking a dollar, and it changed every negotiation we had with investors. \
Unpopular opinion: revenue is the best investor you will ever have.";

pub const INSIGHTS: &str = r#"```json
[
  {"title": "Raise later", "kind": "contrarian_take", "text": "Raising late keeps leverage.",
   "quote": "Most founders raise too early.", "priority": 0.9, "key_terms": ["fundraising"],
   "contrarian_angle": "Raise as early as you can"},
  {"title": "Revenue first", "kind": "framework", "text": "Fund growth from revenue.",
   "priority": 0.8, "key_terms": ["bootstrapping"]}
]
```"#;

pub const FINDINGS: &str = r#"[
  {"source": "Founder survey", "excerpt": "62% of bootstrapped founders kept control", "credibility": 0.9}
]"#;

pub const CONTENT: &str = r#"[
  {"kind": "thread", "posts": ["1/ Raise later.", "2/ Leverage.", "3/ Revenue.", "4/ Control.", "5/ Done."]},
  {"kind": "thread", "posts": ["1/ Another.", "2/ b", "3/ c", "4/ d", "5/ e"]},
  {"kind": "single_post", "text": "Revenue is the best investor."},
  {"kind": "single_post", "text": "62% of founders who waited kept control."},
  {"kind": "single_post", "text": "Waiting gave us leverage."}
]"#;

/// Like [`CONTENT`], but the sink refuses the last single post.
pub const CONTENT_WITH_DUPLICATE: &str = r#"[
  {"kind": "thread", "posts": ["1/ Raise later.", "2/ Leverage.", "3/ Revenue.", "4/ Control.", "5/ Done."]},
  {"kind": "thread", "posts": ["1/ Another.", "2/ b", "3/ c", "4/ d", "5/ e"]},
  {"kind": "single_post", "text": "Revenue is the best investor."},
  {"kind": "single_post", "text": "62% of founders who waited kept control."},
  {"kind": "single_post", "text": "REJECT me at the sink."}
]"#;

pub const APPROVE: &str = r#"{"brand_voice_score": 0.9, "approval_recommendation": "approved"}"#;

/// How the stub backend answers each kind of request.
#[derive(Clone)]
pub struct Replies {
    pub insights: Result<String, BackendError>,
    pub findings: Result<String, BackendError>,
    pub content: Result<String, BackendError>,
    pub review: Result<String, BackendError>,
    /// Content requests refused permanently before `content` is served.
    pub content_failures: usize,
    /// Reviews served before every later review is refused permanently.
    pub reviews_before_failure: Option<usize>,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            insights: Ok(INSIGHTS.into()),
            findings: Ok(FINDINGS.into()),
            content: Ok(CONTENT.into()),
            review: Ok(APPROVE.into()),
            content_failures: 0,
            reviews_before_failure: None,
        }
    }
}

/// Answers by recognising which stage wrote the prompt.
pub struct StubBackend {
    name: BackendName,
    replies: Replies,
    calls: AtomicUsize,
    content_calls: AtomicUsize,
    review_calls: AtomicUsize,
}

impl StubBackend {
    pub fn new(name: &str, replies: Replies) -> Arc<Self> {
        Arc::new(Self {
            name: BackendName::new(name).unwrap(),
            replies,
            calls: AtomicUsize::new(0),
            content_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
        })
    }

    pub fn review_calls(&self) -> usize {
        self.review_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextBackend for StubBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    fn pricing(&self) -> Pricing {
        Pricing::new(3.0, 15.0).unwrap()
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Generation, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = if prompt.user.starts_with("Extract") {
            self.replies.insights.clone()
        } else if prompt.user.starts_with("Research") {
            self.replies.findings.clone()
        } else if prompt.user.starts_with("Write") {
            let seen = self.content_calls.fetch_add(1, Ordering::SeqCst);
            if seen < self.replies.content_failures {
                Err(BackendError::permanent("content filter tripped"))
            } else {
                self.replies.content.clone()
            }
        } else {
            let seen = self.review_calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.reviews_before_failure {
                Some(limit) if seen >= limit => Err(BackendError::permanent("reviewer unavailable")),
                _ => self.replies.review.clone(),
            }
        };
        reply.map(|text| Generation {
            text,
            input_tokens: TokenCount::new(60),
            output_tokens: TokenCount::new(40),
        })
    }
}

/// Never answers.
pub struct HangingBackend {
    name: BackendName,
    calls: AtomicUsize,
}

impl HangingBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: BackendName::new(name).unwrap(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextBackend for HangingBackend {
    fn name(&self) -> &BackendName {
        &self.name
    }

    fn pricing(&self) -> Pricing {
        Pricing::free()
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<Generation, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Transcripts held in memory.
#[derive(Default)]
pub struct MemorySource {
    texts: HashMap<TranscriptId, String>,
}

impl MemorySource {
    pub fn with(mut self, id: &str, text: &str) -> Self {
        self.texts.insert(TranscriptId::new(id).unwrap(), text.to_owned());
        self
    }
}

#[async_trait]
impl TranscriptSource for MemorySource {
    async fn load(&self, id: &TranscriptId) -> Result<Transcript, SourceError> {
        self.texts
            .get(id)
            .map(|text| Transcript::new(id.clone(), text.clone(), EpisodeMetadata::default()))
            .ok_or_else(|| SourceError::NotFound(id.clone()))
    }
}

/// Accepts everything except items whose text contains `REJECT`.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<(ContentItemId, Timestamp)>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<(ContentItemId, Timestamp)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishingSink for RecordingSink {
    async fn publish(&self, item: &ContentItem, at: Timestamp) -> PublishOutcome {
        if item.body().joined().contains("REJECT") {
            return PublishOutcome::Rejected {
                reason: "duplicate content".into(),
            };
        }
        self.published.lock().unwrap().push((item.id(), at));
        PublishOutcome::Accepted {
            receipt: Some(format!("draft-{}", item.id())),
        }
    }
}

/// Defaults with no back-off and a publishing calendar large enough for
/// every generated item.
pub fn config() -> PipelineConfig {
    PipelineConfig {
        routing: RoutingSettings {
            retry_backoff_ms: 0,
            stage_retry_backoff_ms: 0,
            calls_per_minute: 0,
            ..RoutingSettings::default()
        },
        publishing: PublishingSettings {
            avoid_weekends: false,
            min_thread_spacing_hours: 0,
            horizon_days: 14,
            ..PublishingSettings::default()
        },
        ..PipelineConfig::default()
    }
}

pub fn ceilings(episode_tokens: u64) -> BudgetCeilings {
    BudgetCeilings {
        episode_tokens: TokenCount::new(episode_tokens),
        ..BudgetCeilings::default()
    }
}

/// The pieces of a wired pipeline a test inspects.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub ledger: BudgetLedger,
    pub sink: Arc<RecordingSink>,
}

/// Wires an orchestrator over `source` with the given routes.
pub fn harness(
    config: PipelineConfig,
    source: MemorySource,
    reasoning: Vec<Arc<dyn TextBackend>>,
    bulk: Vec<Arc<dyn TextBackend>>,
) -> Harness {
    let ledger = BudgetLedger::new(config.budget.clone());
    let router = ModelRouter::new(ledger.clone(), &config.routing)
        .with_route(TaskClass::Reasoning, reasoning)
        .with_route(TaskClass::BulkGeneration, bulk)
        .with_call_timeout(std::time::Duration::from_millis(50));
    let sink = Arc::new(RecordingSink::default());
    let orchestrator = Orchestrator::new(
        config,
        ledger.clone(),
        Arc::new(router),
        Arc::new(source),
        sink.clone(),
    )
    .unwrap();
    Harness {
        orchestrator,
        ledger,
        sink,
    }
}

//! The content pipeline's data model.
//!
//! Ownership follows the run: a [`RunState`] is created when a transcript is
//! ingested and every [`Insight`], [`ResearchFinding`], [`ContentItem`] and
//! [`UsageRecord`] produced afterwards carries that run's [`RunId`].
//!
//! Two lifecycles are enforced here rather than by callers:
//!
//! - [`ContentStatus`]: `pending → approved | rejected`, then
//!   `approved → scheduled → published | publish_failed`.
//! - [`RunStage`]: `ingested → extracted → researched → generated → validated
//!   → published → completed`, with `failed` reachable from any non-terminal
//!   stage and `partial` reached through a degraded run. Terminal states are
//!   final.

use serde::{Deserialize, Serialize};

use crate::errors::{DenialReason, StageError, TransitionError};
use crate::{
    BackendName, BrandVoiceScore, ContentItemId, FindingId, InsightId, PriorityScore,
    Reliability, RunId, TaskClass, Timestamp, TokenCost, TokenCount, TranscriptId,
};

/// Transcripts shorter than this (in characters, after trimming) are rejected
/// before a run starts.
pub const MIN_TRANSCRIPT_CHARS: usize = 100;

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Descriptive metadata for the episode a transcript belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Episode title, if known.
    pub title: Option<String>,
    /// When the episode was recorded or released.
    pub recorded_at: Option<Timestamp>,
    /// Episode length in seconds.
    pub duration_secs: Option<u64>,
}

/// The raw text of one episode. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    id: TranscriptId,
    text: String,
    metadata: EpisodeMetadata,
}

impl Transcript {
    /// Creates a transcript.
    pub fn new(id: TranscriptId, text: impl Into<String>, metadata: EpisodeMetadata) -> Self {
        Self {
            id,
            text: text.into(),
            metadata,
        }
    }

    /// The transcript's identifier in its source.
    pub fn id(&self) -> &TranscriptId {
        &self.id
    }

    /// The full raw text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Episode metadata.
    pub fn metadata(&self) -> &EpisodeMetadata {
        &self.metadata
    }

    /// Length in characters with surrounding whitespace removed.
    pub fn trimmed_len(&self) -> usize {
        self.text.trim().chars().count()
    }

    /// Whitespace-separated word count.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

// ---------------------------------------------------------------------------
// Insight
// ---------------------------------------------------------------------------

/// What sort of claim an insight makes; drives research angle and content mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// A named, step-wise business framework.
    Framework,
    /// A claim that runs against conventional wisdom.
    ContrarianTake,
    /// A concrete story or example.
    CaseStudy,
    /// A small actionable tip.
    TacticalTip,
}

impl InsightKind {
    /// Parses the wire label (`framework`, `contrarian_take`, `case_study`,
    /// `tactical_tip`).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "framework" => Some(InsightKind::Framework),
            "contrarian_take" => Some(InsightKind::ContrarianTake),
            "case_study" => Some(InsightKind::CaseStudy),
            "tactical_tip" => Some(InsightKind::TacticalTip),
            _ => None,
        }
    }

    /// The wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            InsightKind::Framework => "framework",
            InsightKind::ContrarianTake => "contrarian_take",
            InsightKind::CaseStudy => "case_study",
            InsightKind::TacticalTip => "tactical_tip",
        }
    }
}

/// The transcript passage an insight is drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportingQuote {
    /// The quoted text as reported by the extractor.
    pub text: String,
    /// Character offsets `[start, end)` of the quote in the transcript, when it
    /// could be located verbatim.
    pub span: Option<(usize, usize)>,
}

impl SupportingQuote {
    /// Builds a quote and locates it in `transcript` by exact match.
    pub fn locate(text: impl Into<String>, transcript: &str) -> Self {
        let text = text.into();
        let needle = text.trim();
        let span = if needle.is_empty() {
            None
        } else {
            transcript.find(needle).map(|byte_start| {
                let start = transcript[..byte_start].chars().count();
                (start, start + needle.chars().count())
            })
        };
        Self { text, span }
    }
}

/// A structured claim extracted from a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Identity of this insight.
    pub id: InsightId,
    /// The run that extracted it.
    pub run: RunId,
    /// The transcript it was extracted from.
    pub transcript: TranscriptId,
    /// Short headline.
    pub title: String,
    /// Category of claim.
    pub kind: InsightKind,
    /// The claim itself.
    pub text: String,
    /// Supporting passage from the transcript.
    pub quote: SupportingQuote,
    /// Content-creation priority.
    pub priority: PriorityScore,
    /// Key terms used to steer research.
    pub key_terms: Vec<String>,
    /// The contrarian framing, if the insight has one.
    pub contrarian_angle: Option<String>,
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

/// Evidence gathered for one insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    /// Identity of this finding.
    pub id: FindingId,
    /// The insight it supports.
    pub insight: InsightId,
    /// Description of where the evidence comes from.
    pub source: String,
    /// The relevant excerpt.
    pub excerpt: String,
    /// Reliability bucket derived from the reported credibility.
    pub reliability: Reliability,
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Format of a generated content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// An ordered series of posts.
    Thread,
    /// A standalone post.
    SinglePost,
    /// A post quoting the episode.
    QuotePost,
}

impl ContentKind {
    /// Every kind, in scheduling priority order.
    pub const ALL: [ContentKind; 3] = [
        ContentKind::Thread,
        ContentKind::SinglePost,
        ContentKind::QuotePost,
    ];

    /// Parses the wire label (`thread`, `single_post`, `quote_post`).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "thread" => Some(ContentKind::Thread),
            "single_post" | "single_tweet" | "post" => Some(ContentKind::SinglePost),
            "quote_post" | "quote" => Some(ContentKind::QuotePost),
            _ => None,
        }
    }

    /// The wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Thread => "thread",
            ContentKind::SinglePost => "single_post",
            ContentKind::QuotePost => "quote_post",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The text of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "text", rename_all = "snake_case")]
pub enum ContentBody {
    /// One post.
    Single(String),
    /// Thread posts in publication order.
    Thread(Vec<String>),
}

impl ContentBody {
    /// Each individual post in publication order.
    pub fn posts(&self) -> Vec<&str> {
        match self {
            ContentBody::Single(text) => vec![text.as_str()],
            ContentBody::Thread(posts) => posts.iter().map(String::as_str).collect(),
        }
    }

    /// Returns `true` if there is no non-whitespace text at all.
    pub fn is_blank(&self) -> bool {
        self.posts().iter().all(|p| p.trim().is_empty())
    }

    /// All posts joined with blank lines.
    pub fn joined(&self) -> String {
        self.posts().join("\n\n")
    }
}

/// Lifecycle of a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContentStatus {
    /// Generated, not yet validated.
    Pending,
    /// Passed validation.
    Approved,
    /// Failed validation.
    Rejected {
        /// Why validation refused it.
        reason: String,
    },
    /// Assigned a publication slot.
    Scheduled {
        /// The slot.
        at: Timestamp,
    },
    /// Accepted by the publishing sink.
    Published {
        /// The slot it was published for.
        at: Timestamp,
        /// Sink-assigned reference, if any.
        receipt: Option<String>,
    },
    /// Refused by the publishing sink.
    PublishFailed {
        /// The slot it was scheduled for.
        at: Timestamp,
        /// The sink's reason.
        reason: String,
    },
}

impl ContentStatus {
    /// Short label used in logs and transition errors.
    pub fn label(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected { .. } => "rejected",
            ContentStatus::Scheduled { .. } => "scheduled",
            ContentStatus::Published { .. } => "published",
            ContentStatus::PublishFailed { .. } => "publish_failed",
        }
    }
}

/// A generated unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    id: ContentItemId,
    run: RunId,
    insight: InsightId,
    kind: ContentKind,
    body: ContentBody,
    status: ContentStatus,
    brand_voice: Option<BrandVoiceScore>,
}

impl ContentItem {
    /// Creates a `pending` item for `insight`.
    pub fn pending(run: RunId, insight: InsightId, kind: ContentKind, body: ContentBody) -> Self {
        Self {
            id: ContentItemId::new_random(),
            run,
            insight,
            kind,
            body,
            status: ContentStatus::Pending,
            brand_voice: None,
        }
    }

    /// Identity of this item.
    pub fn id(&self) -> ContentItemId {
        self.id
    }

    /// The run that generated it.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// The insight it was generated from.
    pub fn insight(&self) -> InsightId {
        self.insight
    }

    /// Its format.
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Its text.
    pub fn body(&self) -> &ContentBody {
        &self.body
    }

    /// Its lifecycle state.
    pub fn status(&self) -> &ContentStatus {
        &self.status
    }

    /// The brand-voice score assigned during validation, if one was computed.
    pub fn brand_voice(&self) -> Option<BrandVoiceScore> {
        self.brand_voice
    }

    /// Returns `true` once validation has decided the item either way.
    pub fn is_validated(&self) -> bool {
        !matches!(self.status, ContentStatus::Pending)
    }

    /// Returns `true` if the item is approved and not yet scheduled.
    pub fn is_approved(&self) -> bool {
        matches!(self.status, ContentStatus::Approved)
    }

    /// `pending → approved`.
    pub fn approve(&mut self, score: Option<BrandVoiceScore>) -> Result<(), TransitionError> {
        self.require(matches!(self.status, ContentStatus::Pending), "approved")?;
        self.status = ContentStatus::Approved;
        self.brand_voice = score;
        Ok(())
    }

    /// `pending → rejected`.
    pub fn reject(
        &mut self,
        reason: impl Into<String>,
        score: Option<BrandVoiceScore>,
    ) -> Result<(), TransitionError> {
        self.require(matches!(self.status, ContentStatus::Pending), "rejected")?;
        self.status = ContentStatus::Rejected {
            reason: reason.into(),
        };
        self.brand_voice = score;
        Ok(())
    }

    /// `approved → scheduled`.
    pub fn schedule(&mut self, at: Timestamp) -> Result<(), TransitionError> {
        self.require(matches!(self.status, ContentStatus::Approved), "scheduled")?;
        self.status = ContentStatus::Scheduled { at };
        Ok(())
    }

    /// `scheduled → published`.
    pub fn mark_published(&mut self, receipt: Option<String>) -> Result<(), TransitionError> {
        match self.status {
            ContentStatus::Scheduled { at } => {
                self.status = ContentStatus::Published { at, receipt };
                Ok(())
            }
            _ => Err(self.transition_error("published")),
        }
    }

    /// `scheduled → publish_failed`.
    pub fn mark_publish_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        match self.status {
            ContentStatus::Scheduled { at } => {
                self.status = ContentStatus::PublishFailed {
                    at,
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(self.transition_error("publish_failed")),
        }
    }

    fn require(&self, allowed: bool, to: &'static str) -> Result<(), TransitionError> {
        if allowed {
            Ok(())
        } else {
            Err(self.transition_error(to))
        }
    }

    fn transition_error(&self, to: &'static str) -> TransitionError {
        TransitionError {
            from: self.status.label(),
            to,
        }
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Whether a model invocation produced usable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    /// The backend returned text.
    Succeeded,
    /// The backend failed or timed out.
    Failed,
}

/// One model invocation's resource consumption. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// The run the invocation was made for.
    pub run: RunId,
    /// The backend invoked.
    pub backend: BackendName,
    /// The task class routed.
    pub task_class: TaskClass,
    /// Prompt tokens the backend reported.
    pub input_tokens: TokenCount,
    /// Completion tokens the backend reported.
    pub output_tokens: TokenCount,
    /// Estimated spend from the backend's pricing.
    pub cost: TokenCost,
    /// Whether the invocation succeeded.
    pub outcome: UsageOutcome,
    /// When the invocation finished.
    pub recorded_at: Timestamp,
}

impl UsageRecord {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> TokenCount {
        self.input_tokens + self.output_tokens
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// A step of the pipeline, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Transcript → insights.
    Extraction,
    /// Insights → findings.
    Research,
    /// Insights + findings → content items.
    Generation,
    /// Content items → approved / rejected.
    Validation,
    /// Approved items → publishing sink.
    Publishing,
}

impl StageKind {
    /// The stage's label.
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Extraction => "extraction",
            StageKind::Research => "research",
            StageKind::Generation => "generation",
            StageKind::Validation => "validation",
            StageKind::Publishing => "publishing",
        }
    }

    /// The run stage reached once this step succeeds.
    pub fn reaches(self) -> RunStage {
        match self {
            StageKind::Extraction => RunStage::Extracted,
            StageKind::Research => RunStage::Researched,
            StageKind::Generation => RunStage::Generated,
            StageKind::Validation => RunStage::Validated,
            StageKind::Publishing => RunStage::Published,
        }
    }

    fn predecessor(self) -> RunStage {
        match self {
            StageKind::Extraction => RunStage::Ingested,
            StageKind::Research => RunStage::Extracted,
            StageKind::Generation => RunStage::Researched,
            StageKind::Validation => RunStage::Generated,
            StageKind::Publishing => RunStage::Validated,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Transcript accepted; nothing dispatched yet.
    Ingested,
    /// Insights extracted.
    Extracted,
    /// Findings gathered.
    Researched,
    /// Content generated.
    Generated,
    /// Content validated.
    Validated,
    /// Approved content handed to the sink.
    Published,
    /// Terminal: every stage succeeded.
    Completed,
    /// Terminal: a stage failed twice; earlier output preserved.
    Partial,
    /// Terminal: the run was halted.
    Failed,
}

impl RunStage {
    /// The stage's label.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Ingested => "ingested",
            RunStage::Extracted => "extracted",
            RunStage::Researched => "researched",
            RunStage::Generated => "generated",
            RunStage::Validated => "validated",
            RunStage::Published => "published",
            RunStage::Completed => "completed",
            RunStage::Partial => "partial",
            RunStage::Failed => "failed",
        }
    }

    /// Returns `true` for `completed`, `partial` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Partial | RunStage::Failed)
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// A ceiling refused a model request.
    BudgetExceeded,
    /// Transient failures exhausted every candidate backend.
    BackendTransient,
    /// A backend refused the request permanently.
    BackendPermanent,
    /// A backend answered with output the stage could not use.
    MalformedOutput,
    /// No backend is configured for a task class.
    NoRoute,
}

/// Why a run degraded or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Category.
    pub code: FailureCode,
    /// The ceiling, for budget refusals.
    pub denial: Option<DenialReason>,
    /// Human-readable description.
    pub message: String,
}

impl From<&StageError> for FailureReason {
    fn from(err: &StageError) -> Self {
        let (code, denial) = match err {
            StageError::BudgetExceeded(d) => (FailureCode::BudgetExceeded, Some(d.reason)),
            StageError::Backend { source, .. } if source.is_transient() => {
                (FailureCode::BackendTransient, None)
            }
            StageError::Backend { .. } => (FailureCode::BackendPermanent, None),
            StageError::NoRoute { .. } => (FailureCode::NoRoute, None),
            StageError::MalformedOutput { .. } => (FailureCode::MalformedOutput, None),
        };
        Self {
            code,
            denial,
            message: err.to_string(),
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage succeeded.
    Completed,
    /// A stage failed twice; earlier output was kept and approved items published.
    Partial {
        /// The stage that failed.
        failed_stage: StageKind,
        /// Why.
        reason: FailureReason,
    },
    /// The run was halted.
    Failed {
        /// The stage that was running.
        failed_stage: StageKind,
        /// Why.
        reason: FailureReason,
    },
}

/// Items that reached each stage of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Qualified insights extracted.
    pub insights: usize,
    /// Research findings kept.
    pub findings: usize,
    /// Content items generated.
    pub generated: usize,
    /// Items approved by validation.
    pub approved: usize,
    /// Items rejected by validation.
    pub rejected: usize,
    /// Approved items given a slot.
    pub scheduled: usize,
    /// Approved items left without a slot.
    pub unscheduled: usize,
    /// Items accepted by the sink.
    pub published: usize,
    /// Items refused by the sink.
    pub publish_failed: usize,
}

/// One pipeline execution over one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    id: RunId,
    transcript: TranscriptId,
    stage: RunStage,
    completed_stages: Vec<StageKind>,
    counts: StageCounts,
    degraded: Option<(StageKind, FailureReason)>,
    outcome: Option<RunOutcome>,
    episode_ceiling: TokenCount,
    started_at: Timestamp,
    finished_at: Option<Timestamp>,
}

impl RunState {
    /// Starts a run in the `ingested` stage.
    pub fn start(id: RunId, transcript: TranscriptId, episode_ceiling: TokenCount) -> Self {
        Self {
            id,
            transcript,
            stage: RunStage::Ingested,
            completed_stages: Vec::new(),
            counts: StageCounts::default(),
            degraded: None,
            outcome: None,
            episode_ceiling,
            started_at: Timestamp::now(),
            finished_at: None,
        }
    }

    /// The run's identity.
    pub fn id(&self) -> RunId {
        self.id
    }

    /// The transcript being processed.
    pub fn transcript(&self) -> &TranscriptId {
        &self.transcript
    }

    /// Current stage.
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Steps that finished successfully, in order.
    pub fn completed_stages(&self) -> &[StageKind] {
        &self.completed_stages
    }

    /// Per-stage item counts.
    pub fn counts(&self) -> &StageCounts {
        &self.counts
    }

    /// The terminal outcome, once reached.
    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// The episode ceiling in effect when the run started.
    pub fn episode_ceiling(&self) -> TokenCount {
        self.episode_ceiling
    }

    /// When the run started.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// When the run reached a terminal state.
    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at
    }

    /// Records a successful step and moves to the stage it reaches.
    ///
    /// `publishing` may follow any non-terminal stage of a degraded run; every
    /// other step requires its predecessor.
    pub fn advance(&mut self, step: StageKind) -> Result<RunStage, TransitionError> {
        self.ensure_open(step.reaches())?;
        let allowed = self.stage == step.predecessor()
            || (step == StageKind::Publishing && self.degraded.is_some());
        if !allowed {
            return Err(TransitionError {
                from: self.stage.as_str(),
                to: step.reaches().as_str(),
            });
        }
        self.completed_stages.push(step);
        self.stage = step.reaches();
        Ok(self.stage)
    }

    /// Marks the run as degraded after `step` failed on retry. The run stays
    /// open so already-approved content can still be published.
    pub fn degrade(&mut self, step: StageKind, reason: FailureReason) -> Result<(), TransitionError> {
        self.ensure_open(RunStage::Partial)?;
        if self.degraded.is_some() {
            return Err(TransitionError {
                from: self.stage.as_str(),
                to: RunStage::Partial.as_str(),
            });
        }
        self.degraded = Some((step, reason));
        Ok(())
    }

    /// Halts the run.
    pub fn fail(&mut self, step: StageKind, reason: FailureReason) -> Result<(), TransitionError> {
        self.ensure_open(RunStage::Failed)?;
        self.stage = RunStage::Failed;
        self.outcome = Some(RunOutcome::Failed {
            failed_stage: step,
            reason,
        });
        self.finished_at = Some(Timestamp::now());
        Ok(())
    }

    /// Closes a run that has reached `published`: `completed`, or `partial`
    /// if it was degraded on the way.
    pub fn finish(&mut self) -> Result<&RunOutcome, TransitionError> {
        let target = if self.degraded.is_some() {
            RunStage::Partial
        } else {
            RunStage::Completed
        };
        self.ensure_open(target)?;
        if self.stage != RunStage::Published {
            return Err(TransitionError {
                from: self.stage.as_str(),
                to: target.as_str(),
            });
        }
        let outcome = match self.degraded.take() {
            Some((failed_stage, reason)) => RunOutcome::Partial {
                failed_stage,
                reason,
            },
            None => RunOutcome::Completed,
        };
        self.stage = target;
        self.finished_at = Some(Timestamp::now());
        let outcome = self.outcome.insert(outcome);
        Ok(&*outcome)
    }

    /// Applies `update` to the counts of a run that is still open.
    pub fn update_counts(
        &mut self,
        update: impl FnOnce(&mut StageCounts),
    ) -> Result<(), TransitionError> {
        self.ensure_open(self.stage)?;
        update(&mut self.counts);
        Ok(())
    }

    fn ensure_open(&self, to: RunStage) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            Err(TransitionError {
                from: self.stage.as_str(),
                to: to.as_str(),
            })
        } else {
            Ok(())
        }
    }
}

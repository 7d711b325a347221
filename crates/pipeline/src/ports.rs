//! Port traits implemented by infrastructure crates and the stages crate.
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`TextBackend`] | `llm` (Anthropic, OpenRouter) |
//! | [`Dispatch`] | `stages::ModelRouter` |
//! | [`Stage`] | the four `stages` pipeline stages |
//! | [`TranscriptSource`] | `store::FsTranscriptSource` |
//! | [`PublishingSink`] | `store::JournalSink` |
//!
//! Every trait is object safe so the composition root can hold
//! `Arc<dyn …>` handles and tests can substitute plain structs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{BackendError, DispatchError, SourceError, StageError};
use crate::model::{ContentItem, StageKind, Transcript};
use crate::{BackendName, Pricing, RunId, TaskClass, Timestamp, TokenCount, TranscriptId};

// ---------------------------------------------------------------------------
// Text generation
// ---------------------------------------------------------------------------

/// A request for text generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Instructions establishing the model's role.
    pub system: String,
    /// The task itself.
    pub user: String,
    /// Completion budget.
    pub max_tokens: u64,
}

impl Prompt {
    /// Creates a prompt.
    pub fn new(system: impl Into<String>, user: impl Into<String>, max_tokens: u64) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens,
        }
    }

    /// UTF-8 bytes in the system and user text combined. Byte-level BPE
    /// tokenizers never emit more tokens than this.
    pub fn byte_len(&self) -> usize {
        self.system.len() + self.user.len()
    }
}

/// Text returned by a backend with the usage it reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// The completion.
    pub text: String,
    /// Prompt tokens billed.
    pub input_tokens: TokenCount,
    /// Completion tokens billed.
    pub output_tokens: TokenCount,
}

/// A single text-generation backend.
///
/// Implementations perform exactly one request per call: retries, timeouts
/// and failover belong to the router.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Name used in routes and usage records.
    fn name(&self) -> &BackendName;

    /// Prices used to cost this backend's usage.
    fn pricing(&self) -> Pricing;

    /// Generates a completion for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<Generation, BackendError>;
}

/// Text produced by a routed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedText {
    /// The completion.
    pub text: String,
    /// The backend that produced it.
    pub backend: BackendName,
    /// Tokens it billed for the successful attempt.
    pub tokens: TokenCount,
}

/// Budget-aware routing of a prompt to a backend for a task class.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Sends `prompt` on behalf of `run` to the backends routed for `task_class`.
    async fn dispatch(
        &self,
        run: RunId,
        task_class: TaskClass,
        prompt: Prompt,
    ) -> Result<GeneratedText, DispatchError>;
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One step of the content pipeline.
///
/// Stages never call each other: the orchestrator threads outputs from one
/// into inputs of the next. An empty output is a valid result.
#[async_trait]
pub trait Stage: Send + Sync {
    /// What the stage consumes.
    type Input: Send + Sync;
    /// What the stage produces.
    type Output: Send;

    /// Which step this is.
    fn kind(&self) -> StageKind;

    /// Runs the stage for `run`.
    async fn run(&self, run: RunId, input: &Self::Input) -> Result<Self::Output, StageError>;
}

// ---------------------------------------------------------------------------
// Transcripts and publishing
// ---------------------------------------------------------------------------

/// Where transcripts are read from.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Loads the transcript stored under `id`.
    async fn load(&self, id: &TranscriptId) -> Result<Transcript, SourceError>;
}

/// The sink's answer for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The item was accepted for its slot.
    Accepted {
        /// Sink-specific reference, if one was issued.
        receipt: Option<String>,
    },
    /// The item was refused.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Accepts scheduled content for publication.
///
/// Sinks report refusals and their own I/O failures as
/// [`PublishOutcome::Rejected`]; a refusal never aborts the run.
#[async_trait]
pub trait PublishingSink: Send + Sync {
    /// Submits `item` for publication at `at`.
    async fn publish(&self, item: &ContentItem, at: Timestamp) -> PublishOutcome;
}

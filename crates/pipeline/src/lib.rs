//! Core domain for podcast-cmo.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, error type, the budget ledger, and the port traits used throughout
//! the content pipeline. Infrastructure crates implement the traits defined
//! here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; `llm` and `store` define *how* to supply it,
//! and `stages` composes it into a pipeline.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RunId`, `TranscriptId`, `BackendName`, etc.) |
//! | [`types`] | Shared value types (`TokenCount`, `TokenCost`, `Pricing`, `Timestamp`, etc.) |
//! | [`errors`] | Error taxonomy and retry policy |
//! | [`model`] | Transcripts, insights, findings, content items, usage records, run state |
//! | [`config`] | The run configuration snapshot and its defaults |
//! | [`budget`] | The budget ledger and reservations |
//! | [`ports`] | Traits for backends, routing, stages, transcript sources and sinks |

pub mod budget;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod model;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use budget::{
    BudgetLedger, BudgetScope, Clock, Estimate, Remaining, Reservation, RunUsage, SystemClock,
    UsageSummary,
};
pub use config::{
    BudgetCeilings, ContentMix, ContentSettings, ExtractionSettings, PipelineConfig,
    PublishingSettings, ResearchSettings, RoutingSettings, ValidationSettings,
};
pub use errors::{
    BackendError, BudgetDenial, DenialReason, DispatchError, PipelineError, RetryPolicy,
    SourceError, StageError, TransitionError,
};
pub use identifiers::{
    BackendName, ContentItemId, FindingId, InsightId, RunId, TranscriptId,
};
pub use model::{
    ContentBody, ContentItem, ContentKind, ContentStatus, EpisodeMetadata, FailureCode,
    FailureReason, Insight, InsightKind, ResearchFinding, RunOutcome, RunStage, RunState,
    StageCounts, StageKind, SupportingQuote, Transcript, UsageOutcome, UsageRecord,
    MIN_TRANSCRIPT_CHARS,
};
pub use ports::{
    Dispatch, GeneratedText, Generation, Prompt, PublishOutcome, PublishingSink, Stage,
    TextBackend, TranscriptSource,
};
pub use types::{
    BrandVoiceScore, CostBudget, MonthKey, Pricing, PriorityScore, Reliability, TaskClass,
    Timestamp, TokenCost, TokenCount,
};

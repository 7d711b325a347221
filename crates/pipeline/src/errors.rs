//! Error and retry-policy types for the podcast-cmo domain.
//!
//! The taxonomy mirrors how far an error is allowed to travel:
//!
//! | Type | Raised by | Fate |
//! |------|-----------|------|
//! | [`BackendError`] | a [`crate::TextBackend`] | retried / failed over by the router |
//! | [`DispatchError`] | the router | surfaced to the calling stage |
//! | [`StageError`] | a pipeline stage | classified by the orchestrator |
//! | [`PipelineError`] | the orchestrator | returned to the operator; no run state exists |
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::StageKind;
use crate::{BackendName, TaskClass, TokenCount, TranscriptId};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: call timeouts, rate limits, 5xx responses, transport
///   failures of unknown cause.
/// - `NonRetryable` errors: budget exceeded, rejected credentials, malformed
///   requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried against the same target.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Failure reported by a text-generation backend for a single call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// A failure that may succeed on retry (rate limit, overload, network).
    ///
    /// Unknown failures are classified here so they get one retry.
    #[error("transient backend failure: {message}")]
    Transient {
        /// Description from the backend or transport.
        message: String,
        /// Server-advised delay before retrying, if any.
        retry_after: Option<Duration>,
    },

    /// The call did not complete within the configured per-call timeout.
    #[error("backend call timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// A failure that will not succeed on retry (bad credentials, invalid request).
    #[error("permanent backend failure: {message}")]
    Permanent {
        /// Description from the backend.
        message: String,
    },
}

impl BackendError {
    /// Convenience constructor for a transient failure without a retry hint.
    pub fn transient(message: impl Into<String>) -> Self {
        BackendError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Convenience constructor for a permanent failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        BackendError::Permanent {
            message: message.into(),
        }
    }

    /// Whether the same backend may be called again for this request.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackendError::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            BackendError::Timeout { .. } => RetryPolicy::Retryable { after: None },
            BackendError::Permanent { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` for timeouts and other transient failures.
    pub fn is_transient(&self) -> bool {
        self.retry_policy().is_retryable()
    }
}

// ---------------------------------------------------------------------------
// Budget denial
// ---------------------------------------------------------------------------

/// Which ceiling refused a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    /// The per-episode (per-run) token ceiling.
    EpisodeLimit,
    /// The per-day token ceiling.
    DailyLimit,
    /// The per-month spend budget.
    MonthlyBudget,
}

impl DenialReason {
    /// Machine-readable code (`EPISODE_LIMIT`, `DAILY_LIMIT`, `MONTHLY_BUDGET`).
    pub fn code(self) -> &'static str {
        match self {
            DenialReason::EpisodeLimit => "EPISODE_LIMIT",
            DenialReason::DailyLimit => "DAILY_LIMIT",
            DenialReason::MonthlyBudget => "MONTHLY_BUDGET",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A refused budget reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{reason}: {detail}")]
pub struct BudgetDenial {
    /// The most restrictive ceiling that refused the request.
    pub reason: DenialReason,
    /// Tokens the request asked to reserve.
    pub requested: TokenCount,
    /// Human-readable description of the usage against the ceiling.
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Router errors
// ---------------------------------------------------------------------------

/// Failure of a routed model request after retries and failover.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The budget ledger refused the reservation; no backend was invoked for
    /// the refused attempt.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetDenial),

    /// Every candidate backend failed; carries the last failure.
    #[error("backend '{backend}' failed: {source}")]
    Backend {
        /// The last backend attempted.
        backend: BackendName,
        /// Its failure.
        #[source]
        source: BackendError,
    },

    /// No backend is configured for the task class.
    #[error("no backend routed for task class '{task_class}'")]
    NoRoute {
        /// The unrouted class.
        task_class: TaskClass,
    },
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Failure of a pipeline stage, classified by the orchestrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// A model request was refused by the budget ledger. Halts the run.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetDenial),

    /// The router exhausted its candidates for a request.
    #[error("backend '{backend}' failed: {source}")]
    Backend {
        /// The last backend attempted.
        backend: BackendName,
        /// Its failure.
        #[source]
        source: BackendError,
    },

    /// No backend is configured for the task class the stage needs.
    #[error("no backend routed for task class '{task_class}'")]
    NoRoute {
        /// The unrouted class.
        task_class: TaskClass,
    },

    /// The backend answered but the answer could not be interpreted.
    #[error("{stage} stage produced unusable output: {message}")]
    MalformedOutput {
        /// The stage that could not interpret its response.
        stage: StageKind,
        /// What was wrong with it.
        message: String,
    },
}

impl StageError {
    /// Returns the denial if this error is a budget refusal.
    pub fn budget_denial(&self) -> Option<&BudgetDenial> {
        match self {
            StageError::BudgetExceeded(denial) => Some(denial),
            _ => None,
        }
    }
}

impl From<DispatchError> for StageError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::BudgetExceeded(denial) => StageError::BudgetExceeded(denial),
            DispatchError::Backend { backend, source } => StageError::Backend { backend, source },
            DispatchError::NoRoute { task_class } => StageError::NoRoute { task_class },
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript source errors
// ---------------------------------------------------------------------------

/// Failure to read a transcript from its source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No transcript exists under the identifier.
    #[error("transcript '{0}' not found")]
    NotFound(TranscriptId),

    /// The source exists but could not be read or decoded.
    #[error("transcript '{transcript}' unreadable: {message}")]
    Unreadable {
        /// The transcript being read.
        transcript: TranscriptId,
        /// Description of the underlying failure.
        message: String,
    },
}

impl SourceError {
    /// The transcript the failure concerns.
    pub fn transcript(&self) -> &TranscriptId {
        match self {
            SourceError::NotFound(id) => id,
            SourceError::Unreadable { transcript, .. } => transcript,
        }
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        PipelineError::TranscriptStore {
            transcript: err.transcript().clone(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Content and run state transitions
// ---------------------------------------------------------------------------

/// An attempted state change that the lifecycle does not permit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from '{from}' to '{to}'")]
pub struct TransitionError {
    /// State label before the attempted change.
    pub from: &'static str,
    /// Requested state label.
    pub to: &'static str,
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors returned to the operator instead of a run report.
///
/// Everything that can go wrong *inside* a run is classified into the run's
/// terminal outcome; these are the conditions under which no run is started
/// or the environment itself is broken.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The transcript is below the minimum viable length. No run was started
    /// and no model was called.
    #[error("transcript '{transcript}' too short: {length} characters, minimum {minimum}")]
    TranscriptTooShort {
        /// The rejected transcript.
        transcript: TranscriptId,
        /// Its trimmed length in characters.
        length: usize,
        /// The required minimum.
        minimum: usize,
    },

    /// The transcript store could not be read. Unrecoverable; surfaced to the
    /// operator.
    #[error("transcript store unavailable for '{transcript}': {message}")]
    TranscriptStore {
        /// The transcript that was being loaded.
        transcript: TranscriptId,
        /// Description of the underlying failure.
        message: String,
    },

    /// The pipeline configuration is invalid.
    ///
    /// Produced at load time; the pipeline never starts with an invalid config.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl PipelineError {
    /// Shorthand for a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }
}

//! Sequences the stages for one transcript and owns the run's lifecycle.
//!
//! ```text
//! load ─► ingested ─► extracted ─► researched ─► generated ─► validated ─► published ─► completed
//!                │            │             │            │
//!                └────────────┴─────────────┴────────────┴──► failed   (budget refused)
//!                                                         └──► partial  (stage failed twice;
//!                                                                        approved items still published)
//! ```
//!
//! A transcript that cannot be loaded, or is too short, never becomes a run:
//! the caller gets a [`PipelineError`] and no model is called.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use pipeline::{
    BudgetLedger, ContentItem, Dispatch, FailureReason, Insight, PipelineConfig, PipelineError,
    PublishOutcome, PublishingSink, ResearchFinding, RunId, RunState, RunUsage, Stage, StageCounts,
    StageError, StageKind, Timestamp, Transcript, TranscriptId, TranscriptSource, UsageRecord,
    MIN_TRANSCRIPT_CHARS,
};

use crate::extraction::ExtractionStage;
use crate::generation::{GenerationInput, GenerationStage};
use crate::research::ResearchStage;
use crate::schedule::PublishingScheduler;
use crate::validation::ValidationStage;

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal run state, including outcome and per-stage counts.
    pub state: RunState,
    /// Qualified insights.
    pub insights: Vec<Insight>,
    /// Research findings.
    pub findings: Vec<ResearchFinding>,
    /// Content items in their final status.
    pub items: Vec<ContentItem>,
    /// Every model invocation made for the run, in order.
    pub usage: Vec<UsageRecord>,
    /// Usage totals.
    pub totals: RunUsage,
}

/// Output carried between stages of one run.
#[derive(Default)]
struct Artifacts {
    insights: Vec<Insight>,
    findings: Vec<ResearchFinding>,
    items: Vec<ContentItem>,
}

/// A stage that failed after its retry.
struct StageFailure {
    step: StageKind,
    error: StageError,
}

/// Runs the content pipeline.
pub struct Orchestrator {
    config: PipelineConfig,
    ledger: BudgetLedger,
    source: Arc<dyn TranscriptSource>,
    sink: Arc<dyn PublishingSink>,
    extraction: ExtractionStage,
    research: ResearchStage,
    generation: GenerationStage,
    validation: ValidationStage,
    scheduler: PublishingScheduler,
}

impl Orchestrator {
    /// Wires the stages around `router`. `ledger` must be the ledger the
    /// router reserves against; it is read for per-run usage.
    pub fn new(
        config: PipelineConfig,
        ledger: BudgetLedger,
        router: Arc<dyn Dispatch>,
        source: Arc<dyn TranscriptSource>,
        sink: Arc<dyn PublishingSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            extraction: ExtractionStage::new(router.clone(), config.extraction.clone()),
            research: ResearchStage::new(router.clone(), config.research.clone()),
            generation: GenerationStage::new(router.clone(), config.content.clone()),
            validation: ValidationStage::new(
                router,
                config.validation.clone(),
                config.content.clone(),
            ),
            scheduler: PublishingScheduler::new(&config.publishing)?,
            config,
            ledger,
            source,
            sink,
        })
    }

    /// The configuration snapshot in effect.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The shared budget ledger.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Runs the pipeline over one transcript.
    ///
    /// Returns `Err` only when no run could be started; every run that starts
    /// ends in a terminal state reported in the [`RunReport`].
    pub async fn run(&self, transcript_id: &TranscriptId) -> Result<RunReport, PipelineError> {
        let transcript = self.source.load(transcript_id).await?;
        let length = transcript.trimmed_len();
        if length < MIN_TRANSCRIPT_CHARS {
            warn!(
                transcript_id = %transcript_id,
                length,
                "Transcript too short; run not started"
            );
            return Err(PipelineError::TranscriptTooShort {
                transcript: transcript_id.clone(),
                length,
                minimum: MIN_TRANSCRIPT_CHARS,
            });
        }

        let run = RunId::new_random();
        let span = info_span!("run", run_id = %run, transcript_id = %transcript_id);
        Ok(self.execute_run(run, transcript).instrument(span).await)
    }

    /// Runs several transcripts, at most `parallel` at a time, sharing the
    /// ledger. Results are returned in input order.
    pub async fn run_batch(
        &self,
        transcript_ids: &[TranscriptId],
        parallel: usize,
    ) -> Vec<(TranscriptId, Result<RunReport, PipelineError>)> {
        futures::stream::iter(transcript_ids)
            .map(|id| async move { (id.clone(), self.run(id).await) })
            .buffered(parallel.max(1))
            .collect()
            .await
    }

    async fn execute_run(&self, run: RunId, transcript: Transcript) -> RunReport {
        let mut state = RunState::start(
            run,
            transcript.id().clone(),
            self.config.budget.episode_tokens,
        );
        info!(
            words = transcript.word_count(),
            episode_ceiling = %state.episode_ceiling(),
            "Run started"
        );

        let mut artifacts = Artifacts::default();
        if let Err(failure) = self.produce(run, &transcript, &mut state, &mut artifacts).await {
            let reason = FailureReason::from(&failure.error);
            if failure.error.budget_denial().is_some() {
                error!(stage = %failure.step, error = %failure.error, "Budget refused; run halted");
                if let Err(err) = state.fail(failure.step, reason) {
                    error!(error = %err, "Could not mark run failed");
                }
                return self.report(state, artifacts);
            }
            warn!(
                stage = %failure.step,
                error = %failure.error,
                "Stage failed after retry; publishing approved items only"
            );
            if let Err(err) = state.degrade(failure.step, reason) {
                error!(error = %err, "Could not mark run degraded");
            }
        }

        self.publish(&mut state, &mut artifacts.items).await;
        checkpoint(&mut state, StageKind::Publishing, |_| {});
        match state.finish().map(Clone::clone) {
            Ok(outcome) => info!(?outcome, counts = ?state.counts(), "Run finished"),
            Err(err) => error!(error = %err, "Could not finish run"),
        }
        self.report(state, artifacts)
    }

    /// Runs extraction through validation, stopping at the first stage that
    /// fails twice.
    async fn produce(
        &self,
        run: RunId,
        transcript: &Transcript,
        state: &mut RunState,
        out: &mut Artifacts,
    ) -> Result<(), StageFailure> {
        out.insights = self.attempt(&self.extraction, run, transcript).await?;
        let insights = out.insights.len();
        checkpoint(state, StageKind::Extraction, |c| c.insights = insights);

        out.findings = self.attempt(&self.research, run, &out.insights).await?;
        let findings = out.findings.len();
        checkpoint(state, StageKind::Research, |c| c.findings = findings);

        let input = GenerationInput {
            insights: out.insights.clone(),
            findings: out.findings.clone(),
        };
        out.items = self.attempt(&self.generation, run, &input).await?;
        let generated = out.items.len();
        checkpoint(state, StageKind::Generation, |c| c.generated = generated);

        let validated = self.validate(run, &mut out.items).await;
        let approved = out.items.iter().filter(|i| i.is_approved()).count();
        let rejected = out.items.iter().filter(|i| i.is_validated()).count() - approved;
        let record = |c: &mut StageCounts| {
            c.approved = approved;
            c.rejected = rejected;
        };
        match validated {
            Ok(()) => checkpoint(state, StageKind::Validation, record),
            Err(failure) => {
                if let Err(err) = state.update_counts(record) {
                    error!(error = %err, "Could not record validation counts");
                }
                return Err(failure);
            }
        }
        Ok(())
    }

    /// Validation with the same retry rule as [`Self::attempt`], but deciding
    /// items in place: the retry resumes after the items already decided, and
    /// those decisions survive a second failure.
    async fn validate(&self, run: RunId, items: &mut [ContentItem]) -> Result<(), StageFailure> {
        let step = StageKind::Validation;
        let error = match self.validation.decide_all(run, items).await {
            Ok(()) => return Ok(()),
            Err(error) if error.budget_denial().is_some() => {
                return Err(StageFailure { step, error });
            }
            Err(error) => error,
        };

        let backoff = self.config.routing.stage_retry_backoff();
        let decided = items.iter().filter(|i| i.is_validated()).count();
        warn!(
            stage = %step,
            error = %error,
            decided,
            backoff_ms = backoff.as_millis() as u64,
            "Stage failed; retrying once"
        );
        tokio::time::sleep(backoff).await;
        self.validation
            .decide_all(run, items)
            .await
            .map_err(|error| StageFailure { step, error })
    }

    /// Runs `stage`, retrying once after back-off unless the budget refused.
    async fn attempt<S: Stage>(
        &self,
        stage: &S,
        run: RunId,
        input: &S::Input,
    ) -> Result<S::Output, StageFailure> {
        let step = stage.kind();
        let error = match stage.run(run, input).await {
            Ok(output) => return Ok(output),
            Err(error) if error.budget_denial().is_some() => {
                return Err(StageFailure { step, error });
            }
            Err(error) => error,
        };

        let backoff = self.config.routing.stage_retry_backoff();
        warn!(
            stage = %step,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Stage failed; retrying once"
        );
        tokio::time::sleep(backoff).await;
        stage
            .run(run, input)
            .await
            .map_err(|error| StageFailure { step, error })
    }

    /// Schedules approved items and hands them to the sink.
    async fn publish(&self, state: &mut RunState, items: &mut [ContentItem]) {
        let plan = self.scheduler.plan(items, Timestamp::now());
        let mut counts = StageCounts {
            scheduled: plan.assignments.len(),
            unscheduled: plan.unscheduled.len(),
            ..StageCounts::default()
        };
        if counts.unscheduled > 0 {
            warn!(unscheduled = counts.unscheduled, "Approved items left without a slot");
        }

        for (id, at) in plan.assignments {
            let Some(item) = items.iter_mut().find(|i| i.id() == id) else {
                continue;
            };
            if let Err(err) = item.schedule(at) {
                error!(content_id = %id, error = %err, "Could not schedule item");
                continue;
            }
            let transition = match self.sink.publish(item, at).await {
                PublishOutcome::Accepted { receipt } => {
                    counts.published += 1;
                    item.mark_published(receipt)
                }
                PublishOutcome::Rejected { reason } => {
                    counts.publish_failed += 1;
                    warn!(content_id = %id, %reason, "Sink rejected item");
                    item.mark_publish_failed(reason)
                }
            };
            if let Err(err) = transition {
                error!(content_id = %id, error = %err, "Could not record publishing outcome");
            }
        }

        let result = state.update_counts(|c| {
            c.scheduled = counts.scheduled;
            c.unscheduled = counts.unscheduled;
            c.published = counts.published;
            c.publish_failed = counts.publish_failed;
        });
        if let Err(err) = result {
            error!(error = %err, "Could not record publishing counts");
        }
    }

    fn report(&self, state: RunState, artifacts: Artifacts) -> RunReport {
        let run = state.id();
        RunReport {
            usage: self.ledger.records_for(run),
            totals: self.ledger.usage_for(run),
            state,
            insights: artifacts.insights,
            findings: artifacts.findings,
            items: artifacts.items,
        }
    }
}

/// Records a successful step's counts and advances the run past it.
fn checkpoint(state: &mut RunState, step: StageKind, update: impl FnOnce(&mut StageCounts)) {
    let result = state
        .update_counts(update)
        .and_then(|()| state.advance(step).map(|_| ()));
    match result {
        Ok(()) => info!(stage = %step, counts = ?state.counts(), "Stage complete"),
        Err(err) => error!(stage = %step, error = %err, "Could not advance run"),
    }
}

//! Budget-aware routing of prompts to text-generation backends.
//!
//! Each task class has an ordered list of candidate backends. For every
//! attempt the router waits for the backend's rate limit, reserves budget,
//! calls the backend under a hard timeout, and commits a [`UsageRecord`] with
//! whatever the backend billed.
//!
//! The reservation is an upper bound: prompt bytes plus the completion
//! budget. A backend cannot bill more than that, so a run's committed usage
//! stays within the episode ceiling its reservations were checked against.
//!
//! Attempt policy per candidate:
//!
//! | Failure | Next step |
//! |---------|-----------|
//! | transient (rate limit, overload, transport) | one retry on the same backend after back-off |
//! | timeout | fail over to the next candidate |
//! | permanent | fail over to the next candidate |
//!
//! After the last candidate fails, its error is returned. A budget refusal
//! ends dispatch immediately, without calling any backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use pipeline::{
    BackendError, BackendName, BudgetLedger, Dispatch, DispatchError, Estimate, GeneratedText,
    Generation, Prompt, RoutingSettings, RunId, TaskClass, TextBackend, Timestamp, TokenCount,
    UsageOutcome, UsageRecord,
};

use crate::throttle::RateLimiter;

/// Routes prompts to backends by task class. See the module docs.
pub struct ModelRouter {
    ledger: BudgetLedger,
    routes: HashMap<TaskClass, Vec<Arc<dyn TextBackend>>>,
    call_timeout: Duration,
    retry_backoff: Duration,
    rate_limit: Option<(u32, Duration)>,
    limiters: Mutex<HashMap<BackendName, Arc<RateLimiter>>>,
}

impl ModelRouter {
    /// Creates a router with no routes.
    pub fn new(ledger: BudgetLedger, settings: &RoutingSettings) -> Self {
        Self {
            ledger,
            routes: HashMap::new(),
            call_timeout: settings.call_timeout(),
            retry_backoff: settings.retry_backoff(),
            rate_limit: settings.rate_limit(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the ordered candidates for `task_class`, primary first.
    pub fn with_route(
        mut self,
        task_class: TaskClass,
        candidates: Vec<Arc<dyn TextBackend>>,
    ) -> Self {
        self.routes.insert(task_class, candidates);
        self
    }

    /// Overrides the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Overrides the per-backend call limit: `calls` per `period`.
    pub fn with_rate_limit(mut self, calls: u32, period: Duration) -> Self {
        self.rate_limit = Some((calls, period));
        self
    }

    /// The ledger this router reserves against.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// The candidates routed for `task_class`, primary first.
    pub fn candidates(&self, task_class: TaskClass) -> &[Arc<dyn TextBackend>] {
        self.routes
            .get(&task_class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Upper-bound size of `prompt` on `backend`: one token per prompt byte
    /// plus the completion budget.
    pub fn estimate(&self, prompt: &Prompt, backend: &dyn TextBackend) -> Estimate {
        let prompt_tokens = TokenCount::new(prompt.byte_len() as u64);
        let completion_tokens = TokenCount::new(prompt.max_tokens);
        Estimate {
            tokens: prompt_tokens + completion_tokens,
            cost: backend.pricing().cost_of(prompt_tokens, completion_tokens),
        }
    }

    /// The shared limiter for `backend`, if calls are limited.
    fn limiter(&self, backend: &BackendName) -> Option<Arc<RateLimiter>> {
        let (calls, period) = self.rate_limit?;
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        let limiter = limiters
            .entry(backend.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(calls, period)));
        Some(limiter.clone())
    }

    /// One rate-limited, reserved, timed, committed call.
    async fn attempt(
        &self,
        run: RunId,
        task_class: TaskClass,
        backend: &dyn TextBackend,
        prompt: &Prompt,
    ) -> Result<Result<Generation, BackendError>, DispatchError> {
        if let Some(limiter) = self.limiter(backend.name()) {
            let waited = limiter.acquire().await;
            if waited >= Duration::from_millis(1) {
                debug!(
                    run_id = %run,
                    backend = %backend.name(),
                    waited_ms = waited.as_millis() as u64,
                    "Waited for backend rate limit"
                );
            }
        }

        let estimate = self.estimate(prompt, backend);
        let reservation = self
            .ledger
            .reserve(run, task_class, estimate)
            .map_err(DispatchError::BudgetExceeded)?;

        let result = match tokio::time::timeout(self.call_timeout, backend.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                after: self.call_timeout,
            }),
        };

        let (input_tokens, output_tokens, outcome) = match &result {
            Ok(generation) => (
                generation.input_tokens,
                generation.output_tokens,
                UsageOutcome::Succeeded,
            ),
            Err(_) => (TokenCount::zero(), TokenCount::zero(), UsageOutcome::Failed),
        };
        let cost = backend.pricing().cost_of(input_tokens, output_tokens);
        self.ledger.commit(
            reservation,
            UsageRecord {
                run,
                backend: backend.name().clone(),
                task_class,
                input_tokens,
                output_tokens,
                cost,
                outcome,
                recorded_at: Timestamp::now(),
            },
        );

        debug!(
            run_id = %run,
            backend = %backend.name(),
            task_class = %task_class,
            input_tokens = %input_tokens,
            output_tokens = %output_tokens,
            cost_usd = cost.as_f64(),
            succeeded = result.is_ok(),
            "Model call finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl Dispatch for ModelRouter {
    async fn dispatch(
        &self,
        run: RunId,
        task_class: TaskClass,
        prompt: Prompt,
    ) -> Result<GeneratedText, DispatchError> {
        let candidates = self.candidates(task_class);
        if candidates.is_empty() {
            return Err(DispatchError::NoRoute { task_class });
        }

        let mut last_failure = None;
        for (position, backend) in candidates.iter().enumerate() {
            let mut retried = false;
            loop {
                match self.attempt(run, task_class, backend.as_ref(), &prompt).await? {
                    Ok(generation) => {
                        if position > 0 {
                            info!(
                                run_id = %run,
                                backend = %backend.name(),
                                task_class = %task_class,
                                "Request served by fallback backend"
                            );
                        }
                        return Ok(GeneratedText {
                            tokens: generation.input_tokens + generation.output_tokens,
                            text: generation.text,
                            backend: backend.name().clone(),
                        });
                    }
                    Err(BackendError::Transient { message, retry_after }) if !retried => {
                        retried = true;
                        let delay = retry_after.map_or(self.retry_backoff, |after| {
                            after.max(self.retry_backoff)
                        });
                        warn!(
                            run_id = %run,
                            backend = %backend.name(),
                            %message,
                            delay_ms = delay.as_millis() as u64,
                            "Transient backend failure; retrying once"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => {
                        warn!(
                            run_id = %run,
                            backend = %backend.name(),
                            task_class = %task_class,
                            error = %error,
                            remaining_candidates = candidates.len() - position - 1,
                            "Backend failed; failing over"
                        );
                        last_failure = Some((backend.name().clone(), error));
                        break;
                    }
                }
            }
        }

        match last_failure {
            Some((backend, source)) => Err(DispatchError::Backend { backend, source }),
            None => Err(DispatchError::NoRoute { task_class }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{BackendName, BudgetCeilings, BudgetScope, DenialReason, Pricing, Remaining};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of results; `Pending` never answers.
    enum Step {
        Reply(&'static str),
        Fail(BackendError),
        Pending,
    }

    struct ScriptedBackend {
        name: BackendName,
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(name: &str, script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                name: BackendName::new(name).unwrap(),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        fn name(&self) -> &BackendName {
            &self.name
        }

        fn pricing(&self) -> Pricing {
            Pricing::new(3.0, 15.0).unwrap()
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<Generation, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(Generation {
                    text: text.to_owned(),
                    input_tokens: TokenCount::new(40),
                    output_tokens: TokenCount::new(60),
                }),
                Some(Step::Fail(err)) => Err(err),
                Some(Step::Pending) => std::future::pending().await,
                None => Err(BackendError::permanent("script exhausted")),
            }
        }
    }

    fn settings() -> RoutingSettings {
        RoutingSettings {
            retry_backoff_ms: 0,
            stage_retry_backoff_ms: 0,
            ..RoutingSettings::default()
        }
    }

    fn router(ceilings: BudgetCeilings, candidates: Vec<Arc<dyn TextBackend>>) -> ModelRouter {
        ModelRouter::new(BudgetLedger::new(ceilings), &settings())
            .with_route(TaskClass::BulkGeneration, candidates)
            .with_call_timeout(Duration::from_millis(50))
    }

    fn prompt() -> Prompt {
        Prompt::new("system", "write three posts", 200)
    }

    #[tokio::test]
    async fn primary_timeout_fails_over_with_two_usage_records() {
        let primary = ScriptedBackend::new("primary", vec![Step::Pending, Step::Pending]);
        let secondary = ScriptedBackend::new("secondary", vec![Step::Reply("from secondary")]);
        let router = router(
            BudgetCeilings::default(),
            vec![primary.clone(), secondary.clone()],
        );
        let run = RunId::new_random();

        let out = router
            .dispatch(run, TaskClass::BulkGeneration, prompt())
            .await
            .unwrap();

        assert_eq!(out.text, "from secondary");
        assert_eq!(out.backend.as_str(), "secondary");
        assert_eq!(primary.calls(), 1);
        let records = router.ledger().records_for(run);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, UsageOutcome::Failed);
        assert!(records[0].total_tokens().is_zero());
        assert_eq!(records[1].outcome, UsageOutcome::Succeeded);
        assert_eq!(records[1].total_tokens(), TokenCount::new(100));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_on_the_same_backend() {
        let primary = ScriptedBackend::new(
            "primary",
            vec![Step::Fail(BackendError::transient("overloaded")), Step::Reply("ok")],
        );
        let secondary = ScriptedBackend::new("secondary", vec![]);
        let router = router(
            BudgetCeilings::default(),
            vec![primary.clone(), secondary.clone()],
        );

        let out = router
            .dispatch(RunId::new_random(), TaskClass::BulkGeneration, prompt())
            .await
            .unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_fails_over_without_retry() {
        let primary = ScriptedBackend::new(
            "primary",
            vec![Step::Fail(BackendError::permanent("invalid key"))],
        );
        let secondary = ScriptedBackend::new("secondary", vec![Step::Reply("ok")]);
        let router = router(
            BudgetCeilings::default(),
            vec![primary.clone(), secondary.clone()],
        );
        router
            .dispatch(RunId::new_random(), TaskClass::BulkGeneration, prompt())
            .await
            .unwrap();
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn last_candidate_error_surfaces() {
        let primary = ScriptedBackend::new(
            "primary",
            vec![Step::Fail(BackendError::permanent("invalid key"))],
        );
        let secondary = ScriptedBackend::new(
            "secondary",
            vec![
                Step::Fail(BackendError::transient("overloaded")),
                Step::Fail(BackendError::transient("still overloaded")),
            ],
        );
        let router = router(BudgetCeilings::default(), vec![primary, secondary.clone()]);
        let err = router
            .dispatch(RunId::new_random(), TaskClass::BulkGeneration, prompt())
            .await
            .unwrap_err();
        match err {
            DispatchError::Backend { backend, source } => {
                assert_eq!(backend.as_str(), "secondary");
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(secondary.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_episode_is_refused_before_any_backend_call() {
        let primary = ScriptedBackend::new("primary", vec![Step::Reply("unused")]);
        let router = router(
            BudgetCeilings {
                episode_tokens: TokenCount::new(100),
                ..BudgetCeilings::default()
            },
            vec![primary.clone()],
        );
        let run = RunId::new_random();
        // Spend the whole episode ceiling.
        let hold = router
            .ledger()
            .reserve(
                run,
                TaskClass::Reasoning,
                Estimate {
                    tokens: TokenCount::new(100),
                    cost: pipeline::TokenCost::zero(),
                },
            )
            .unwrap();
        assert_eq!(
            router.ledger().remaining(BudgetScope::Episode(run)),
            Remaining::Tokens(TokenCount::zero())
        );

        let err = router
            .dispatch(run, TaskClass::BulkGeneration, prompt())
            .await
            .unwrap_err();
        match err {
            DispatchError::BudgetExceeded(denial) => {
                assert_eq!(denial.reason, DenialReason::EpisodeLimit)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(primary.calls(), 0);
        assert!(router.ledger().records_for(run).is_empty());
        drop(hold);
    }

    #[tokio::test]
    async fn unrouted_task_class_is_reported() {
        let router = router(BudgetCeilings::default(), vec![]);
        let err = router
            .dispatch(RunId::new_random(), TaskClass::Reasoning, prompt())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoRoute {
                task_class: TaskClass::Reasoning
            }
        );
    }

    #[test]
    fn estimate_counts_prompt_bytes_plus_completion_budget() {
        let backend = ScriptedBackend::new("primary", vec![]);
        let router = router(BudgetCeilings::default(), vec![]);
        // "system" + "write three posts" = 23 bytes, plus 200.
        assert_eq!(router.estimate(&prompt(), backend.as_ref()).tokens, TokenCount::new(223));

        // Three bytes per character.
        let dense = Prompt::new("", "資金調達".repeat(10), 100);
        assert_eq!(router.estimate(&dense, backend.as_ref()).tokens, TokenCount::new(220));
    }

    /// Bills exactly the prompt's bytes and the full completion budget.
    struct MaximalBackend {
        name: BackendName,
    }

    #[async_trait]
    impl TextBackend for MaximalBackend {
        fn name(&self) -> &BackendName {
            &self.name
        }

        fn pricing(&self) -> Pricing {
            Pricing::free()
        }

        async fn generate(&self, prompt: &Prompt) -> Result<Generation, BackendError> {
            Ok(Generation {
                text: "ok".into(),
                input_tokens: TokenCount::new(prompt.byte_len() as u64),
                output_tokens: TokenCount::new(prompt.max_tokens),
            })
        }
    }

    #[tokio::test]
    async fn dense_prompt_billed_in_full_stays_within_the_episode_ceiling() {
        let dense = Prompt::new("", "資".repeat(300), 100);
        let ceiling = dense.byte_len() as u64 + 100;
        let backend: Arc<dyn TextBackend> = Arc::new(MaximalBackend {
            name: BackendName::new("dense").unwrap(),
        });
        let router = router(
            BudgetCeilings {
                episode_tokens: TokenCount::new(ceiling),
                ..BudgetCeilings::default()
            },
            vec![backend],
        );
        let run = RunId::new_random();

        router
            .dispatch(run, TaskClass::BulkGeneration, dense.clone())
            .await
            .unwrap();
        assert_eq!(router.ledger().usage_for(run).tokens, TokenCount::new(ceiling));

        let err = router
            .dispatch(run, TaskClass::BulkGeneration, dense)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BudgetExceeded(_)));
        assert_eq!(router.ledger().usage_for(run).tokens, TokenCount::new(ceiling));
    }

    #[tokio::test]
    async fn calls_beyond_the_rate_limit_wait_for_the_window() {
        let backend = ScriptedBackend::new(
            "primary",
            vec![Step::Reply("1"), Step::Reply("2"), Step::Reply("3")],
        );
        let router = router(BudgetCeilings::default(), vec![backend.clone()])
            .with_rate_limit(2, Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        for _ in 0..3 {
            router
                .dispatch(RunId::new_random(), TaskClass::BulkGeneration, prompt())
                .await
                .unwrap();
        }

        assert_eq!(backend.calls(), 3);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}

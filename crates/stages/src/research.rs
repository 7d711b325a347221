//! Insights → research findings.
//!
//! Each insight gets one `reasoning` lookup, steered by an angle chosen from
//! its kind. Lookups for different insights run concurrently up to
//! `max_concurrent_lookups`; findings come back in insight order.
//!
//! A lookup whose answer cannot be parsed contributes no findings. Dispatch
//! failures (budget, exhausted backends) fail the stage.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use pipeline::{
    Dispatch, FindingId, Insight, InsightKind, Prompt, Reliability, ResearchFinding,
    ResearchSettings, RunId, Stage, StageError, StageKind, TaskClass,
};

use crate::json;

const SYSTEM_PROMPT: &str = "You are a research analyst for a business podcast. \
You find credible evidence, data points and examples for business claims and rate \
how credible each source is. Answer with JSON only.";

/// What a lookup should look for, by insight kind.
pub fn research_angle(kind: InsightKind) -> &'static str {
    match kind {
        InsightKind::ContrarianTake => "supporting evidence",
        InsightKind::Framework => "implementation examples",
        InsightKind::CaseStudy => "similar cases",
        InsightKind::TacticalTip => "general research",
    }
}

/// Gathers evidence for each insight.
pub struct ResearchStage {
    router: Arc<dyn Dispatch>,
    settings: ResearchSettings,
}

impl ResearchStage {
    /// Creates the stage.
    pub fn new(router: Arc<dyn Dispatch>, settings: ResearchSettings) -> Self {
        Self { router, settings }
    }

    fn prompt(&self, insight: &Insight) -> Prompt {
        let angle = research_angle(insight.kind);
        let mut user = format!(
            "Research the following insight, looking for {angle}.\n\n\
             Title: {title}\nInsight: {text}\n",
            title = insight.title,
            text = insight.text,
        );
        if !insight.key_terms.is_empty() {
            user.push_str(&format!("Key terms: {}\n", insight.key_terms.join(", ")));
        }
        if let Some(angle) = &insight.contrarian_angle {
            user.push_str(&format!("Conventional wisdom it challenges: {angle}\n"));
        }
        user.push_str(
            "\nReturn a JSON array of findings. Each element must have \"source\" (where the \
             evidence comes from), \"excerpt\" (the relevant fact or example) and \
             \"credibility\" (0 to 1).",
        );
        Prompt::new(SYSTEM_PROMPT, user, self.settings.max_output_tokens)
    }

    async fn lookup(&self, run: RunId, insight: &Insight) -> Result<Vec<ResearchFinding>, StageError> {
        let reply = self
            .router
            .dispatch(run, TaskClass::Reasoning, self.prompt(insight))
            .await?;

        let Some(entries) = json::array(&reply.text) else {
            warn!(
                run_id = %run,
                insight_id = %insight.id,
                "Research response unparseable; no findings for this insight"
            );
            return Ok(Vec::new());
        };

        let findings: Vec<_> = entries
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|map| {
                let source = json::text_field(map, &["source", "source_description"])?;
                let excerpt = json::text_field(map, &["excerpt", "finding", "summary"])?;
                let credibility = json::number_field(map, "credibility")
                    .or_else(|| json::number_field(map, "credibility_score"))
                    .unwrap_or(0.0);
                (credibility >= self.settings.credibility_threshold).then(|| ResearchFinding {
                    id: FindingId::new_random(),
                    insight: insight.id,
                    source,
                    excerpt,
                    reliability: Reliability::from_credibility(credibility),
                })
            })
            .take(self.settings.max_findings_per_insight)
            .collect();

        debug!(
            run_id = %run,
            insight_id = %insight.id,
            angle = research_angle(insight.kind),
            candidates = entries.len(),
            kept = findings.len(),
            "Research lookup finished"
        );
        Ok(findings)
    }
}

#[async_trait]
impl Stage for ResearchStage {
    type Input = Vec<Insight>;
    type Output = Vec<ResearchFinding>;

    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn run(&self, run: RunId, insights: &Vec<Insight>) -> Result<Vec<ResearchFinding>, StageError> {
        let lookups: Vec<_> = insights
            .iter()
            .map(|insight| self.lookup(run, insight))
            .collect();
        let per_insight: Vec<Vec<ResearchFinding>> = futures::stream::iter(lookups)
            .buffered(self.settings.max_concurrent_lookups.max(1))
            .try_collect()
            .await?;
        Ok(per_insight.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRouter;
    use pipeline::{
        BackendName, BudgetDenial, DenialReason, DispatchError, GeneratedText, PriorityScore,
        SupportingQuote, TokenCount, TranscriptId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn insight(kind: InsightKind, title: &str) -> Insight {
        Insight {
            id: pipeline::InsightId::new_random(),
            run: RunId::new_random(),
            transcript: TranscriptId::new("ep-1").unwrap(),
            title: title.to_owned(),
            kind,
            text: "Raising later keeps leverage.".into(),
            quote: SupportingQuote { text: String::new(), span: None },
            priority: PriorityScore::clamped(0.8),
            key_terms: vec!["fundraising".into()],
            contrarian_angle: None,
        }
    }

    #[tokio::test]
    async fn findings_are_filtered_capped_and_kept_in_insight_order() {
        let first = r#"[
            {"source": "Survey A", "excerpt": "62% of founders", "credibility": 0.9},
            {"source": "Blog", "excerpt": "anecdote", "credibility": 0.4},
            {"source": "Report B", "excerpt": "3x growth", "credibility": 0.75},
            {"source": "Study C", "excerpt": "n=400", "credibility": 0.8},
            {"source": "Paper D", "excerpt": "meta-analysis", "credibility": 0.95}
        ]"#;
        let second = r#"{"findings": [{"source": "Case E", "excerpt": "bootstrapped", "credibility_score": 0.7}]}"#;
        let router = ScriptedRouter::sequence(vec![Ok(first.into()), Ok(second.into())]);
        let stage = ResearchStage::new(
            router.clone(),
            ResearchSettings {
                max_concurrent_lookups: 1,
                ..ResearchSettings::default()
            },
        );
        let insights = vec![
            insight(InsightKind::ContrarianTake, "one"),
            insight(InsightKind::CaseStudy, "two"),
        ];

        let findings = stage.run(RunId::new_random(), &insights).await.unwrap();

        let sources: Vec<_> = findings.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(sources, ["Survey A", "Report B", "Study C", "Case E"]);
        assert!(findings[..3].iter().all(|f| f.insight == insights[0].id));
        assert_eq!(findings[3].insight, insights[1].id);
        assert_eq!(findings[0].reliability, Reliability::High);
        assert_eq!(findings[1].reliability, Reliability::Medium);

        let prompts = router.prompts();
        assert!(prompts[0].1.user.contains("supporting evidence"));
        assert!(prompts[1].1.user.contains("similar cases"));
    }

    #[tokio::test]
    async fn malformed_lookup_yields_no_findings_for_that_insight() {
        let router = ScriptedRouter::always("Sorry, I could not research this.");
        let stage = ResearchStage::new(router, ResearchSettings::default());
        let insights = vec![insight(InsightKind::Framework, "one")];
        assert!(stage.run(RunId::new_random(), &insights).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn budget_refusal_fails_the_stage() {
        let denial = BudgetDenial {
            reason: DenialReason::DailyLimit,
            requested: TokenCount::new(2_000),
            detail: "daily 50000/50000 tokens".into(),
        };
        let router = ScriptedRouter::sequence(vec![
            Ok("[]".into()),
            Err(DispatchError::BudgetExceeded(denial.clone())),
        ]);
        let stage = ResearchStage::new(
            router,
            ResearchSettings {
                max_concurrent_lookups: 1,
                ..ResearchSettings::default()
            },
        );
        let insights = vec![
            insight(InsightKind::TacticalTip, "one"),
            insight(InsightKind::TacticalTip, "two"),
        ];
        let err = stage.run(RunId::new_random(), &insights).await.unwrap_err();
        assert_eq!(err.budget_denial(), Some(&denial));
    }

    /// Answers every lookup after a short delay, tracking how many are in
    /// flight at once.
    #[derive(Default)]
    struct PeakRouter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Dispatch for PeakRouter {
        async fn dispatch(
            &self,
            _run: RunId,
            _task_class: TaskClass,
            _prompt: Prompt,
        ) -> Result<GeneratedText, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(GeneratedText {
                text: "[]".into(),
                backend: BackendName::new("peak").unwrap(),
                tokens: TokenCount::new(10),
            })
        }
    }

    #[tokio::test]
    async fn lookups_never_exceed_the_concurrency_cap() {
        let router = Arc::new(PeakRouter::default());
        let stage = ResearchStage::new(
            router.clone(),
            ResearchSettings {
                max_concurrent_lookups: 2,
                ..ResearchSettings::default()
            },
        );
        let insights: Vec<_> = (0..6)
            .map(|i| insight(InsightKind::Framework, &format!("insight {i}")))
            .collect();

        stage.run(RunId::new_random(), &insights).await.unwrap();

        assert_eq!(router.calls.load(Ordering::SeqCst), 6);
        assert_eq!(router.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_insights_means_no_lookups() {
        let router = ScriptedRouter::sequence(vec![]);
        let stage = ResearchStage::new(router.clone(), ResearchSettings::default());
        assert!(stage.run(RunId::new_random(), &Vec::new()).await.unwrap().is_empty());
        assert!(router.prompts().is_empty());
    }
}

//! Pending content items → approved or rejected.
//!
//! Structural checks run first and reject without a model call: a blank
//! body, any post over the length limit, or a thread outside the allowed
//! post count. Items that pass are scored for brand voice by one `reasoning`
//! request each.
//!
//! Items already decided are passed through untouched, so validating the same
//! items twice changes nothing and dispatches nothing.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use pipeline::{
    BrandVoiceScore, ContentBody, ContentItem, ContentKind, ContentSettings, Dispatch, Prompt,
    RunId, Stage, StageError, StageKind, TaskClass, ValidationSettings,
};

use crate::json;

const SYSTEM_PROMPT: &str = "You are the brand editor for a business podcast. The brand \
voice is direct, contrarian where the evidence supports it, framework-driven, data-backed \
and practical for small-business owners. Answer with JSON only.";

const CONTRARIAN_PHRASES: [&str; 3] = ["most smes are wrong", "unpopular opinion", "conventional wisdom"];

static CONCRETE_NUMBERS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+%|\$\d+|\d+x").ok());

/// Scores and decides pending content items.
pub struct ValidationStage {
    router: Arc<dyn Dispatch>,
    settings: ValidationSettings,
    limits: ContentSettings,
}

/// How one item was scored.
#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    score: f64,
    rejected_by_reviewer: bool,
    issues: Vec<String>,
}

impl ValidationStage {
    /// Creates the stage. `limits` supplies the post length and thread size
    /// the structural checks enforce.
    pub fn new(router: Arc<dyn Dispatch>, settings: ValidationSettings, limits: ContentSettings) -> Self {
        Self {
            router,
            settings,
            limits,
        }
    }

    /// Why `body` fails the structural checks, if it does.
    fn structural_problem(&self, kind: ContentKind, body: &ContentBody) -> Option<String> {
        if body.is_blank() {
            return Some("empty body".to_owned());
        }
        let max = self.limits.max_post_length;
        if let Some((index, post)) = body
            .posts()
            .into_iter()
            .enumerate()
            .find(|(_, post)| post.chars().count() > max)
        {
            return Some(format!(
                "post {} is {} characters, limit {max}",
                index + 1,
                post.chars().count()
            ));
        }
        if kind == ContentKind::Thread {
            let posts = body.posts().len();
            let (min, max) = (self.limits.thread_min_posts, self.limits.thread_max_posts);
            if posts < min || posts > max {
                return Some(format!("thread has {posts} posts, expected {min}-{max}"));
            }
        }
        None
    }

    fn prompt(&self, item: &ContentItem) -> Prompt {
        let user = format!(
            "Evaluate this {kind} against the brand voice.\n\n{body}\n\n\
             Return a JSON object with \"brand_voice_score\" (0 to 1), \
             \"approval_recommendation\" (\"approved\", \"needs_revision\" or \"rejected\") \
             and \"issues\" (list of strings).",
            kind = item.kind().as_str().replace('_', " "),
            body = item.body().joined(),
        );
        Prompt::new(SYSTEM_PROMPT, user, self.settings.max_output_tokens)
    }

    /// Fallback score when the reviewer's answer is unusable: neutral, plus
    /// credit for contrarian phrasing, concrete numbers, and posts within the
    /// length limit.
    fn heuristic_score(&self, body: &ContentBody) -> f64 {
        let text = body.joined();
        let lowered = text.to_lowercase();
        let mut score = 0.5;
        if CONTRARIAN_PHRASES.iter().any(|p| lowered.contains(p)) {
            score += 0.2;
        }
        if CONCRETE_NUMBERS
            .as_ref()
            .is_some_and(|re| re.is_match(&text))
        {
            score += 0.1;
        }
        if body
            .posts()
            .iter()
            .all(|p| p.chars().count() <= self.limits.max_post_length)
        {
            score += 0.1;
        }
        f64::min(score, 1.0)
    }

    async fn review(&self, run: RunId, item: &ContentItem) -> Result<Verdict, StageError> {
        let reply = self
            .router
            .dispatch(run, TaskClass::Reasoning, self.prompt(item))
            .await?;

        let parsed = json::object(&reply.text).and_then(|map| {
            let score = json::number_field(&map, "brand_voice_score")
                .or_else(|| json::number_field(&map, "score"))?;
            let recommendation = json::text_field(&map, &["approval_recommendation", "recommendation"]);
            Some(Verdict {
                score: score.clamp(0.0, 1.0),
                rejected_by_reviewer: recommendation
                    .is_some_and(|r| r.eq_ignore_ascii_case("rejected")),
                issues: json::string_list(&map, "issues"),
            })
        });

        Ok(parsed.unwrap_or_else(|| {
            warn!(
                run_id = %run,
                content_id = %item.id(),
                "Validation response unparseable; using heuristic score"
            );
            Verdict {
                score: self.heuristic_score(item.body()),
                rejected_by_reviewer: false,
                issues: Vec::new(),
            }
        }))
    }

    async fn decide(&self, run: RunId, item: &mut ContentItem) -> Result<(), StageError> {
        let transition = if let Some(problem) = self.structural_problem(item.kind(), item.body()) {
            debug!(content_id = %item.id(), %problem, "Rejected on structure");
            item.reject(problem, None)
        } else {
            let verdict = self.review(run, item).await?;
            let score = BrandVoiceScore::new(verdict.score);
            let threshold = self.settings.brand_voice_threshold;
            if verdict.rejected_by_reviewer {
                item.reject(reviewer_reason("reviewer recommended rejection", &verdict.issues), score)
            } else if verdict.score < threshold {
                item.reject(
                    reviewer_reason(
                        &format!("brand voice score {:.2} below {threshold:.2}", verdict.score),
                        &verdict.issues,
                    ),
                    score,
                )
            } else {
                item.approve(score)
            }
        };
        // Only pending items reach here, and both transitions start from pending.
        if let Err(err) = transition {
            warn!(content_id = %item.id(), error = %err, "Validation transition refused");
        }
        Ok(())
    }
}

impl ValidationStage {
    /// Decides every pending item in place, in order. Items already decided
    /// are left alone, so after an error the decided prefix survives and a
    /// second call only reviews what is still pending.
    pub async fn decide_all(&self, run: RunId, items: &mut [ContentItem]) -> Result<(), StageError> {
        for item in items.iter_mut().filter(|i| !i.is_validated()) {
            self.decide(run, item).await?;
        }
        Ok(())
    }
}

fn reviewer_reason(summary: &str, issues: &[String]) -> String {
    if issues.is_empty() {
        summary.to_owned()
    } else {
        format!("{summary}: {}", issues.join("; "))
    }
}

#[async_trait]
impl Stage for ValidationStage {
    type Input = Vec<ContentItem>;
    type Output = Vec<ContentItem>;

    fn kind(&self) -> StageKind {
        StageKind::Validation
    }

    async fn run(&self, run: RunId, items: &Vec<ContentItem>) -> Result<Vec<ContentItem>, StageError> {
        let mut decided = items.clone();
        self.decide_all(run, &mut decided).await?;
        Ok(decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRouter;
    use pipeline::{ContentStatus, DispatchError, InsightId};

    fn stage(router: Arc<ScriptedRouter>) -> ValidationStage {
        ValidationStage::new(router, ValidationSettings::default(), ContentSettings::default())
    }

    fn single(text: &str) -> ContentItem {
        ContentItem::pending(
            RunId::new_random(),
            InsightId::new_random(),
            ContentKind::SinglePost,
            ContentBody::Single(text.to_owned()),
        )
    }

    fn thread(posts: usize) -> ContentItem {
        ContentItem::pending(
            RunId::new_random(),
            InsightId::new_random(),
            ContentKind::Thread,
            ContentBody::Thread((1..=posts).map(|i| format!("{i}/ point")).collect()),
        )
    }

    #[tokio::test]
    async fn structural_failures_are_rejected_without_a_model_call() {
        let router = ScriptedRouter::sequence(vec![]);
        let items = vec![single("   "), single(&"x".repeat(281)), thread(4), thread(8)];

        let out = stage(router.clone()).run(RunId::new_random(), &items).await.unwrap();

        assert!(out.iter().all(|i| matches!(i.status(), ContentStatus::Rejected { .. })));
        assert!(router.prompts().is_empty());
        match out[2].status() {
            ContentStatus::Rejected { reason } => assert_eq!(reason, "thread has 4 posts, expected 5-7"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn reviewer_score_and_recommendation_decide_approval() {
        let router = ScriptedRouter::sequence(vec![
            Ok(r#"{"brand_voice_score": 0.85, "approval_recommendation": "approved"}"#.into()),
            Ok(r#"{"brand_voice_score": 0.9, "approval_recommendation": "rejected", "issues": ["off-brand"]}"#.into()),
            Ok(r#"{"brand_voice_score": 0.6, "approval_recommendation": "needs_revision"}"#.into()),
        ]);
        let items = vec![single("a"), single("b"), thread(5)];

        let out = stage(router.clone()).run(RunId::new_random(), &items).await.unwrap();

        assert!(out[0].is_approved());
        assert_eq!(out[0].brand_voice().map(BrandVoiceScore::as_f64), Some(0.85));
        assert_eq!(
            out[1].status(),
            &ContentStatus::Rejected {
                reason: "reviewer recommended rejection: off-brand".into()
            }
        );
        assert_eq!(
            out[2].status(),
            &ContentStatus::Rejected {
                reason: "brand voice score 0.60 below 0.80".into()
            }
        );
        assert!(router.prompts().iter().all(|(class, _)| *class == TaskClass::Reasoning));
    }

    #[tokio::test]
    async fn unparseable_review_falls_back_to_heuristic() {
        // Contrarian phrasing + a number + within length: 0.5 + 0.2 + 0.1 + 0.1.
        let router = ScriptedRouter::always("Looks great to me!");
        let items = vec![
            single("Unpopular opinion: 80% of SMEs should never raise."),
            single("Keep going."),
        ];
        let out = stage(router).run(RunId::new_random(), &items).await.unwrap();
        assert!(out[0].is_approved());
        assert!((out[0].brand_voice().unwrap().as_f64() - 0.9).abs() < 1e-9);
        assert!(matches!(out[1].status(), ContentStatus::Rejected { .. }));
    }

    #[tokio::test]
    async fn non_finite_reviewer_score_falls_back_to_heuristic() {
        let router = ScriptedRouter::always(
            r#"{"brand_voice_score": "NaN", "approval_recommendation": "needs_revision"}"#,
        );
        let out = stage(router)
            .run(RunId::new_random(), &vec![single("Keep going.")])
            .await
            .unwrap();

        // Neutral plus within length: 0.5 + 0.1, below the 0.8 threshold.
        assert!(matches!(out[0].status(), ContentStatus::Rejected { .. }));
        let score = out[0].brand_voice().unwrap().as_f64();
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_review_keeps_earlier_decisions_and_resumes_after_them() {
        let approve = || Ok(r#"{"brand_voice_score": 0.9}"#.to_owned());
        let router = ScriptedRouter::sequence(vec![
            approve(),
            approve(),
            Err(DispatchError::NoRoute {
                task_class: TaskClass::Reasoning,
            }),
            approve(),
            approve(),
        ]);
        let validation = stage(router.clone());
        let run = RunId::new_random();
        let mut items = vec![single("a"), single("b"), single("c"), single("d")];

        assert!(validation.decide_all(run, &mut items).await.is_err());
        assert!(items[..2].iter().all(ContentItem::is_approved));
        assert!(items[2..].iter().all(|i| !i.is_validated()));

        validation.decide_all(run, &mut items).await.unwrap();
        assert!(items.iter().all(ContentItem::is_approved));
        assert_eq!(router.prompts().len(), 5);
    }

    #[tokio::test]
    async fn revalidation_is_a_no_op() {
        let router = ScriptedRouter::always(r#"{"brand_voice_score": 0.95}"#);
        let validation = stage(router.clone());
        let run = RunId::new_random();

        let first = validation.run(run, &vec![single("a"), single("")]).await.unwrap();
        let calls = router.prompts().len();
        let second = validation.run(run, &first).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(router.prompts().len(), calls);
        assert_eq!(calls, 1);
    }
}

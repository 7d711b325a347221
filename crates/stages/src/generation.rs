//! Insights and findings → pending content items.
//!
//! Each insight gets one `bulk_generation` request asking for the pieces the
//! configured content mix allocates to it. Pieces the backend returns beyond
//! that allocation are discarded; an unparseable answer yields no pieces for
//! that insight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use pipeline::{
    ContentBody, ContentItem, ContentKind, ContentSettings, Dispatch, Insight, Prompt,
    ResearchFinding, RunId, Stage, StageError, StageKind, TaskClass,
};

use crate::json;

const SYSTEM_PROMPT: &str = "You write social content for a business podcast: sharp, \
specific, backed by numbers and examples, never generic. Answer with JSON only.";

/// What generation works from.
#[derive(Debug, Clone, Default)]
pub struct GenerationInput {
    /// Qualified insights, highest priority first.
    pub insights: Vec<Insight>,
    /// Findings for those insights; may be empty.
    pub findings: Vec<ResearchFinding>,
}

/// Writes content items for each insight.
pub struct GenerationStage {
    router: Arc<dyn Dispatch>,
    settings: ContentSettings,
}

impl GenerationStage {
    /// Creates the stage.
    pub fn new(router: Arc<dyn Dispatch>, settings: ContentSettings) -> Self {
        Self { router, settings }
    }

    fn prompt(
        &self,
        insight: &Insight,
        findings: &[&ResearchFinding],
        allocation: &[(ContentKind, usize)],
    ) -> Prompt {
        let mut user = format!(
            "Write social content for this insight.\n\nTitle: {}\nKind: {}\nInsight: {}\n",
            insight.title,
            insight.kind.as_str(),
            insight.text,
        );
        if !insight.quote.text.is_empty() {
            user.push_str(&format!("Quote from the episode: \"{}\"\n", insight.quote.text));
        }
        if let Some(angle) = &insight.contrarian_angle {
            user.push_str(&format!("Contrarian angle: {angle}\n"));
        }
        if !findings.is_empty() {
            user.push_str("\nResearch:\n");
            for finding in findings {
                user.push_str(&format!("- {} ({})\n", finding.excerpt, finding.source));
            }
        }

        user.push_str("\nProduce exactly:\n");
        for (kind, count) in allocation {
            let shape = match kind {
                ContentKind::Thread => format!(
                    "thread(s) of {}-{} posts",
                    self.settings.thread_min_posts, self.settings.thread_max_posts
                ),
                ContentKind::SinglePost => "single post(s)".to_owned(),
                ContentKind::QuotePost => "quote post(s) built around the episode quote".to_owned(),
            };
            user.push_str(&format!("- {count} {shape}\n"));
        }
        user.push_str(&format!(
            "\nEvery post must be at most {} characters. Return a JSON array; each element has \
             \"kind\" (\"thread\", \"single_post\" or \"quote_post\") and either \"posts\" \
             (list of strings, threads) or \"text\" (single and quote posts).",
            self.settings.max_post_length
        ));
        Prompt::new(SYSTEM_PROMPT, user, self.settings.max_output_tokens)
    }

    async fn generate_for(
        &self,
        run: RunId,
        insight: &Insight,
        findings: &[&ResearchFinding],
    ) -> Result<Vec<ContentItem>, StageError> {
        let allocation: Vec<_> = self
            .settings
            .mix
            .allocate(self.settings.pieces_per_insight)
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        if allocation.is_empty() {
            return Ok(Vec::new());
        }

        let reply = self
            .router
            .dispatch(
                run,
                TaskClass::BulkGeneration,
                self.prompt(insight, findings, &allocation),
            )
            .await?;

        let Some(entries) = json::array(&reply.text) else {
            warn!(
                run_id = %run,
                insight_id = %insight.id,
                "Generation response unparseable; no content for this insight"
            );
            return Ok(Vec::new());
        };

        let mut quota: HashMap<ContentKind, usize> = allocation.into_iter().collect();
        let mut items = Vec::new();
        let mut discarded = 0usize;
        for (kind, body) in entries.iter().filter_map(Value::as_object).filter_map(parse_piece) {
            match quota.get_mut(&kind) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    items.push(ContentItem::pending(run, insight.id, kind, body));
                }
                _ => discarded += 1,
            }
        }

        debug!(
            run_id = %run,
            insight_id = %insight.id,
            generated = items.len(),
            discarded,
            "Generated content for insight"
        );
        Ok(items)
    }
}

#[async_trait]
impl Stage for GenerationStage {
    type Input = GenerationInput;
    type Output = Vec<ContentItem>;

    fn kind(&self) -> StageKind {
        StageKind::Generation
    }

    async fn run(&self, run: RunId, input: &GenerationInput) -> Result<Vec<ContentItem>, StageError> {
        let mut items = Vec::new();
        for insight in &input.insights {
            let findings: Vec<&ResearchFinding> = input
                .findings
                .iter()
                .filter(|f| f.insight == insight.id)
                .collect();
            items.extend(self.generate_for(run, insight, &findings).await?);
        }
        Ok(items)
    }
}

fn parse_piece(map: &Map<String, Value>) -> Option<(ContentKind, ContentBody)> {
    let label = json::text_field(map, &["kind", "type", "format"])?;
    let Some(kind) = ContentKind::parse(&label) else {
        warn!(kind = %label, "Skipping generated piece of unknown kind");
        return None;
    };
    let posts = json::string_list(map, "posts");
    let text = json::text_field(map, &["text", "content"]);

    let body = match kind {
        ContentKind::Thread if !posts.is_empty() => ContentBody::Thread(posts),
        ContentKind::Thread => ContentBody::Thread(
            text?
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
        ContentKind::SinglePost | ContentKind::QuotePost => match text {
            Some(text) => ContentBody::Single(text),
            None if !posts.is_empty() => ContentBody::Single(posts.join("\n\n")),
            None => return None,
        },
    };
    Some((kind, body))
}

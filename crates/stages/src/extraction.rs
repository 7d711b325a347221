//! Transcript → insights.
//!
//! One `reasoning` request asks the backend for a JSON list of insights. The
//! list is then qualified locally: entries missing a title, kind or text are
//! skipped, unscored entries get a heuristic priority, and only the highest
//! priority insights above the configured floor are carried forward.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use pipeline::{
    Dispatch, ExtractionSettings, Insight, InsightId, InsightKind, PriorityScore, Prompt, RunId,
    Stage, StageError, StageKind, SupportingQuote, TaskClass, Transcript,
};

use crate::json;

const SYSTEM_PROMPT: &str = "You are the chief marketing officer for a business podcast. \
You read episode transcripts and pull out the claims that will make compelling, \
credible social content. Answer with JSON only.";

/// Extracts prioritised insights from a transcript.
pub struct ExtractionStage {
    router: Arc<dyn Dispatch>,
    settings: ExtractionSettings,
}

impl ExtractionStage {
    /// Creates the stage.
    pub fn new(router: Arc<dyn Dispatch>, settings: ExtractionSettings) -> Self {
        Self { router, settings }
    }

    fn prompt(&self, transcript: &Transcript) -> Prompt {
        let user = format!(
            "Extract the most valuable insights from the episode \"{title}\".\n\n\
             Return a JSON array. Each element must have:\n\
             - \"title\": a short headline\n\
             - \"kind\": one of \"framework\", \"contrarian_take\", \"case_study\", \"tactical_tip\"\n\
             - \"text\": the insight in two or three sentences\n\
             - \"quote\": the verbatim transcript passage supporting it\n\
             - \"priority\": content potential between 0 and 1\n\
             - \"key_terms\": a list of search terms\n\
             - \"contrarian_angle\": the conventional wisdom it challenges, or null\n\n\
             Transcript:\n{text}",
            title = transcript
                .metadata()
                .title
                .as_deref()
                .unwrap_or(transcript.id().as_str()),
            text = transcript.text(),
        );
        Prompt::new(SYSTEM_PROMPT, user, self.settings.max_output_tokens)
    }

    /// Filters, sorts and caps parsed insights.
    fn qualify(&self, mut insights: Vec<Insight>) -> Vec<Insight> {
        let before = insights.len();
        insights.retain(|i| i.priority.as_f64() >= self.settings.min_priority);
        insights.sort_by(|a, b| b.priority.as_f64().total_cmp(&a.priority.as_f64()));
        insights.truncate(self.settings.max_insights);
        if insights.len() < before {
            info!(
                parsed = before,
                kept = insights.len(),
                min_priority = self.settings.min_priority,
                "Dropped low-priority insights"
            );
        }
        insights
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    type Input = Transcript;
    type Output = Vec<Insight>;

    fn kind(&self) -> StageKind {
        StageKind::Extraction
    }

    async fn run(&self, run: RunId, transcript: &Transcript) -> Result<Vec<Insight>, StageError> {
        let reply = self
            .router
            .dispatch(run, TaskClass::Reasoning, self.prompt(transcript))
            .await?;

        let entries = json::array(&reply.text).ok_or_else(|| StageError::MalformedOutput {
            stage: StageKind::Extraction,
            message: "response contained no JSON list of insights".into(),
        })?;

        let parsed = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry.as_object() {
                Some(map) => parse_insight(run, transcript, map),
                None => {
                    warn!(index, "Skipping non-object insight entry");
                    None
                }
            })
            .collect();

        Ok(self.qualify(parsed))
    }
}

fn parse_insight(run: RunId, transcript: &Transcript, map: &Map<String, Value>) -> Option<Insight> {
    let title = json::text_field(map, &["title"]);
    let label = json::text_field(map, &["kind", "type"]);
    let text = json::text_field(map, &["text", "content", "insight"]);
    let (Some(title), Some(label), Some(text)) = (title, label, text) else {
        warn!("Skipping insight without title, kind, or text");
        return None;
    };
    let Some(kind) = InsightKind::parse(&label) else {
        warn!(%title, kind = %label, "Skipping insight of unknown kind");
        return None;
    };

    let key_terms = json::string_list(map, "key_terms");
    let contrarian_angle = json::text_field(map, &["contrarian_angle"]);
    let priority = json::number_field(map, "priority")
        .or_else(|| json::number_field(map, "priority_score"))
        .map(PriorityScore::clamped)
        .unwrap_or_else(|| fallback_priority(kind, contrarian_angle.is_some(), key_terms.len()));
    let quote = SupportingQuote::locate(
        json::text_field(map, &["quote", "supporting_quote"]).unwrap_or_default(),
        transcript.text(),
    );

    Some(Insight {
        id: InsightId::new_random(),
        run,
        transcript: transcript.id().clone(),
        title,
        kind,
        text,
        quote,
        priority,
        key_terms,
        contrarian_angle,
    })
}

/// Priority for an insight the backend did not score: frameworks and
/// contrarian framings rank higher, as do insights with enough key terms to
/// research.
fn fallback_priority(kind: InsightKind, has_contrarian_angle: bool, key_terms: usize) -> PriorityScore {
    let mut score = 0.5;
    if kind == InsightKind::Framework {
        score += 0.2;
    }
    if has_contrarian_angle {
        score += 0.2;
    }
    if key_terms >= 3 {
        score += 0.1;
    }
    PriorityScore::clamped(score)
}

//! Run configuration snapshot.
//!
//! A [`PipelineConfig`] is deserialised once by the composition root and
//! cloned into the orchestrator; nothing re-reads configuration mid-run.
//! Defaults reproduce the settings the content pipeline has always shipped
//! with, so an empty configuration file yields a working pipeline.

use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::model::ContentKind;
use crate::{CostBudget, TokenCount};

/// Every tunable of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Spend ceilings.
    pub budget: BudgetCeilings,
    /// Router timeouts and back-off.
    pub routing: RoutingSettings,
    /// Insight extraction.
    pub extraction: ExtractionSettings,
    /// Research lookups.
    pub research: ResearchSettings,
    /// Content generation.
    pub content: ContentSettings,
    /// Content validation.
    pub validation: ValidationSettings,
    /// Publishing schedule.
    pub publishing: PublishingSettings,
}

impl PipelineConfig {
    /// Checks every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.budget.validate()?;
        self.routing.validate()?;
        self.extraction.validate()?;
        self.research.validate()?;
        self.content.validate()?;
        self.validation.validate()?;
        self.publishing.validate()?;
        Ok(())
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), PipelineError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn at_least_one(name: &str, value: u64) -> Result<(), PipelineError> {
    if value == 0 {
        Err(PipelineError::configuration(format!("{name} must be at least 1")))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Ceilings enforced by the budget ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetCeilings {
    /// Tokens one run may consume.
    pub episode_tokens: TokenCount,
    /// Tokens all runs may consume per UTC day.
    pub daily_tokens: TokenCount,
    /// Spend all runs may incur per UTC month (USD).
    pub monthly_budget_usd: CostBudget,
    /// Fraction of the daily or monthly ceiling at which a warning is logged.
    pub warn_ratio: f64,
}

impl Default for BudgetCeilings {
    fn default() -> Self {
        Self {
            episode_tokens: TokenCount::new(25_000),
            daily_tokens: TokenCount::new(50_000),
            monthly_budget_usd: CostBudget::default(),
            warn_ratio: 0.8,
        }
    }
}

impl BudgetCeilings {
    fn validate(&self) -> Result<(), PipelineError> {
        at_least_one("budget.episode_tokens", self.episode_tokens.as_u64())?;
        at_least_one("budget.daily_tokens", self.daily_tokens.as_u64())?;
        unit_interval("budget.warn_ratio", self.warn_ratio)
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Model router behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Hard limit on a single backend call.
    pub call_timeout_secs: u64,
    /// Delay before retrying a transient failure on the same backend, unless
    /// the backend advised a longer one.
    pub retry_backoff_ms: u64,
    /// Delay before the orchestrator re-runs a failed stage.
    pub stage_retry_backoff_ms: u64,
    /// Calls admitted per backend in any 60-second window. `0` disables the
    /// limit.
    pub calls_per_minute: u32,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            retry_backoff_ms: 1_000,
            stage_retry_backoff_ms: 2_000,
            calls_per_minute: 50,
        }
    }
}

impl RoutingSettings {
    /// The per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Back-off before a same-backend retry.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Back-off before a stage retry.
    pub fn stage_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.stage_retry_backoff_ms)
    }

    /// The per-backend rate-limit window, when a limit is set.
    pub fn rate_limit(&self) -> Option<(u32, Duration)> {
        (self.calls_per_minute > 0).then_some((self.calls_per_minute, Duration::from_secs(60)))
    }

    fn validate(&self) -> Result<(), PipelineError> {
        at_least_one("routing.call_timeout_secs", self.call_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Insight extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Insights scoring below this are not carried forward.
    pub min_priority: f64,
    /// Upper bound on insights carried forward per episode.
    pub max_insights: usize,
    /// Completion budget for the extraction call.
    pub max_output_tokens: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_priority: 0.6,
            max_insights: 15,
            max_output_tokens: 3_000,
        }
    }
}

impl ExtractionSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        unit_interval("extraction.min_priority", self.min_priority)?;
        at_least_one("extraction.max_output_tokens", self.max_output_tokens)
    }
}

/// Research lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    /// Lookups for different insights allowed in flight at once.
    pub max_concurrent_lookups: usize,
    /// Findings reported below this credibility are dropped.
    pub credibility_threshold: f64,
    /// Upper bound on findings kept per insight.
    pub max_findings_per_insight: usize,
    /// Completion budget for each lookup.
    pub max_output_tokens: u64,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: 4,
            credibility_threshold: 0.7,
            max_findings_per_insight: 3,
            max_output_tokens: 2_000,
        }
    }
}

impl ResearchSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        at_least_one(
            "research.max_concurrent_lookups",
            self.max_concurrent_lookups as u64,
        )?;
        unit_interval("research.credibility_threshold", self.credibility_threshold)?;
        at_least_one("research.max_output_tokens", self.max_output_tokens)
    }
}

/// Relative share of each content kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentMix {
    /// Share of threads.
    pub threads: f64,
    /// Share of standalone posts.
    pub single_posts: f64,
    /// Share of quote-posts.
    pub quote_posts: f64,
}

impl Default for ContentMix {
    fn default() -> Self {
        Self {
            threads: 0.3,
            single_posts: 0.6,
            quote_posts: 0.1,
        }
    }
}

impl ContentMix {
    /// The configured share for `kind`.
    pub fn ratio(&self, kind: ContentKind) -> f64 {
        match kind {
            ContentKind::Thread => self.threads,
            ContentKind::SinglePost => self.single_posts,
            ContentKind::QuotePost => self.quote_posts,
        }
    }

    /// Splits `pieces` across content kinds in proportion to the mix using the
    /// largest-remainder method. Ties go to the kind listed first in
    /// [`ContentKind::ALL`]. Kinds with a zero share never receive pieces.
    pub fn allocate(&self, pieces: usize) -> Vec<(ContentKind, usize)> {
        let total: f64 = ContentKind::ALL.iter().map(|k| self.ratio(*k)).sum();
        if pieces == 0 || total <= 0.0 {
            return ContentKind::ALL.iter().map(|k| (*k, 0)).collect();
        }

        let quotas: Vec<f64> = ContentKind::ALL
            .iter()
            .map(|k| pieces as f64 * self.ratio(*k) / total)
            .collect();
        let mut counts: Vec<usize> = quotas.iter().map(|q| q.floor() as usize).collect();
        let assigned: usize = counts.iter().sum();

        let mut order: Vec<usize> = (0..quotas.len())
            .filter(|i| self.ratio(ContentKind::ALL[*i]) > 0.0)
            .collect();
        // Remainders are compared at micro-precision so float noise in the
        // shares cannot reorder equal remainders; the sort is stable.
        order.sort_by_key(|i| {
            let fraction = quotas[*i] - quotas[*i].floor();
            std::cmp::Reverse((fraction * 1_000_000.0).round() as i64)
        });
        for i in order.into_iter().take(pieces.saturating_sub(assigned)) {
            counts[i] += 1;
        }

        ContentKind::ALL.iter().copied().zip(counts).collect()
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let ratios = [self.threads, self.single_posts, self.quote_posts];
        if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(PipelineError::configuration(
                "content.mix shares must be non-negative numbers",
            ));
        }
        if ratios.iter().sum::<f64>() <= 0.0 {
            return Err(PipelineError::configuration(
                "content.mix must give at least one content kind a positive share",
            ));
        }
        Ok(())
    }
}

/// Content generation and its structural limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
    /// Share of each content kind.
    pub mix: ContentMix,
    /// Content items requested per insight.
    pub pieces_per_insight: usize,
    /// Maximum characters in a single post (each thread post included).
    pub max_post_length: usize,
    /// Fewest posts a thread may have.
    pub thread_min_posts: usize,
    /// Most posts a thread may have.
    pub thread_max_posts: usize,
    /// Completion budget for each generation call.
    pub max_output_tokens: u64,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            mix: ContentMix::default(),
            pieces_per_insight: 5,
            max_post_length: 280,
            thread_min_posts: 5,
            thread_max_posts: 7,
            max_output_tokens: 2_000,
        }
    }
}

impl ContentSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        self.mix.validate()?;
        at_least_one("content.max_post_length", self.max_post_length as u64)?;
        at_least_one("content.max_output_tokens", self.max_output_tokens)?;
        if self.thread_min_posts < 2 || self.thread_min_posts > self.thread_max_posts {
            return Err(PipelineError::configuration(format!(
                "content.thread_min_posts ({}) must be at least 2 and not exceed thread_max_posts ({})",
                self.thread_min_posts, self.thread_max_posts
            )));
        }
        Ok(())
    }
}

/// Brand-voice validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Minimum brand-voice score for approval.
    pub brand_voice_threshold: f64,
    /// Completion budget for each validation call.
    pub max_output_tokens: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            brand_voice_threshold: 0.8,
            max_output_tokens: 800,
        }
    }
}

impl ValidationSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        unit_interval("validation.brand_voice_threshold", self.brand_voice_threshold)?;
        at_least_one("validation.max_output_tokens", self.max_output_tokens)
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Posting-time preferences for the publishing schedule. Times are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingSettings {
    /// Slots used per day (the first N of `posting_times`).
    pub posts_per_day: usize,
    /// Preferred posting times, `HH:MM`.
    pub posting_times: Vec<String>,
    /// Skip Saturdays and Sundays.
    pub avoid_weekends: bool,
    /// Minimum gap between two threads.
    pub min_thread_spacing_hours: u64,
    /// Days ahead to plan slots for.
    pub horizon_days: u64,
    /// Earliest slot, measured from schedule creation.
    pub lead_time_minutes: u64,
}

impl Default for PublishingSettings {
    fn default() -> Self {
        Self {
            posts_per_day: 3,
            posting_times: vec!["09:00".into(), "14:00".into(), "18:00".into()],
            avoid_weekends: true,
            min_thread_spacing_hours: 48,
            horizon_days: 7,
            lead_time_minutes: 60,
        }
    }
}

impl PublishingSettings {
    /// The first `posts_per_day` posting times, parsed and sorted.
    pub fn daily_slots(&self) -> Result<Vec<NaiveTime>, PipelineError> {
        let mut times = self
            .posting_times
            .iter()
            .take(self.posts_per_day)
            .map(|t| {
                NaiveTime::parse_from_str(t.trim(), "%H:%M").map_err(|e| {
                    PipelineError::configuration(format!(
                        "publishing.posting_times entry '{t}' is not HH:MM: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        times.sort();
        times.dedup();
        Ok(times)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        at_least_one("publishing.posts_per_day", self.posts_per_day as u64)?;
        at_least_one("publishing.horizon_days", self.horizon_days)?;
        if self.daily_slots()?.is_empty() {
            return Err(PipelineError::configuration(
                "publishing.posting_times must list at least one time",
            ));
        }
        Ok(())
    }
}

//! The subcommands.

use std::collections::{HashMap, HashSet};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{error, info, warn};

use pipeline::{
    BudgetLedger, BudgetScope, Remaining, RunOutcome, TaskClass, TextBackend, Timestamp, TranscriptId,
};
use stages::{ModelRouter, Orchestrator, PublishRetry, RunReport};
use store::{DataDir, FsTranscriptSource, JournalSink, RunArchive, UsageJournal};

use crate::config::AppConfig;

/// Episodes listed by `usage`.
const RECENT_EPISODES: usize = 5;

/// A ledger carrying the retained usage history.
async fn seeded_ledger(config: &AppConfig, journal: &UsageJournal) -> Result<BudgetLedger> {
    let ledger = BudgetLedger::new(config.pipeline.budget.clone());
    let history = journal
        .load(Timestamp::now())
        .await
        .context("failed to load usage journal")?;
    ledger.seed(&history);
    Ok(ledger)
}

/// Builds the router, constructing each routed backend once.
fn router(config: &AppConfig, ledger: &BudgetLedger) -> Result<ModelRouter> {
    let timeout = config.pipeline.routing.call_timeout();
    let mut built: HashMap<&str, Arc<dyn TextBackend>> = HashMap::new();
    let mut router = ModelRouter::new(ledger.clone(), &config.pipeline.routing);
    for class in TaskClass::ALL {
        let mut candidates = Vec::new();
        for spec in config.route(class) {
            if let Some(backend) = built.get(spec.name.as_str()) {
                candidates.push(backend.clone());
                continue;
            }
            let key = std::env::var(&spec.api_key_env).unwrap_or_default();
            let backend = spec
                .build(key, timeout)
                .with_context(|| format!("failed to build backend '{}'", spec.name))?;
            built.insert(spec.name.as_str(), backend.clone());
            candidates.push(backend);
        }
        router = router.with_route(class, candidates);
    }
    Ok(router)
}

/// `run`: processes transcripts and records their usage and reports.
pub async fn run(config: &AppConfig, ids: &[String], parallel: usize) -> Result<ExitCode> {
    let data = DataDir::new(&config.data_dir);
    data.ensure().await?;
    let journal = UsageJournal::new(data.usage_journal());
    let archive = RunArchive::new(data.generated());
    let ledger = seeded_ledger(config, &journal).await?;
    let source = FsTranscriptSource::new(data.transcripts());

    let ids = if ids.is_empty() {
        source.list().await?
    } else {
        ids.iter()
            .map(|raw| TranscriptId::new(raw.as_str()).context("transcript id must not be empty"))
            .collect::<Result<Vec<_>>>()?
    };
    if ids.is_empty() {
        warn!(dir = %data.transcripts().display(), "No transcripts to process");
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = Orchestrator::new(
        config.pipeline.clone(),
        ledger.clone(),
        Arc::new(router(config, &ledger)?),
        Arc::new(source),
        Arc::new(JournalSink::new(data.published_journal())),
    )?;
    info!(transcripts = ids.len(), parallel, "Starting batch");

    let mut failures = 0usize;
    for (id, result) in orchestrator.run_batch(&ids, parallel).await {
        match result {
            Ok(report) => {
                let (failed, archived) = persist(&journal, &archive, &report).await;
                if failed {
                    failures += 1;
                }
                println!("{}", run_summary(&report, archived));
            }
            Err(err) => {
                failures += 1;
                error!(transcript_id = %id, error = %err, "Run not started");
                println!(
                    "{}",
                    json!({ "transcript_id": id.as_str(), "status": "not_started", "error": err.to_string() })
                );
            }
        }
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Journals the run's usage and archives its report. Returns whether the run
/// counts as failed, with the archive path when saving worked.
async fn persist(
    journal: &UsageJournal,
    archive: &RunArchive,
    report: &RunReport,
) -> (bool, Option<String>) {
    let id = report.state.transcript();
    let mut failed = !matches!(report.state.outcome(), Some(RunOutcome::Completed));
    if let Err(err) = journal.append(&report.usage).await {
        // Lost usage under-counts the ceilings on the next start.
        failed = true;
        error!(transcript_id = %id, error = %err, "Failed to persist usage");
    }
    let archived = match archive.save(report).await {
        Ok(path) => Some(path.display().to_string()),
        Err(err) => {
            error!(transcript_id = %id, error = %err, "Failed to archive run report");
            None
        }
    };
    (failed, archived)
}

fn run_summary(report: &RunReport, archived: Option<String>) -> serde_json::Value {
    let state = &report.state;
    json!({
        "transcript_id": state.transcript().as_str(),
        "run_id": state.id().to_string(),
        "status": state.stage().as_str(),
        "outcome": state.outcome(),
        "counts": state.counts(),
        "tokens": report.totals.tokens.as_u64(),
        "cost_usd": report.totals.cost.as_f64(),
        "calls": report.totals.calls,
        "report": archived,
    })
}

/// `retry-publishing`: hands every archived `publish_failed` item the
/// journal does not hold yet back to the journal sink at the next free slot.
pub async fn retry_publishing(config: &AppConfig) -> Result<ExitCode> {
    let data = DataDir::new(&config.data_dir);
    let reports = RunArchive::new(data.generated())
        .recent(usize::MAX)
        .await
        .context("failed to read run archive")?;
    let sink = Arc::new(JournalSink::new(data.published_journal()));
    let entries = sink
        .entries()
        .await
        .context("failed to read publishing journal")?;
    let accepted: HashSet<_> = entries.iter().map(|e| e.content_id).collect();
    let taken: HashSet<_> = entries.iter().map(|e| e.publish_at).collect();

    let items: Vec<_> = reports.into_iter().flat_map(|r| r.items).collect();
    let summary = PublishRetry::new(&config.pipeline.publishing, sink)?
        .retry(&items, &accepted, &taken, Timestamp::now())
        .await;

    println!(
        "{}",
        json!({
            "retried": summary.results.len(),
            "published": summary.published(),
            "still_failed": summary.still_failed(),
            "skipped": summary.skipped,
            "results": summary.results,
        })
    );
    Ok(if summary.still_failed() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `usage`: today's and this month's consumption plus the latest episodes.
pub async fn usage(config: &AppConfig) -> Result<ExitCode> {
    let data = DataDir::new(&config.data_dir);
    let ledger = seeded_ledger(config, &UsageJournal::new(data.usage_journal())).await?;
    let summary = ledger.summary();

    let daily_left = match ledger.remaining(BudgetScope::Day) {
        Remaining::Tokens(tokens) => tokens.to_string(),
        Remaining::Spend(usd) => usd.to_string(),
    };
    let monthly_left = match ledger.remaining(BudgetScope::Month) {
        Remaining::Tokens(tokens) => tokens.to_string(),
        Remaining::Spend(usd) => format!("${:.2}", usd.as_f64()),
    };

    println!("Usage report");
    println!(
        "  Today ({}):      {} / {} tokens ({:.1}%), ${:.2}, {} left",
        summary.day,
        summary.daily_tokens,
        summary.daily_limit,
        percent(summary.daily_tokens.as_u64() as f64, summary.daily_limit.as_u64() as f64),
        summary.daily_cost.as_f64(),
        daily_left,
    );
    println!(
        "  This month ({}): {} tokens, ${:.2} / ${:.2} ({:.1}%), {} left",
        summary.month,
        summary.monthly_tokens,
        summary.monthly_cost.as_f64(),
        summary.monthly_budget.as_f64(),
        percent(summary.monthly_cost.as_f64(), summary.monthly_budget.as_f64()),
        monthly_left,
    );

    let recent = RunArchive::new(data.generated())
        .recent(RECENT_EPISODES)
        .await
        .context("failed to read run archive")?;
    if recent.is_empty() {
        println!("  No archived runs.");
    } else {
        println!("  Recent episodes:");
        for report in &recent {
            println!(
                "    {}  {:<24} {:<10} {:>8} tokens  ${:.4}",
                report.state.started_at().as_datetime().format("%Y-%m-%d %H:%M"),
                report.state.transcript().as_str(),
                report.state.stage().as_str(),
                report.totals.tokens.as_u64(),
                report.totals.cost.as_f64(),
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn percent(used: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        used / limit * 100.0
    } else {
        0.0
    }
}

/// `check-config`: the file parsed; now confirm every routed backend can be
/// built with the credentials in the environment.
pub fn check_config(config: &AppConfig) -> Result<ExitCode> {
    let mut missing = Vec::new();
    for class in TaskClass::ALL {
        let names: Vec<&str> = config.route(class).iter().map(|b| b.name.as_str()).collect();
        println!("{class}: {}", names.join(" -> "));
        for spec in config.route(class) {
            let key = std::env::var(&spec.api_key_env).unwrap_or_default();
            if key.trim().is_empty() && !missing.contains(&spec.api_key_env) {
                missing.push(spec.api_key_env.clone());
            }
        }
    }
    if !missing.is_empty() {
        bail!("missing API keys: {}", missing.join(", "));
    }

    let ledger = BudgetLedger::new(config.pipeline.budget.clone());
    router(config, &ledger)?;
    println!("configuration OK ({})", config.data_dir.display());
    Ok(ExitCode::SUCCESS)
}

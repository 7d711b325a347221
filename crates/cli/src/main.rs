//! podcast-cmo entry point.
//!
//! This binary is the composition root for the whole system. Responsibilities:
//!
//! 1. **Parse configuration**: load the TOML config file and validate it.
//! 2. **Wire observability**: install `tracing-subscriber` with a JSON (or
//!    text) layer and, when configured, an OpenTelemetry OTLP exporter. All
//!    spans and events emitted by every crate in the workspace flow through it.
//! 3. **Construct infrastructure**: build the routed text backends, the
//!    filesystem transcript source, the publishing journal and the usage
//!    journal, then inject them into the [`stages::Orchestrator`].
//! 4. **Carry budget history**: seed the ledger from the usage journal before
//!    any run, and append each run's usage when it ends.

mod commands;
mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::telemetry::LogFormat;

#[derive(Parser)]
#[command(name = "podcast-cmo", version, about = "Turns podcast transcripts into scheduled social content")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, env = "PODCAST_CMO_CONFIG", default_value = "podcast-cmo.toml")]
    config: PathBuf,

    /// Log line format on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process transcripts through the pipeline.
    Run {
        /// Transcript ids (file stems under `<data_dir>/transcripts`). All
        /// transcripts when omitted.
        ids: Vec<String>,

        /// Transcripts processed at once.
        #[arg(long, default_value_t = 1)]
        parallel: usize,
    },
    /// Show token and spend usage against the ceilings.
    Usage,
    /// Re-publish archived items the sink refused, at the next free slots.
    RetryPublishing,
    /// Validate the configuration and backend credentials.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;

    let result = execute(cli).await;
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "Command failed");
    }
    telemetry.shutdown();
    result
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(&cli.config)?;
    match cli.command {
        Command::Run { ids, parallel } => commands::run(&config, &ids, parallel).await,
        Command::Usage => commands::usage(&config).await,
        Command::RetryPublishing => commands::retry_publishing(&config).await,
        Command::CheckConfig => commands::check_config(&config),
    }
}

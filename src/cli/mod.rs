//! Command-line interface for clipforge.
//!
//! Provides commands for running pipelines, checking status, listing runs,
//! validating pipeline definitions and showing the resolved configuration.
//!
//! Exit codes are stable:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0    | Run completed or degraded, and delivered (or delivery disabled) |
//! | 1    | Configuration or internal error |
//! | 2    | Run aborted |
//! | 3    | Nothing was delivered: every channel failed, or there was no clip |
//! | 130  | Cancelled by signal |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::registry::stage_kinds;
use crate::adapters::build_orchestrator;
use crate::config::ResolvedConfig;
use crate::core::{Orchestrator, Pipeline};
use crate::domain::{AttemptOutcome, DeliveryOutcome, PipelineRun, RunStatus};

/// clipforge - AI short-video pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "clipforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run {
        /// Pipeline name (looks for pipelines/<name>.yaml) or path
        pipeline_name: String,

        /// Input of the first stage (overrides the pipeline's prompt)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Number of independent runs to execute concurrently
        #[arg(short, long, default_value = "1")]
        count: usize,

        /// Copy the finished clip here (file, or directory in batch mode)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Produce the clip but do not deliver it
        #[arg(long)]
        no_deliver: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check a pipeline definition without running it
    Validate {
        /// Pipeline name or path
        pipeline_name: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Aborted,
    Undelivered,
    Cancelled,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Aborted => 2,
            Self::Undelivered => 3,
            Self::Cancelled => 130,
        }
    }

    /// Exit status of one finished run
    pub fn for_run(run: &PipelineRun) -> Self {
        if run.was_cancelled() {
            Self::Cancelled
        } else if run.is_aborted() {
            Self::Aborted
        } else if run.delivery.as_ref().is_some_and(|d| !d.is_delivered()) {
            Self::Undelivered
        } else {
            Self::Success
        }
    }

    /// Batch exit status: the highest code wins
    pub fn worst(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses
            .into_iter()
            .max_by_key(|s| s.code())
            .unwrap_or(Self::Success)
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<ExitStatus> {
        let config = ResolvedConfig::load()?;

        match self.command {
            Commands::Run {
                pipeline_name,
                prompt,
                count,
                output,
                no_deliver,
            } => {
                let output = output.or_else(|| config.output_dir.clone());
                run_pipeline(&config, &pipeline_name, prompt, count, output, !no_deliver).await
            }
            Commands::Status { run_id } => show_status(&config, &run_id).await,
            Commands::Runs { limit } => list_runs(&config, limit).await,
            Commands::Validate { pipeline_name } => validate_pipeline(&config, &pipeline_name),
            Commands::Config => show_config(&config),
        }
    }
}

/// Run a pipeline `count` times concurrently
async fn run_pipeline(
    config: &ResolvedConfig,
    pipeline_name: &str,
    prompt: Option<String>,
    count: usize,
    output: Option<PathBuf>,
    deliver: bool,
) -> Result<ExitStatus> {
    let pipeline = load_pipeline(config, pipeline_name)?;
    let base_dir = std::env::current_dir().context("Failed to determine current directory")?;
    let orchestrator = Arc::new(build_orchestrator(&pipeline, config, &base_dir)?);

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let count = count.max(1);
    let runs = (0..count).map(|_| orchestrator.execute(prompt.as_deref(), deliver, &cancel));
    let results = join_all(runs).await;
    watcher.abort();

    let mut statuses = Vec::with_capacity(count);
    for result in results {
        match result {
            Ok(run) => {
                print_run(&run);
                let mut status = ExitStatus::for_run(&run);
                if let Some(output) = &output {
                    if let Err(e) = copy_output(&run, output, count > 1).await {
                        eprintln!("Error: {:#}", e);
                        status = ExitStatus::worst([status, ExitStatus::Failure]);
                    }
                }
                statuses.push(status);
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                statuses.push(ExitStatus::Failure);
            }
        }
    }

    Ok(ExitStatus::worst(statuses))
}

/// Write the run's final clip to `output`
async fn copy_output(run: &PipelineRun, output: &Path, batch: bool) -> Result<()> {
    let Some(artifact) = run.final_artifact() else {
        return Ok(());
    };

    let target = if batch || output.is_dir() {
        output.join(format!("{}.{}", run.id, artifact.kind().extension()))
    } else {
        output.to_path_buf()
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&target, artifact.payload.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    eprintln!("[Clip written to {}]", target.display());
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Run ID:   {}", run.id);
    println!("Pipeline: {}", run.pipeline_name);
    println!("Status:   {}", run.status);
    if let RunStatus::Aborted { stage, reason } = &run.status {
        println!(
            "Aborted:  {} ({})",
            reason,
            stage.as_deref().unwrap_or("before first stage")
        );
    }
    println!("Started:  {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Finished: {}", completed);
    }

    println!("\nStages:");
    for stage in &run.stages {
        let provider = stage
            .attempts
            .iter()
            .find(|a| a.succeeded())
            .map(|a| a.provider.as_str())
            .unwrap_or("-");
        println!(
            "  {:<12} {:<9} {:<16} {}",
            stage.stage_name,
            format!("{:?}", stage.status).to_lowercase(),
            provider,
            stage.reason.as_deref().unwrap_or("")
        );
        for attempt in &stage.attempts {
            let outcome = match &attempt.outcome {
                AttemptOutcome::Success { artifact } => {
                    format!("ok {} ({} bytes)", artifact.kind, artifact.size_bytes)
                }
                AttemptOutcome::TransientFailure { reason } => format!("transient: {}", reason),
                AttemptOutcome::FatalFailure { reason } => format!("fatal: {}", reason),
            };
            println!(
                "      #{} {:<16} {:>7}ms  {}",
                attempt.rank, attempt.provider, attempt.duration_ms, outcome
            );
        }
    }

    if let Some(path) = &run.artifact_path {
        println!("\nClip: {}", path.display());
    }

    if let Some(delivery) = &run.delivery {
        println!("\nDelivery:");
        for attempt in &delivery.attempts {
            let outcome = match &attempt.outcome {
                DeliveryOutcome::Delivered => "delivered".to_string(),
                DeliveryOutcome::Failed { reason } => format!("failed: {}", reason),
            };
            println!("  {:<9} {:<12} {}", attempt.role.to_string(), attempt.channel, outcome);
        }
        if delivery.cancelled {
            println!("  cancelled before a channel accepted the clip");
        } else if delivery.attempts.is_empty() {
            println!("  nothing to deliver");
        }
    }
    println!();
}

/// Show the status of a run
async fn show_status(config: &ResolvedConfig, run_id_str: &str) -> Result<ExitStatus> {
    let run_id =
        Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let run = Orchestrator::get_run_status(&config.runs_dir(), run_id).await?;
    print_run(&run);

    Ok(ExitStatus::Success)
}

/// List recent runs
async fn list_runs(config: &ResolvedConfig, limit: usize) -> Result<ExitStatus> {
    let runs = Orchestrator::list_runs(&config.runs_dir(), limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(ExitStatus::Success);
    }

    println!("{:<38} {:<20} {:<12} {:<10}", "RUN ID", "PIPELINE", "STATUS", "DELIVERED");
    println!("{}", "-".repeat(82));

    for run in runs {
        let delivered = match &run.delivery {
            Some(report) => report
                .delivered_by()
                .map(|role| role.to_string())
                .unwrap_or_else(|| "failed".to_string()),
            None => "-".to_string(),
        };
        println!(
            "{:<38} {:<20} {:<12} {:<10}",
            run.id,
            run.pipeline_name,
            run.status.to_string(),
            delivered
        );
    }

    Ok(ExitStatus::Success)
}

/// Validate a pipeline and everything its stages load from disk
fn validate_pipeline(config: &ResolvedConfig, pipeline_name: &str) -> Result<ExitStatus> {
    let pipeline = load_pipeline(config, pipeline_name)?;
    let base_dir = std::env::current_dir().context("Failed to determine current directory")?;
    build_orchestrator(&pipeline, config, &base_dir)?;

    println!("Pipeline '{}' is valid", pipeline.name);
    for (name, kind, policy) in stage_kinds(&pipeline) {
        println!("  {:<12} {:<8} {:?}", name, format!("{:?}", kind).to_lowercase(), policy);
    }

    Ok(ExitStatus::Success)
}

/// Load a pipeline by name or path
fn load_pipeline(config: &ResolvedConfig, name: &str) -> Result<Pipeline> {
    let path = config.pipeline_path(name).with_context(|| {
        format!(
            "Pipeline '{}' not found. Looked for:\n  - {}\n  - {}.yaml",
            name,
            config.pipelines_dir.join(format!("{}.yaml", name)).display(),
            name
        )
    })?;

    let pipeline = Pipeline::from_file(&path)?;
    pipeline
        .validate()
        .with_context(|| format!("Invalid pipeline: {}", path.display()))?;

    Ok(pipeline)
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<ExitStatus> {
    println!("clipforge configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", config.home.display());
    println!("  Runs:                {}", config.runs_dir().display());
    println!("  Pipelines:           {}", config.pipelines_dir.display());
    println!(
        "  Output:              {}",
        config
            .output_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );
    println!();
    println!("Default limits:");
    println!("  Attempt timeout:    {}s", config.limits.default_timeout_seconds);
    println!("  Run timeout:        {}s", config.limits.run_timeout_seconds);
    println!("  Max artifact size:  {} bytes", config.limits.max_artifact_bytes);

    Ok(ExitStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelRole, DeliveryAttempt, DeliveryReport, CANCELLED};

    fn finished(status: RunStatus) -> PipelineRun {
        let mut run = PipelineRun::new(Uuid::new_v4(), "short");
        run.finish(status);
        run
    }

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::Aborted.code(), 2);
        assert_eq!(ExitStatus::Undelivered.code(), 3);
        assert_eq!(ExitStatus::Cancelled.code(), 130);
    }

    #[test]
    fn test_exit_status_for_run() {
        assert_eq!(ExitStatus::for_run(&finished(RunStatus::Completed)), ExitStatus::Success);
        assert_eq!(ExitStatus::for_run(&finished(RunStatus::Degraded)), ExitStatus::Success);
        assert_eq!(
            ExitStatus::for_run(&finished(RunStatus::Aborted {
                stage: Some("script".to_string()),
                reason: "all 2 providers failed".to_string(),
            })),
            ExitStatus::Aborted
        );
        assert_eq!(
            ExitStatus::for_run(&finished(RunStatus::Aborted {
                stage: Some("visuals".to_string()),
                reason: CANCELLED.to_string(),
            })),
            ExitStatus::Cancelled
        );

        let mut undelivered = finished(RunStatus::Completed);
        undelivered.delivery = Some(DeliveryReport {
            attempts: vec![DeliveryAttempt {
                role: ChannelRole::Primary,
                channel: "youtube".to_string(),
                outcome: DeliveryOutcome::Failed {
                    reason: "401".to_string(),
                },
                duration_ms: 10,
            }],
            cancelled: false,
        });
        assert_eq!(ExitStatus::for_run(&undelivered), ExitStatus::Undelivered);

        let mut nothing_sent = finished(RunStatus::Degraded);
        nothing_sent.delivery = Some(DeliveryReport::default());
        assert_eq!(ExitStatus::for_run(&nothing_sent), ExitStatus::Undelivered);
    }

    #[test]
    fn test_cancelled_delivery_exits_130() {
        let mut run = finished(RunStatus::Completed);
        run.delivery = Some(DeliveryReport {
            attempts: vec![DeliveryAttempt {
                role: ChannelRole::Primary,
                channel: "youtube".to_string(),
                outcome: DeliveryOutcome::Failed {
                    reason: CANCELLED.to_string(),
                },
                duration_ms: 10,
            }],
            cancelled: true,
        });

        assert_eq!(ExitStatus::for_run(&run), ExitStatus::Cancelled);
    }

    #[test]
    fn test_batch_takes_highest_code() {
        assert_eq!(
            ExitStatus::worst([ExitStatus::Success, ExitStatus::Undelivered, ExitStatus::Aborted]),
            ExitStatus::Undelivered
        );
        assert_eq!(ExitStatus::worst([]), ExitStatus::Success);
    }

    #[test]
    fn test_cli_parsing() {
        let cli =
            Cli::try_parse_from(["clipforge", "run", "short", "--count", "3", "--no-deliver"])
                .unwrap();
        match cli.command {
            Commands::Run {
                pipeline_name,
                count,
                no_deliver,
                prompt,
                ..
            } => {
                assert_eq!(pipeline_name, "short");
                assert_eq!(count, 3);
                assert!(no_deliver);
                assert!(prompt.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

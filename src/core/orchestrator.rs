//! Main orchestrator for pipeline execution.
//!
//! Runs the stages of one pipeline in order, applies each stage's failure
//! policy, journals every state change, persists the final clip and hands
//! it to delivery.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Artifact, AttemptOutcome, DeliveryError, DeliveryOutcome, DeliveryReport, Event, EventType,
    PipelineRun, RunStatus, StageError, StageResult, StageStatus, CANCELLED,
};

use super::delivery::DeliveryFanout;
use super::event_store::EventStore;
use super::limits::{RunBudget, RunLimits};
use super::pipeline::ConfigError;
use super::stage::Stage;
use super::store::ArtifactStore;

/// Journal of one run; a no-op when the orchestrator has no runs directory
struct Journal {
    run_id: Uuid,
    store: Option<EventStore>,
}

impl Journal {
    async fn open(runs_dir: Option<&Path>, run_id: Uuid) -> Result<Self> {
        let store = match runs_dir {
            Some(dir) => Some(EventStore::open(dir, run_id).await?),
            None => None,
        };
        Ok(Self { run_id, store })
    }

    async fn record(&self, event: Event) -> Result<()> {
        match &self.store {
            Some(store) => store.append(&event).await,
            None => Ok(()),
        }
    }

    async fn persist(&self, artifact: &Artifact) -> Result<Option<PathBuf>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let path = store.store_artifact(artifact).await?;
        let event = Event::new(
            self.run_id,
            Some(artifact.stage_name.clone()),
            EventType::ArtifactPersisted,
            format!("Saved {} to {}", artifact.kind(), path.display()),
        )
        .with_artifact(artifact.summary())
        .with_path(path.clone());
        store.append(&event).await?;

        Ok(Some(path))
    }

    async fn delivery_attempted(&self) -> Result<bool> {
        match &self.store {
            Some(store) => store.delivery_attempted().await,
            None => Ok(false),
        }
    }
}

/// Main pipeline orchestrator
#[derive(Debug)]
pub struct Orchestrator {
    pipeline_name: String,

    /// Input of the first stage when the caller gives none
    prompt: String,

    stages: Vec<Stage>,

    limits: RunLimits,

    delivery: DeliveryFanout,

    /// Journal root; runs are not journaled when unset
    runs_dir: Option<PathBuf>,
}

impl Orchestrator {
    /// Create an orchestrator over an ordered list of stages
    pub fn new(pipeline_name: impl Into<String>, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let pipeline_name = pipeline_name.into();
        if pipeline_name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
        }

        Ok(Self {
            pipeline_name,
            prompt: String::new(),
            stages,
            limits: RunLimits::default(),
            delivery: DeliveryFanout::default(),
            runs_dir: None,
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryFanout) -> Self {
        self.delivery = delivery;
        self
    }

    /// Journal runs under `runs_dir`
    pub fn with_journal(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(runs_dir.into());
        self
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn delivery(&self) -> &DeliveryFanout {
        &self.delivery
    }

    /// Run every stage and return the finished run. The run is always
    /// terminal on `Ok`; `Err` means the journal could not be written.
    #[instrument(skip(self, prompt, cancel), fields(pipeline = %self.pipeline_name))]
    pub async fn run_pipeline(
        &self,
        prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        let prompt = prompt.unwrap_or(&self.prompt);
        info!(%run_id, "Starting pipeline execution");

        let journal = Journal::open(self.runs_dir.as_deref(), run_id).await?;
        let mut run = PipelineRun::new(run_id, self.pipeline_name.clone());
        let budget = self.limits.start();
        let mut store = ArtifactStore::new();
        let mut previous: Option<Arc<Artifact>> = None;
        let mut degraded = false;
        let mut aborted: Option<StageError> = None;

        journal
            .record(
                Event::new(
                    run_id,
                    None,
                    EventType::RunStarted,
                    format!("Pipeline '{}' started", self.pipeline_name),
                )
                .with_pipeline(self.pipeline_name.clone()),
            )
            .await?;

        for stage in &self.stages {
            if let Some(reason) = interruption(&budget, cancel) {
                aborted = Some(abort(&stage.name, reason));
                break;
            }

            journal
                .record(Event::new(
                    run_id,
                    Some(stage.name.clone()),
                    EventType::StageStarted,
                    format!("Stage '{}' started", stage.name),
                ))
                .await?;

            let result = stage.run(prompt, previous.as_ref(), &store, &budget, cancel).await;
            record_stage_events(&journal, &result).await?;

            match result.status {
                StageStatus::Success | StageStatus::Degraded => {
                    if let Some(artifact) = &result.artifact {
                        store.insert(artifact.clone())?;
                        previous = Some(artifact.clone());
                    }
                    if result.status == StageStatus::Degraded {
                        degraded = true;
                    }
                }
                StageStatus::Failed => {
                    let reason = interruption(&budget, cancel).or_else(|| {
                        stage
                            .is_critical()
                            .then(|| result.reason.clone().unwrap_or_default())
                    });

                    match reason {
                        Some(reason) => {
                            aborted = Some(abort(&stage.name, reason));
                            run.record_stage(result);
                            break;
                        }
                        None => {
                            let err = StageError::Degraded {
                                stage: stage.name.clone(),
                                reason: result.reason.clone().unwrap_or_default(),
                            };
                            warn!("{}, continuing without it", err);
                            degraded = true;
                            previous = None;
                        }
                    }
                }
            }

            run.record_stage(result);
        }

        let (status, event) = match aborted {
            Some(StageError::Aborted { stage, reason }) => {
                let event = Event::new(
                    run_id,
                    Some(stage.clone()),
                    EventType::RunAborted,
                    format!("Run aborted at '{}'", stage),
                )
                .with_error(reason.clone());
                (
                    RunStatus::Aborted {
                        stage: Some(stage),
                        reason,
                    },
                    event,
                )
            }
            _ if degraded => {
                warn!(%run_id, "Run finished degraded");
                let event = Event::new(
                    run_id,
                    None,
                    EventType::RunDegraded,
                    format!("Pipeline '{}' finished degraded", self.pipeline_name),
                );
                (RunStatus::Degraded, event)
            }
            _ => {
                info!(%run_id, "Run completed successfully");
                let event = Event::new(
                    run_id,
                    None,
                    EventType::RunCompleted,
                    format!("Pipeline '{}' completed", self.pipeline_name),
                );
                (RunStatus::Completed, event)
            }
        };

        run.finish(status);
        journal.record(event.with_duration(budget.elapsed().as_millis() as u64)).await?;

        if let Some(artifact) = run.final_artifact().cloned() {
            run.artifact_path = journal.persist(&artifact).await?;
        }

        Ok(run)
    }

    /// Deliver the run's final artifact, at most once per run.
    ///
    /// Errors with [`DeliveryError::AlreadyAttempted`] on a second call (or
    /// when the journal already holds delivery events),
    /// [`DeliveryError::NothingToDeliver`] for aborted runs, and
    /// [`DeliveryError::Undelivered`] when every channel failed. In the last
    /// case the report is still recorded on the run.
    #[instrument(skip(self, run, cancel), fields(run_id = %run.id))]
    pub async fn deliver(
        &self,
        run: &mut PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        if run.delivery.is_some() {
            return Err(DeliveryError::AlreadyAttempted(run.id).into());
        }

        let journal = Journal::open(self.runs_dir.as_deref(), run.id).await?;
        if journal.delivery_attempted().await? {
            return Err(DeliveryError::AlreadyAttempted(run.id).into());
        }

        let video = run
            .final_artifact()
            .cloned()
            .ok_or(DeliveryError::NothingToDeliver(run.id))?;

        let report = self.delivery.deliver(&video, cancel).await;

        for attempt in &report.attempts {
            let event = match &attempt.outcome {
                DeliveryOutcome::Delivered => Event::new(
                    run.id,
                    None,
                    EventType::DeliverySucceeded,
                    format!("Delivered via {}", attempt.channel),
                ),
                DeliveryOutcome::Failed { reason } => Event::new(
                    run.id,
                    None,
                    EventType::DeliveryFailed,
                    format!("Delivery via {} failed", attempt.channel),
                )
                .with_error(reason.clone()),
            };
            journal
                .record(
                    event
                        .with_channel(attempt.role, attempt.channel.clone())
                        .with_duration(attempt.duration_ms),
                )
                .await?;
        }

        run.delivery = Some(report.clone());

        if !report.is_delivered() {
            return Err(DeliveryError::Undelivered.into());
        }

        Ok(report)
    }

    /// Run the pipeline and, when it produced something, deliver it.
    ///
    /// Delivery is skipped for aborted runs, when `deliver` is false, or when
    /// no channel is configured. A failed delivery is reported on the run,
    /// not as an error. So is a degraded run whose final stage left nothing
    /// to send: it gets an empty report.
    pub async fn execute(
        &self,
        prompt: Option<&str>,
        deliver: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        let mut run = self.run_pipeline(prompt, cancel).await?;

        if !deliver || run.is_aborted() {
            return Ok(run);
        }
        if !self.delivery.is_configured() {
            info!(run_id = %run.id, "No delivery channels configured");
            return Ok(run);
        }
        if run.final_artifact().is_none() {
            warn!(run_id = %run.id, "Final stage produced nothing to deliver");
            run.delivery = Some(DeliveryReport::default());
            return Ok(run);
        }

        match self.deliver(&mut run, cancel).await {
            Ok(_) => Ok(run),
            Err(e) if is_undelivered(&e) => Ok(run),
            Err(e) => Err(e),
        }
    }

    /// Reconstruct a run from its journal
    pub async fn get_run_status(runs_dir: &Path, run_id: Uuid) -> Result<PipelineRun> {
        if !EventStore::exists(runs_dir, run_id).await {
            anyhow::bail!("Run {} not found", run_id);
        }

        let store = EventStore::open(runs_dir, run_id).await?;
        let events = store.replay().await?;

        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        PipelineRun::from_events(&events).context("Failed to reconstruct run state")
    }

    /// Most recent runs first
    pub async fn list_runs(runs_dir: &Path, limit: usize) -> Result<Vec<PipelineRun>> {
        let run_ids = EventStore::list_runs(runs_dir).await?;
        let mut runs = Vec::new();

        for run_id in run_ids {
            match Self::get_run_status(runs_dir, run_id).await {
                Ok(run) => runs.push(run),
                Err(e) => warn!(%run_id, error = %e, "Skipping unreadable run"),
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);

        Ok(runs)
    }
}

fn is_undelivered(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DeliveryError>(),
        Some(DeliveryError::Undelivered)
    )
}

fn abort(stage: &str, reason: String) -> StageError {
    let err = StageError::Aborted {
        stage: stage.to_string(),
        reason,
    };
    error!("{}", err);
    err
}

/// Why the run cannot go on, if it cannot
fn interruption(budget: &RunBudget, cancel: &CancellationToken) -> Option<String> {
    if cancel.is_cancelled() {
        return Some(CANCELLED.to_string());
    }
    budget.check().err().map(|violation| violation.to_string())
}

async fn record_stage_events(journal: &Journal, result: &StageResult) -> Result<()> {
    let stage = Some(result.stage_name.clone());

    for attempt in &result.attempts {
        let (event_type, summary, error) = match &attempt.outcome {
            AttemptOutcome::Success { .. } => (EventType::ProviderSucceeded, "succeeded", None),
            AttemptOutcome::TransientFailure { reason } => {
                (EventType::ProviderTransientFailure, "failed", Some(reason))
            }
            AttemptOutcome::FatalFailure { reason } => {
                (EventType::ProviderFatalFailure, "failed fatally", Some(reason))
            }
        };

        let mut event = Event::new(
            journal.run_id,
            stage.clone(),
            event_type,
            format!("Provider '{}' {}", attempt.provider, summary),
        )
        .with_provider(attempt.provider.clone(), attempt.rank)
        .with_duration(attempt.duration_ms);

        if let AttemptOutcome::Success { artifact } = &attempt.outcome {
            event = event.with_artifact(artifact.clone());
        }
        if let Some(reason) = error {
            event = event.with_error(reason.clone());
        }
        journal.record(event).await?;
    }

    let total_ms: u64 = result.attempts.iter().map(|a| a.duration_ms).sum();
    let mut event = match result.status {
        StageStatus::Success => Event::new(
            journal.run_id,
            stage,
            EventType::StageSucceeded,
            format!("Stage '{}' succeeded", result.stage_name),
        ),
        StageStatus::Degraded => Event::new(
            journal.run_id,
            stage,
            EventType::StageDegraded,
            format!("Stage '{}' used its fallback", result.stage_name),
        ),
        StageStatus::Failed => Event::new(
            journal.run_id,
            stage,
            EventType::StageFailed,
            format!("Stage '{}' failed", result.stage_name),
        ),
    }
    .with_duration(total_ms);

    if let Some(output) = &result.output {
        event = event.with_artifact(output.clone());
    }
    if let Some(reason) = &result.reason {
        event = event.with_error(reason.clone());
    }

    journal.record(event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::{Provider, ProviderChain, ProviderSpec, StageInput};
    use crate::core::stage::{FailurePolicy, StageKind};
    use crate::domain::{Payload, ProviderError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixed(Payload);

    #[async_trait]
    impl Provider for Fixed {
        async fn produce(
        &self,
        _input: &StageInput<'_>,
        _timeout: Duration,
    ) -> Result<Payload, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn stage(name: &str, kind: StageKind, payload: Payload) -> Stage {
        let spec = ProviderSpec::new("fixed", 0, Duration::from_secs(1), Arc::new(Fixed(payload)));
        let chain = ProviderChain::new(name, kind.output(), vec![spec]).unwrap();
        Stage::new(name, kind, FailurePolicy::Critical, chain)
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let stages = vec![
            stage("script", StageKind::Script, Payload::Text("a".to_string())),
            stage("script", StageKind::Script, Payload::Text("b".to_string())),
        ];
        assert!(matches!(
            Orchestrator::new("short", stages),
            Err(ConfigError::DuplicateStage(_))
        ));
        assert!(matches!(Orchestrator::new("short", Vec::new()), Err(ConfigError::NoStages)));
    }

    #[tokio::test]
    async fn test_journaled_run_can_be_replayed() {
        let temp = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            "short",
            vec![
                stage("script", StageKind::Script, Payload::Text("a script".to_string())),
                stage("visuals", StageKind::Visuals, Payload::Image(vec![1, 2, 3])),
            ],
        )
        .unwrap()
        .with_journal(temp.path());

        let run = orchestrator
            .run_pipeline(Some("about AI"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let path = run.artifact_path.clone().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);

        let replayed = Orchestrator::get_run_status(temp.path(), run.id).await.unwrap();
        assert_eq!(replayed.pipeline_name, "short");
        assert_eq!(replayed.status, RunStatus::Completed);
        assert_eq!(replayed.stages.len(), 2);
        assert_eq!(replayed.stages[1].attempts.len(), 1);
        assert_eq!(replayed.artifact_path, Some(path));

        let runs = Orchestrator::list_runs(temp.path(), 10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orchestrator = Orchestrator::new(
            "short",
            vec![stage("script", StageKind::Script, Payload::Text("a".to_string()))],
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = orchestrator.run_pipeline(None, &cancel).await.unwrap();

        assert!(run.was_cancelled());
        assert!(run.stages.is_empty());
        assert!(run.final_artifact().is_none());
    }
}

//! Run state and reconstruction from events.
//!
//! A `PipelineRun` is a single execution of a pipeline. It is mutated only by
//! the orchestrator and becomes immutable once a terminal status is set.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::artifact::{Artifact, ArtifactSummary};
use super::events::{Event, EventType};

/// Abort reason recorded when a run is cancelled
pub const CANCELLED: &str = "cancelled";

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: RunStatus,

    /// One result per executed stage, in execution order
    pub stages: Vec<StageResult>,

    /// Distribution outcome, once attempted
    pub delivery: Option<DeliveryReport>,

    /// Where the final artifact was persisted (if it was)
    pub artifact_path: Option<PathBuf>,
}

impl PipelineRun {
    /// Create a new run for a pipeline
    pub fn new(id: Uuid, pipeline_name: impl Into<String>) -> Self {
        Self {
            id,
            pipeline_name: pipeline_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running { stage_index: 0 },
            stages: Vec::new(),
            delivery: None,
            artifact_path: None,
        }
    }

    /// Record a stage result and advance. Ignored once terminal.
    pub fn record_stage(&mut self, result: StageResult) {
        if self.is_terminal() {
            warn!(
                run_id = %self.id,
                stage = %result.stage_name,
                "Ignoring stage result for finished run"
            );
            return;
        }
        self.stages.push(result);
        self.status = RunStatus::Running {
            stage_index: self.stages.len(),
        };
    }

    /// Set the terminal status. The first terminal status wins.
    pub fn finish(&mut self, status: RunStatus) {
        if self.is_terminal() {
            warn!(run_id = %self.id, "Run already finished, keeping {:?}", self.status);
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, RunStatus::Running { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }

    /// Cancelled mid-pipeline, or during delivery before any channel took the clip
    pub fn was_cancelled(&self) -> bool {
        let aborted =
            matches!(&self.status, RunStatus::Aborted { reason, .. } if reason == CANCELLED);
        aborted
            || self
                .delivery
                .as_ref()
                .is_some_and(|d| d.cancelled && !d.is_delivered())
    }

    /// The artifact to distribute: the last stage's output, unless aborted
    pub fn final_artifact(&self) -> Option<&Arc<Artifact>> {
        if !self.is_terminal() || self.is_aborted() {
            return None;
        }
        self.stages.last().and_then(|s| s.artifact.as_ref())
    }

    /// Result of a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage_name == name)
    }

    /// Reconstruct a run summary from its journal. Payloads are not
    /// journaled, so stage results carry summaries only.
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first = events.first()?;
        let mut run = Self::new(first.run_id, first.pipeline.clone().unwrap_or_default());
        run.started_at = first.timestamp;

        let mut pending: Vec<ProviderAttempt> = Vec::new();

        for event in events {
            match event.event_type {
                EventType::RunStarted => {
                    if let Some(ref pipeline) = event.pipeline {
                        run.pipeline_name = pipeline.clone();
                    }
                    run.started_at = event.timestamp;
                }
                EventType::StageStarted => pending.clear(),
                EventType::ProviderSucceeded
                | EventType::ProviderTransientFailure
                | EventType::ProviderFatalFailure => {
                    if let Some(attempt) = ProviderAttempt::from_event(event) {
                        pending.push(attempt);
                    }
                }
                EventType::StageSucceeded | EventType::StageDegraded | EventType::StageFailed => {
                    let status = match event.event_type {
                        EventType::StageSucceeded => StageStatus::Success,
                        EventType::StageDegraded => StageStatus::Degraded,
                        _ => StageStatus::Failed,
                    };
                    run.stages.push(StageResult {
                        stage_name: event.stage.clone().unwrap_or_default(),
                        status,
                        artifact: None,
                        output: event.artifact.clone(),
                        attempts: std::mem::take(&mut pending),
                        reason: event.error.clone(),
                    });
                    run.status = RunStatus::Running {
                        stage_index: run.stages.len(),
                    };
                }
                EventType::RunCompleted | EventType::RunDegraded | EventType::RunAborted => {
                    run.status = match event.event_type {
                        EventType::RunCompleted => RunStatus::Completed,
                        EventType::RunDegraded => RunStatus::Degraded,
                        _ => RunStatus::Aborted {
                            stage: event.stage.clone(),
                            reason: event.error.clone().unwrap_or_default(),
                        },
                    };
                    run.completed_at = Some(event.timestamp);
                }
                EventType::DeliverySucceeded | EventType::DeliveryFailed => {
                    if let Some(attempt) = DeliveryAttempt::from_event(event) {
                        let report = run.delivery.get_or_insert_with(DeliveryReport::default);
                        report.cancelled |= attempt.outcome
                            == DeliveryOutcome::Failed {
                                reason: CANCELLED.to_string(),
                            };
                        report.attempts.push(attempt);
                    }
                }
                EventType::ArtifactPersisted => {
                    run.artifact_path = event.path.clone();
                }
            }
        }

        Some(run)
    }
}

/// Status of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// Executing the stage at this index
    Running { stage_index: usize },

    /// Every stage succeeded
    Completed,

    /// Finished, but at least one optional stage fell back or failed
    Degraded,

    /// A critical stage failed, the run budget ran out, or the run was cancelled
    Aborted {
        stage: Option<String>,
        reason: String,
    },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { stage_index } => write!(f, "running (stage {})", stage_index),
            Self::Completed => f.write_str("completed"),
            Self::Degraded => f.write_str("degraded"),
            Self::Aborted { .. } => f.write_str("aborted"),
        }
    }
}

/// Final status of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Degraded,
    Failed,
}

/// Outcome of running one stage
///
/// `Success` and `Degraded` always carry an artifact, `Failed` never does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,

    pub status: StageStatus,

    /// Chosen artifact (only present in the live run, not in replays)
    #[serde(skip)]
    pub artifact: Option<Arc<Artifact>>,

    /// Journaled description of the chosen artifact
    pub output: Option<ArtifactSummary>,

    /// Every provider tried, in rank order
    pub attempts: Vec<ProviderAttempt>,

    /// Why the stage degraded or failed
    pub reason: Option<String>,
}

impl StageResult {
    pub fn success(
        stage_name: impl Into<String>,
        artifact: Arc<Artifact>,
        attempts: Vec<ProviderAttempt>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Success,
            output: Some(artifact.summary()),
            artifact: Some(artifact),
            attempts,
            reason: None,
        }
    }

    pub fn degraded(
        stage_name: impl Into<String>,
        artifact: Arc<Artifact>,
        attempts: Vec<ProviderAttempt>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Degraded,
            output: Some(artifact.summary()),
            artifact: Some(artifact),
            attempts,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(
        stage_name: impl Into<String>,
        attempts: Vec<ProviderAttempt>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Failed,
            artifact: None,
            output: None,
            attempts,
            reason: Some(reason.into()),
        }
    }
}

/// Record of one provider invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,

    /// Position in the stage's provider order (0 = first choice)
    pub rank: usize,

    pub outcome: AttemptOutcome,

    pub duration_ms: u64,
}

impl ProviderAttempt {
    fn from_event(event: &Event) -> Option<Self> {
        let outcome = match event.event_type {
            EventType::ProviderSucceeded => AttemptOutcome::Success {
                artifact: event.artifact.clone()?,
            },
            EventType::ProviderTransientFailure => AttemptOutcome::TransientFailure {
                reason: event.error.clone().unwrap_or_default(),
            },
            EventType::ProviderFatalFailure => AttemptOutcome::FatalFailure {
                reason: event.error.clone().unwrap_or_default(),
            },
            _ => return None,
        };
        Some(Self {
            provider: event.provider.clone()?,
            rank: event.rank.unwrap_or_default(),
            outcome,
            duration_ms: event.duration_ms.unwrap_or_default(),
        })
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }
}

/// Result of one provider attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Success { artifact: ArtifactSummary },
    TransientFailure { reason: String },
    FatalFailure { reason: String },
}

/// Which delivery channel an attempt went to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Primary,
    Secondary,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Record of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub role: ChannelRole,
    pub channel: String,
    pub outcome: DeliveryOutcome,
    pub duration_ms: u64,
}

impl DeliveryAttempt {
    fn from_event(event: &Event) -> Option<Self> {
        let outcome = match event.event_type {
            EventType::DeliverySucceeded => DeliveryOutcome::Delivered,
            EventType::DeliveryFailed => DeliveryOutcome::Failed {
                reason: event.error.clone().unwrap_or_default(),
            },
            _ => return None,
        };
        Some(Self {
            role: event.channel?,
            channel: event.provider.clone().unwrap_or_default(),
            outcome,
            duration_ms: event.duration_ms.unwrap_or_default(),
        })
    }

    pub fn delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { reason: String },
}

/// All delivery attempts for one run, in the order they were made
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    /// Delivery was interrupted by cancellation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl DeliveryReport {
    /// The channel that accepted the artifact, if any
    pub fn delivered_by(&self) -> Option<ChannelRole> {
        self.attempts.iter().find(|a| a.delivered()).map(|a| a.role)
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_by().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;

    fn text(stage: &str) -> Arc<Artifact> {
        Arc::new(Artifact::new(stage, Payload::Text("hello".to_string())))
    }

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = PipelineRun::new(run_id, "short");

        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Running { stage_index: 0 });
        assert!(run.final_artifact().is_none());
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut run = PipelineRun::new(Uuid::new_v4(), "short");
        run.record_stage(StageResult::success("script", text("script"), vec![]));
        run.finish(RunStatus::Completed);

        run.finish(RunStatus::Aborted {
            stage: None,
            reason: "late".to_string(),
        });
        run.record_stage(StageResult::failed("visuals", vec![], "late"));

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stages.len(), 1);
    }

    #[test]
    fn test_aborted_run_has_no_final_artifact() {
        let mut run = PipelineRun::new(Uuid::new_v4(), "short");
        run.record_stage(StageResult::success("script", text("script"), vec![]));
        run.finish(RunStatus::Aborted {
            stage: Some("voice".to_string()),
            reason: "all providers failed".to_string(),
        });

        assert!(run.final_artifact().is_none());
    }

    #[test]
    fn test_run_from_events() {
        let run_id = Uuid::new_v4();
        let artifact = text("script");

        let script = || Some("script".to_string());
        let events = vec![
            Event::new(run_id, None, EventType::RunStarted, "started").with_pipeline("short"),
            Event::new(run_id, script(), EventType::StageStarted, "stage started"),
            Event::new(run_id, script(), EventType::ProviderTransientFailure, "failed")
                .with_provider("primary", 0)
                .with_error("timed out"),
            Event::new(run_id, script(), EventType::ProviderSucceeded, "ok")
                .with_provider("backup", 1)
                .with_artifact(artifact.summary())
                .with_duration(40),
            Event::new(run_id, script(), EventType::StageSucceeded, "stage ok")
                .with_artifact(artifact.summary()),
            Event::new(run_id, None, EventType::RunCompleted, "done"),
            Event::new(run_id, None, EventType::DeliveryFailed, "upload failed")
                .with_channel(ChannelRole::Primary, "youtube")
                .with_error("HTTP 500"),
            Event::new(run_id, None, EventType::DeliverySucceeded, "mailed")
                .with_channel(ChannelRole::Secondary, "email"),
        ];

        let run = PipelineRun::from_events(&events).unwrap();

        assert_eq!(run.pipeline_name, "short");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stages.len(), 1);
        assert_eq!(run.stages[0].attempts.len(), 2);
        assert_eq!(run.stages[0].attempts[1].provider, "backup");
        assert_eq!(run.stages[0].attempts[1].duration_ms, 40);
        assert_eq!(
            run.delivery.as_ref().and_then(|d| d.delivered_by()),
            Some(ChannelRole::Secondary)
        );
    }
}

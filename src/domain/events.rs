//! Event types for the run journal.
//!
//! Every state change of a run is recorded as an immutable event in an
//! append-only log. Payloads are never journaled, only their summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactSummary;
use super::run::ChannelRole;

/// A single event in the append-only run journal.
///
/// The summary of any run can be reconstructed by replaying its events in
/// order (see `PipelineRun::from_events`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Stage name (if applicable)
    pub stage: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Pipeline name (run start only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    /// Provider or delivery channel name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Provider rank within its stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,

    /// Delivery channel role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelRole>,

    /// Artifact produced or chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactSummary>,

    /// Where an artifact was written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Time taken in milliseconds
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        stage: Option<String>,
        event_type: EventType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            stage,
            event_type,
            summary: summary.into(),
            pipeline: None,
            provider: None,
            rank: None,
            channel: None,
            artifact: None,
            path: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>, rank: usize) -> Self {
        self.provider = Some(provider.into());
        self.rank = Some(rank);
        self
    }

    pub fn with_channel(mut self, role: ChannelRole, channel: impl Into<String>) -> Self {
        self.channel = Some(role);
        self.provider = Some(channel.into());
        self
    }

    pub fn with_artifact(mut self, artifact: ArtifactSummary) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    StageStarted,

    /// A provider returned an artifact
    ProviderSucceeded,

    /// A provider failed in a way that may clear up later
    ProviderTransientFailure,

    /// A provider refused in a way that will not clear up on retry
    ProviderFatalFailure,

    StageSucceeded,

    /// Stage fell back to its static artifact, or an optional stage produced nothing
    StageDegraded,

    StageFailed,
    RunCompleted,
    RunDegraded,
    RunAborted,

    /// The final artifact was written to the run directory
    ArtifactPersisted,

    DeliverySucceeded,
    DeliveryFailed,
}

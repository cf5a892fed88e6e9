//! Domain types for the clipforge orchestrator.
//!
//! This module contains the core data structures:
//! - Artifact: Typed stage outputs
//! - Events: Immutable records of run state changes
//! - Run: Pipeline execution state, stage and delivery results
//! - Error: Provider, stage and delivery failure taxonomy

pub mod artifact;
pub mod error;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKind, ArtifactSummary, Payload};
pub use error::{DeliveryError, ProviderError, StageError};
pub use events::{Event, EventType};
pub use run::{
    AttemptOutcome, ChannelRole, DeliveryAttempt, DeliveryOutcome, DeliveryReport, PipelineRun,
    ProviderAttempt, RunStatus, StageResult, StageStatus, CANCELLED,
};

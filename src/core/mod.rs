//! Core orchestration logic.
//!
//! This module contains:
//! - Pipeline: Pipeline definitions, loading and validation
//! - ProviderChain: Ordered provider fallback for one stage
//! - Stage: A chain plus its failure policy
//! - DeliveryFanout: Exclusive primary/secondary delivery
//! - EventStore: Append-only run journal
//! - Orchestrator: Main execution engine

pub mod capability;
pub mod chain;
pub mod delivery;
pub mod event_store;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod stage;
pub mod store;

// Re-export commonly used types
pub use capability::{
    ComposeProvider, ImageProvider, MailChannel, SpeechProvider, StaticProvider, TextProvider,
    UploadChannel,
};
pub use chain::{ChainError, Provider, ProviderChain, ProviderSpec, Resolved, StageInput};
pub use delivery::{ChannelSpec, DeliveryChannel, DeliveryFanout};
pub use event_store::EventStore;
pub use limits::{LimitViolation, RunBudget, RunLimits};
pub use orchestrator::Orchestrator;
pub use pipeline::{
    ChannelConfig, ChannelKind, ConfigError, DeliveryConfig, FallbackSource, Pipeline,
    ProviderConfig, ProviderKind, StageConfig,
};
pub use stage::{FailurePolicy, Stage, StageKind, INPUT_PLACEHOLDER};
pub use store::{ArtifactStore, ArtifactStoreError};

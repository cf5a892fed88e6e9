//! clipforge - AI short-video pipeline orchestrator
//!
//! Turns a prompt into a short vertical video through a fixed sequence of
//! generation stages (script, visuals, voice, compose), each served by an
//! ordered chain of interchangeable providers, then delivers the clip to a
//! primary channel with an exclusive secondary fallback.
//!
//! # Architecture
//!
//! - Every stage tries its providers in rank order; the first success wins
//! - A critical stage failure aborts the run, an optional one degrades it
//! - Every state change is journaled as an immutable event
//! - The final clip is persisted before delivery is attempted
//!
//! # Modules
//!
//! - `adapters`: External backends (OpenAI-compatible APIs, Hugging Face,
//!   edge-tts, ffmpeg, YouTube, sendmail) behind capability traits
//! - `core`: Orchestration logic (ProviderChain, Stage, Orchestrator,
//!   DeliveryFanout, EventStore, Pipeline)
//! - `domain`: Data structures (Artifact, PipelineRun, Event, errors)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! clipforge run short
//!
//! # Three clips at once, no upload
//! clipforge run short --count 3 --no-deliver --output out/
//!
//! # Check run status
//! clipforge status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::ResolvedConfig;
pub use core::{DeliveryFanout, Orchestrator, Pipeline, ProviderChain, Stage};
pub use domain::{Artifact, Event, EventType, PipelineRun, RunStatus};

//! Adapter interfaces for external systems.
//!
//! Each generation or delivery backend is reached through one capability
//! trait. The orchestrator only ever sees these traits, so every backend
//! can be swapped for a fake in tests.

pub mod edge_tts;
pub mod ffmpeg;
pub mod huggingface;
pub mod mail;
pub mod openai;
pub mod registry;
pub mod smtp;
pub mod youtube;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ProviderError;

// Re-export the concrete adapters
pub use edge_tts::EdgeTts;
pub use ffmpeg::{CompositionSettings, FfmpegComposer};
pub use huggingface::HuggingFaceImages;
pub use mail::SendmailMailer;
pub use openai::{OpenAiChat, OpenAiImages};
pub use registry::{build_orchestrator, load_fallback};
pub use smtp::{SmtpMailer, SmtpServer};
pub use youtube::YouTubeUploader;

/// Language model backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError>;
}

/// Image generation backend
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError>;
}

/// Speech synthesis backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Inputs to a composition
#[derive(Debug, Clone, Copy)]
pub struct CompositionInputs<'a> {
    /// Still image (required)
    pub visual: &'a [u8],

    /// Narration; silence when absent
    pub audio: Option<&'a [u8]>,

    /// Background music bed
    pub music: Option<&'a MusicSource>,
}

/// Media encoder that turns visual + audio + music into a clip
#[async_trait]
pub trait VideoComposer: Send + Sync {
    async fn compose(
        &self,
        inputs: CompositionInputs<'_>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Video metadata sent along with an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub category_id: String,
    pub privacy_status: String,
    pub tags: Vec<String>,
}

/// Video hosting upload target
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a clip; `Ok(false)` when the host declined it
    async fn upload(&self, video: &[u8], metadata: &VideoMetadata, timeout: Duration)
        -> Result<bool>;
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send a clip as an attachment; `Ok(false)` when the transport declined it
    async fn send(&self, video: &[u8], recipient: &str, timeout: Duration) -> Result<bool>;
}

/// Where background music comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicSource {
    Url(String),
    Path(PathBuf),
}

impl From<&str> for MusicSource {
    fn from(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Url(value.to_string())
        } else {
            Self::Path(PathBuf::from(value))
        }
    }
}

/// Read a credential from the environment, if named and set
pub fn credential(env_var: Option<&str>) -> Option<String> {
    env_var
        .and_then(|name| std::env::var(name).ok())
        .filter(|value| !value.trim().is_empty())
}

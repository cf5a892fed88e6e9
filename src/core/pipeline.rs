//! Pipeline definitions and loading.
//!
//! Pipelines are defined in YAML: an ordered list of stages, each with an
//! ordered list of providers, a failure policy and an optional fallback,
//! plus primary/secondary delivery channels. Reordering or removing stages
//! is a configuration change, not a code change.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ArtifactKind;

use super::limits::RunLimits;
use super::stage::{FailurePolicy, StageKind};

/// Configuration mistakes, all detected before a run starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pipeline name cannot be empty")]
    EmptyName,

    #[error("pipeline must have at least one stage")]
    NoStages,

    #[error("stage {0} has an empty name")]
    EmptyStageName(usize),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{0}' has no providers")]
    NoProviders(String),

    #[error("stage '{stage}' lists provider '{provider}' twice")]
    DuplicateProvider { stage: String, provider: String },

    #[error("stage '{stage}': providers '{first}' and '{second}' share rank {rank}")]
    RankTie {
        stage: String,
        rank: usize,
        first: String,
        second: String,
    },

    #[error("stage '{stage}': provider '{provider}' has a zero timeout")]
    ZeroTimeout { stage: String, provider: String },

    #[error("stage '{stage}' ({kind:?}) cannot use provider '{provider}' of type {provider_type}")]
    IncompatibleProvider {
        stage: String,
        kind: StageKind,
        provider: String,
        provider_type: &'static str,
    },

    #[error("stage '{stage}': fallback must be {expected}, got {actual}")]
    FallbackKind {
        stage: String,
        expected: ArtifactKind,
        actual: ArtifactKind,
    },

    #[error("stage '{0}': race width must be at least 1")]
    ZeroRace(String),

    #[error("delivery channel '{0}' has a zero timeout")]
    ZeroChannelTimeout(String),

    #[error("delivery channel '{channel}': {field} contains a line break")]
    HeaderLineBreak { channel: String, field: &'static str },
}

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name (used in CLI)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Fixed input of the first stage
    #[serde(default)]
    pub prompt: String,

    /// Limits for this pipeline (config defaults if absent)
    #[serde(default)]
    pub limits: Option<RunLimits>,

    /// Ordered list of stages to execute
    pub stages: Vec<StageConfig>,

    /// Where the final clip goes
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Pipeline {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let mut seen = HashSet::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.name.is_empty() {
                return Err(ConfigError::EmptyStageName(i));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
            stage.validate()?;
        }

        self.delivery.validate()
    }

    /// Get a stage by name
    pub fn get_stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// A single stage in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name (unique within pipeline)
    pub name: String,

    pub kind: StageKind,

    #[serde(default)]
    pub policy: FailurePolicy,

    /// Prompt template; `{input}` is replaced by upstream text
    pub prompt: Option<String>,

    /// Truncate upstream text before rendering the prompt
    pub max_input_chars: Option<usize>,

    /// Static artifact used when an optional stage exhausts its providers
    pub fallback: Option<FallbackSource>,

    /// Race the top N providers (1 = strictly sequential)
    #[serde(default = "default_race")]
    pub race: usize,

    /// Providers in preference order
    pub providers: Vec<ProviderConfig>,
}

fn default_race() -> usize {
    1
}

impl StageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders(self.name.clone()));
        }
        if self.race == 0 {
            return Err(ConfigError::ZeroRace(self.name.clone()));
        }

        let mut names = HashSet::new();
        let mut ranks: Vec<(usize, &str)> = Vec::with_capacity(self.providers.len());

        for (position, provider) in self.providers.iter().enumerate() {
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider {
                    stage: self.name.clone(),
                    provider: provider.name.clone(),
                });
            }

            if provider.timeout_seconds == Some(0) {
                return Err(ConfigError::ZeroTimeout {
                    stage: self.name.clone(),
                    provider: provider.name.clone(),
                });
            }

            if !provider.kind.supports(self.kind) {
                return Err(ConfigError::IncompatibleProvider {
                    stage: self.name.clone(),
                    kind: self.kind,
                    provider: provider.name.clone(),
                    provider_type: provider.kind.type_name(),
                });
            }

            let rank = provider.rank(position);
            if let Some((_, other)) = ranks.iter().find(|(r, _)| *r == rank) {
                return Err(ConfigError::RankTie {
                    stage: self.name.clone(),
                    rank,
                    first: (*other).to_string(),
                    second: provider.name.clone(),
                });
            }
            ranks.push((rank, &provider.name));
        }

        if let Some(FallbackSource::Text { .. }) = self.fallback {
            if self.kind.output() != ArtifactKind::Text {
                return Err(ConfigError::FallbackKind {
                    stage: self.name.clone(),
                    expected: self.kind.output(),
                    actual: ArtifactKind::Text,
                });
            }
        }

        Ok(())
    }
}

/// Static fallback artifact
///
/// - From a file: `fallback: { path: assets/stock.jpg }`
/// - Inline text: `fallback: { text: "..." }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FallbackSource {
    Path { path: PathBuf },
    Text { text: String },
}

/// A provider entry in a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (unique within the stage)
    pub name: String,

    /// Explicit rank; defaults to the position in the list
    pub rank: Option<usize>,

    /// Per-attempt timeout (uses limits.default_timeout_seconds if not set)
    pub timeout_seconds: Option<u64>,

    #[serde(flatten)]
    pub kind: ProviderKind,
}

impl ProviderConfig {
    pub fn rank(&self, position: usize) -> usize {
        self.rank.unwrap_or(position)
    }
}

/// Supported provider backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (DeepSeek, OpenAI, ...)
    OpenaiChat {
        base_url: String,
        model: String,
        api_key_env: Option<String>,
        system_prompt: Option<String>,
    },

    /// OpenAI-compatible image generation
    OpenaiImage {
        base_url: String,
        model: String,
        api_key_env: Option<String>,
        size: Option<String>,
    },

    /// Hugging Face inference API text-to-image
    HuggingFace {
        model: String,
        api_key_env: Option<String>,
        base_url: Option<String>,
    },

    /// `edge-tts` command line synthesizer
    EdgeTts {
        voice: String,
        binary: Option<String>,
    },

    /// `ffmpeg` compositor
    Ffmpeg {
        binary: Option<String>,
        /// Background music: URL or local path
        music: Option<String>,
        #[serde(default = "default_duration")]
        duration_seconds: u32,
        #[serde(default = "default_music_volume")]
        music_volume: f32,
        #[serde(default = "default_width")]
        width: u32,
        #[serde(default = "default_height")]
        height: u32,
    },

    /// A file on disk, served as the stage's output
    Static { path: PathBuf },
}

fn default_duration() -> u32 {
    15
}
fn default_music_volume() -> f32 {
    0.1
}
fn default_width() -> u32 {
    1080
}
fn default_height() -> u32 {
    1920
}

impl ProviderKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::OpenaiChat { .. } => "openai_chat",
            Self::OpenaiImage { .. } => "openai_image",
            Self::HuggingFace { .. } => "hugging_face",
            Self::EdgeTts { .. } => "edge_tts",
            Self::Ffmpeg { .. } => "ffmpeg",
            Self::Static { .. } => "static",
        }
    }

    /// Whether this backend can serve a stage of the given kind
    pub fn supports(&self, kind: StageKind) -> bool {
        match self {
            Self::OpenaiChat { .. } => kind == StageKind::Script,
            Self::OpenaiImage { .. } | Self::HuggingFace { .. } => kind == StageKind::Visuals,
            Self::EdgeTts { .. } => kind == StageKind::Voice,
            Self::Ffmpeg { .. } => kind == StageKind::Compose,
            Self::Static { .. } => true,
        }
    }
}

/// Primary and secondary delivery channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub primary: Option<ChannelConfig>,
    pub secondary: Option<ChannelConfig>,
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .try_for_each(ChannelConfig::validate)
    }
}

/// A delivery channel entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Display name (defaults to the channel type)
    pub name: Option<String>,

    /// Per-attempt timeout (uses limits.default_timeout_seconds if not set)
    pub timeout_seconds: Option<u64>,

    #[serde(flatten)]
    pub kind: ChannelKind,
}

impl ChannelConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.type_name().to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == Some(0) {
            return Err(ConfigError::ZeroChannelTimeout(self.display_name()));
        }

        for (field, value) in self.kind.header_fields() {
            if value.contains(['\r', '\n']) {
                return Err(ConfigError::HeaderLineBreak {
                    channel: self.display_name(),
                    field,
                });
            }
        }

        Ok(())
    }
}

/// Supported delivery channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelKind {
    /// YouTube resumable upload
    Youtube {
        access_token_env: String,
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default = "default_category")]
        category_id: String,
        #[serde(default = "default_privacy")]
        privacy_status: String,
        #[serde(default)]
        tags: Vec<String>,
    },

    /// Email with the clip attached, handed to a sendmail-compatible binary
    Email {
        recipient: String,
        sender: Option<String>,
        #[serde(default = "default_subject")]
        subject: String,
        #[serde(default = "default_body")]
        body: String,
        sendmail: Option<String>,
    },

    /// Email with the clip attached, sent through an authenticated SMTP relay
    Smtp {
        host: String,
        #[serde(default = "default_smtp_port")]
        port: u16,
        /// Upgrade a plain connection instead of connecting over TLS
        #[serde(default)]
        starttls: bool,
        username: String,
        password_env: String,
        recipient: String,
        sender: Option<String>,
        #[serde(default = "default_subject")]
        subject: String,
        #[serde(default = "default_body")]
        body: String,
    },
}

fn default_category() -> String {
    "27".to_string()
}
fn default_privacy() -> String {
    "public".to_string()
}
fn default_smtp_port() -> u16 {
    465
}
fn default_subject() -> String {
    "Video ready (upload failed or skipped)".to_string()
}
fn default_body() -> String {
    "The upload did not go through, but the video is attached.".to_string()
}

impl ChannelKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Youtube { .. } => "youtube",
            Self::Email { .. } => "email",
            Self::Smtp { .. } => "smtp",
        }
    }

    /// Values that end up in mail headers
    fn header_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Youtube { .. } => Vec::new(),
            Self::Email {
                recipient,
                sender,
                subject,
                ..
            }
            | Self::Smtp {
                recipient,
                sender,
                subject,
                ..
            } => {
                let mut fields = vec![
                    ("recipient", recipient.as_str()),
                    ("subject", subject.as_str()),
                ];
                if let Some(sender) = sender {
                    fields.push(("sender", sender.as_str()));
                }
                fields
            }
        }
    }
}

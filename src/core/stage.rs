//! Pipeline stages.
//!
//! A `Stage` wraps one step of the pipeline (script, visuals, voice,
//! compose) around a `ProviderChain`, and decides what a chain failure means
//! for the run through its `FailurePolicy`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{Artifact, ArtifactKind, Payload, StageResult, CANCELLED};

use super::chain::{ChainError, ProviderChain, StageInput};
use super::limits::RunBudget;
use super::pipeline::ConfigError;
use super::store::ArtifactStore;

/// Placeholder in a stage prompt template replaced by the upstream text
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// What a stage produces and consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Prompt -> narration text
    Script,
    /// Text -> still image
    Visuals,
    /// Text -> narration audio
    Voice,
    /// Image (+ audio) -> video
    Compose,
}

impl StageKind {
    pub fn output(&self) -> ArtifactKind {
        match self {
            Self::Script => ArtifactKind::Text,
            Self::Visuals => ArtifactKind::Image,
            Self::Voice => ArtifactKind::Audio,
            Self::Compose => ArtifactKind::Video,
        }
    }

    /// Inputs without which the stage cannot run at all
    pub fn requires(&self) -> &'static [ArtifactKind] {
        match self {
            Self::Script => &[],
            Self::Visuals | Self::Voice => &[ArtifactKind::Text],
            Self::Compose => &[ArtifactKind::Image],
        }
    }
}

/// What a chain failure means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stage failure aborts the run
    #[default]
    Critical,
    /// Stage failure degrades the run (fallback artifact, or nothing)
    Optional,
}

/// One configured pipeline step. Never mutated during a run.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    pub policy: FailurePolicy,

    /// Prompt template; `{input}` is replaced by the upstream text
    pub prompt: Option<String>,

    /// Truncate upstream text to this many characters before rendering
    pub max_input_chars: Option<usize>,

    /// Used when the stage is optional and every provider failed
    pub fallback: Option<Arc<Artifact>>,

    chain: ProviderChain,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        kind: StageKind,
        policy: FailurePolicy,
        chain: ProviderChain,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            policy,
            prompt: None,
            max_input_chars: None,
            fallback: None,
            chain,
        }
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt = Some(template.into());
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = Some(max);
        self
    }

    /// Static artifact to fall back on. Must match the stage's output kind.
    pub fn with_fallback(mut self, payload: Payload) -> Result<Self, ConfigError> {
        if payload.kind() != self.kind.output() {
            return Err(ConfigError::FallbackKind {
                stage: self.name,
                expected: self.kind.output(),
                actual: payload.kind(),
            });
        }
        self.fallback = Some(Arc::new(Artifact::new(self.name.clone(), payload)));
        Ok(self)
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    pub fn is_critical(&self) -> bool {
        self.policy == FailurePolicy::Critical
    }

    /// Text handed to providers: the template rendered with the upstream
    /// text. The first stage reads the run prompt; later stages read the
    /// newest text in the store.
    pub fn render_input(&self, run_prompt: &str, store: &ArtifactStore) -> Option<String> {
        let upstream = match self.kind {
            StageKind::Script => Some(store.latest_text().unwrap_or(run_prompt)),
            _ => store.latest_text(),
        };

        let upstream = upstream.map(|text| match self.max_input_chars {
            Some(max) => text.chars().take(max).collect::<String>(),
            None => text.to_string(),
        });

        match (&self.prompt, upstream) {
            (Some(template), Some(text)) => Some(template.replace(INPUT_PLACEHOLDER, &text)),
            (Some(template), None) if !template.contains(INPUT_PLACEHOLDER) => {
                Some(template.clone())
            }
            (Some(_), None) => None,
            (None, text) => text,
        }
    }

    /// First required input this stage cannot find
    fn missing_input(&self, text: Option<&str>, store: &ArtifactStore) -> Option<ArtifactKind> {
        self.kind.requires().iter().copied().find(|kind| match kind {
            ArtifactKind::Text => text.is_none(),
            other => store.latest(*other).is_none(),
        })
    }

    /// Run the stage. Never fails: the outcome, including chain exhaustion
    /// and cancellation, is reported in the `StageResult`.
    pub async fn run(
        &self,
        run_prompt: &str,
        previous: Option<&Arc<Artifact>>,
        store: &ArtifactStore,
        budget: &RunBudget,
        cancel: &CancellationToken,
    ) -> StageResult {
        let text = self.render_input(run_prompt, store);

        if let Some(kind) = self.missing_input(text.as_deref(), store) {
            let reason = format!("missing required {} input", kind);
            warn!(stage = %self.name, %reason, "Stage cannot run");
            return self.on_failure(Vec::new(), reason);
        }

        let input = StageInput {
            text: text.as_deref(),
            previous,
            store,
        };

        match self.chain.resolve(&input, budget, cancel).await {
            Ok(resolved) => {
                info!(stage = %self.name, provider = %resolved.provider, "Stage succeeded");
                let artifact = Arc::new(resolved.artifact);
                StageResult::success(self.name.clone(), artifact, resolved.attempts)
            }
            Err(ChainError::Cancelled { attempts }) => {
                StageResult::failed(self.name.clone(), attempts, CANCELLED)
            }
            Err(err) => {
                let reason = err.to_string();
                self.on_failure(err.into_attempts(), reason)
            }
        }
    }

    fn on_failure(
        &self,
        attempts: Vec<crate::domain::ProviderAttempt>,
        reason: String,
    ) -> StageResult {
        match (self.policy, &self.fallback) {
            (FailurePolicy::Optional, Some(fallback)) => {
                warn!(stage = %self.name, %reason, "Using fallback artifact");
                StageResult::degraded(self.name.clone(), fallback.clone(), attempts, reason)
            }
            _ => StageResult::failed(self.name.clone(), attempts, reason),
        }
    }
}

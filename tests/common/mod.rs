//! Fake providers and channels shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use clipforge::core::{
    DeliveryChannel, FailurePolicy, Provider, ProviderChain, ProviderSpec, Stage, StageInput,
    StageKind,
};
use clipforge::domain::{Artifact, ArtifactKind, Payload, ProviderError};

/// What a fake provider does when called
#[derive(Clone)]
pub enum Behavior {
    Succeed(Payload),
    Transient,
    Fatal,
    /// Sleep before succeeding
    Slow(Duration, Payload),
    /// Return the newest image in the store as a video
    WrapLatestImage,
}

pub struct FakeProvider {
    behavior: Behavior,
    calls: AtomicUsize,
    seen: Mutex<Vec<Option<String>>>,
}

impl FakeProvider {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(payload: Payload) -> Arc<Self> {
        Self::new(Behavior::Succeed(payload))
    }

    pub fn transient() -> Arc<Self> {
        Self::new(Behavior::Transient)
    }

    pub fn fatal() -> Arc<Self> {
        Self::new(Behavior::Fatal)
    }

    pub fn slow(secs: u64, payload: Payload) -> Arc<Self> {
        Self::new(Behavior::Slow(Duration::from_secs(secs), payload))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Text inputs received, one per call
    pub fn inputs(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn produce(
        &self,
        input: &StageInput<'_>,
        _timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(input.text.map(str::to_string));

        match &self.behavior {
            Behavior::Succeed(payload) => Ok(payload.clone()),
            Behavior::Transient => Err(ProviderError::transient("503 service unavailable")),
            Behavior::Fatal => Err(ProviderError::fatal("401 unauthorized")),
            Behavior::Slow(delay, payload) => {
                tokio::time::sleep(*delay).await;
                Ok(payload.clone())
            }
            Behavior::WrapLatestImage => input
                .store
                .latest(ArtifactKind::Image)
                .map(|image| Payload::Video(image.payload.as_bytes().to_vec()))
                .ok_or_else(|| ProviderError::fatal("no image")),
        }
    }
}

pub fn text(s: &str) -> Payload {
    Payload::Text(s.to_string())
}

pub fn spec(name: &str, rank: usize, provider: Arc<FakeProvider>) -> ProviderSpec {
    ProviderSpec::new(name, rank, Duration::from_secs(30), provider)
}

pub fn spec_with_timeout(
    name: &str,
    rank: usize,
    secs: u64,
    provider: Arc<FakeProvider>,
) -> ProviderSpec {
    ProviderSpec::new(name, rank, Duration::from_secs(secs), provider)
}

pub fn stage(
    name: &str,
    kind: StageKind,
    policy: FailurePolicy,
    providers: Vec<ProviderSpec>,
) -> Stage {
    let chain = ProviderChain::new(name, kind.output(), providers).unwrap();
    Stage::new(name, kind, policy, chain)
}

/// script -> visuals -> voice -> compose, one provider each
pub struct FourStages {
    pub script: Arc<FakeProvider>,
    pub visuals: Arc<FakeProvider>,
    pub voice: Arc<FakeProvider>,
    pub compose: Arc<FakeProvider>,
}

impl FourStages {
    pub fn healthy() -> Self {
        Self {
            script: FakeProvider::ok(text("The future of AI is now.")),
            visuals: FakeProvider::ok(Payload::Image(vec![0xFF, 0xD8, 0xFF])),
            voice: FakeProvider::ok(Payload::Audio(vec![0x49, 0x44, 0x33])),
            compose: FakeProvider::new(Behavior::WrapLatestImage),
        }
    }

    pub fn stages(&self, visuals_policy: FailurePolicy) -> Vec<Stage> {
        vec![
            stage(
                "script",
                StageKind::Script,
                FailurePolicy::Critical,
                vec![spec("llm", 0, self.script.clone())],
            ),
            stage(
                "visuals",
                StageKind::Visuals,
                visuals_policy,
                vec![spec("images", 0, self.visuals.clone())],
            ),
            stage(
                "voice",
                StageKind::Voice,
                FailurePolicy::Optional,
                vec![spec("tts", 0, self.voice.clone())],
            ),
            stage(
                "compose",
                StageKind::Compose,
                FailurePolicy::Critical,
                vec![spec("ffmpeg", 0, self.compose.clone())],
            ),
        ]
    }
}

/// What a fake channel does when called
#[derive(Clone)]
pub enum ChannelBehavior {
    Accept,
    Decline,
    Fail(&'static str),
    /// Never answers within any sane timeout
    Hang,
}

pub struct FakeChannel {
    name: String,
    behavior: ChannelBehavior,
    calls: AtomicUsize,
}

impl FakeChannel {
    pub fn new(name: &str, behavior: ChannelBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for FakeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, _video: &Artifact, _timeout: Duration) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ChannelBehavior::Accept => Ok(true),
            ChannelBehavior::Decline => Ok(false),
            ChannelBehavior::Fail(reason) => anyhow::bail!(reason),
            ChannelBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

//! Bindings from capability backends to stage providers and delivery channels.
//!
//! These decide which upstream artifacts each kind of backend consumes:
//! text and image generators read the rendered stage text, the speech
//! synthesizer reads the script, the composer reads the newest image and
//! (optionally) the newest narration from the run's artifact store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapters::{
    CompositionInputs, ImageGenerator, Mailer, MusicSource, SpeechSynthesizer, TextGenerator,
    Uploader, VideoComposer, VideoMetadata,
};
use crate::domain::{Artifact, ArtifactKind, Payload, ProviderError};

use super::chain::{Provider, StageInput};
use super::delivery::DeliveryChannel;

fn required_text<'a>(input: &StageInput<'a>) -> Result<&'a str, ProviderError> {
    input
        .text
        .ok_or_else(|| ProviderError::fatal("no text input available"))
}

/// Script stage: prompt -> text
pub struct TextProvider {
    generator: Arc<dyn TextGenerator>,
}

impl TextProvider {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Provider for TextProvider {
    async fn produce(
        &self,
        input: &StageInput<'_>,
        timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        let prompt = required_text(input)?;
        let text = self.generator.generate(prompt, timeout).await?;
        Ok(Payload::Text(text.trim().to_string()))
    }
}

/// Visuals stage: text -> image
pub struct ImageProvider {
    generator: Arc<dyn ImageGenerator>,
}

impl ImageProvider {
    pub fn new(generator: Arc<dyn ImageGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Provider for ImageProvider {
    async fn produce(
        &self,
        input: &StageInput<'_>,
        timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        let prompt = required_text(input)?;
        Ok(Payload::Image(self.generator.generate(prompt, timeout).await?))
    }
}

/// Voice stage: text -> narration
pub struct SpeechProvider {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice: String,
}

impl SpeechProvider {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, voice: impl Into<String>) -> Self {
        Self {
            synthesizer,
            voice: voice.into(),
        }
    }
}

#[async_trait]
impl Provider for SpeechProvider {
    async fn produce(
        &self,
        input: &StageInput<'_>,
        timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        let text = required_text(input)?;
        let audio = self.synthesizer.synthesize(text, &self.voice, timeout).await?;
        Ok(Payload::Audio(audio))
    }
}

/// Compose stage: image + narration + music -> clip
pub struct ComposeProvider {
    composer: Arc<dyn VideoComposer>,
    music: Option<MusicSource>,
}

impl ComposeProvider {
    pub fn new(composer: Arc<dyn VideoComposer>, music: Option<MusicSource>) -> Self {
        Self { composer, music }
    }
}

#[async_trait]
impl Provider for ComposeProvider {
    async fn produce(
        &self,
        input: &StageInput<'_>,
        timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        let visual = input
            .store
            .latest(ArtifactKind::Image)
            .ok_or_else(|| ProviderError::fatal("no visual to compose"))?;
        let audio = input.store.latest(ArtifactKind::Audio);

        let inputs = CompositionInputs {
            visual: visual.payload.as_bytes(),
            audio: audio.map(|a| a.payload.as_bytes()),
            music: self.music.as_ref(),
        };

        Ok(Payload::Video(self.composer.compose(inputs, timeout).await?))
    }
}

/// A fixed payload (stock image, canned script, pre-rendered clip)
pub struct StaticProvider {
    payload: Payload,
}

impl StaticProvider {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    async fn produce(
        &self,
        _input: &StageInput<'_>,
        _timeout: Duration,
    ) -> Result<Payload, ProviderError> {
        Ok(self.payload.clone())
    }
}

/// Upload target as a delivery channel
pub struct UploadChannel {
    name: String,
    uploader: Arc<dyn Uploader>,
    metadata: VideoMetadata,
}

impl UploadChannel {
    pub fn new(
        name: impl Into<String>,
        uploader: Arc<dyn Uploader>,
        metadata: VideoMetadata,
    ) -> Self {
        Self {
            name: name.into(),
            uploader,
            metadata,
        }
    }
}

#[async_trait]
impl DeliveryChannel for UploadChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, video: &Artifact, timeout: Duration) -> Result<bool> {
        self.uploader
            .upload(video.payload.as_bytes(), &self.metadata, timeout)
            .await
    }
}

/// Mail transport as a delivery channel
pub struct MailChannel {
    name: String,
    mailer: Arc<dyn Mailer>,
    recipient: String,
}

impl MailChannel {
    pub fn new(
        name: impl Into<String>,
        mailer: Arc<dyn Mailer>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mailer,
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for MailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, video: &Artifact, timeout: Duration) -> Result<bool> {
        self.mailer
            .send(video.payload.as_bytes(), &self.recipient, timeout)
            .await
    }
}

//! Turns a declarative `Pipeline` into runnable stages and delivery channels.
//!
//! Credentials are read from the environment here, once. A missing
//! credential does not stop the build: the provider is created anyway and
//! fails fatally when called, so its chain falls through to the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{
    credential, CompositionSettings, EdgeTts, FfmpegComposer, HuggingFaceImages, MusicSource,
    OpenAiChat, OpenAiImages, SendmailMailer, SmtpMailer, SmtpServer, VideoMetadata,
    YouTubeUploader,
};
use crate::config::ResolvedConfig;
use crate::core::{
    ChannelConfig, ChannelKind, ChannelSpec, ComposeProvider, DeliveryChannel, DeliveryFanout,
    FailurePolicy, FallbackSource, ImageProvider, MailChannel, Orchestrator, Pipeline, Provider,
    ProviderChain, ProviderKind, ProviderSpec, RunLimits, SpeechProvider, Stage, StageConfig,
    StageKind, StaticProvider, TextProvider, UploadChannel,
};
use crate::domain::{ArtifactKind, Payload};

/// Build an orchestrator for a validated pipeline. Relative file paths in
/// the pipeline (fallbacks, static providers, music) resolve against
/// `base_dir`.
pub fn build_orchestrator(
    pipeline: &Pipeline,
    config: &ResolvedConfig,
    base_dir: &Path,
) -> Result<Orchestrator> {
    pipeline.validate()?;

    let limits = pipeline.limits.clone().unwrap_or_else(|| config.limits.clone());

    let stages = pipeline
        .stages
        .iter()
        .map(|stage| build_stage(stage, &limits, base_dir))
        .collect::<Result<Vec<_>>>()?;

    let primary = pipeline
        .delivery
        .primary
        .as_ref()
        .map(|channel| build_channel(channel, &limits));
    let secondary = pipeline
        .delivery
        .secondary
        .as_ref()
        .map(|channel| build_channel(channel, &limits));

    let orchestrator = Orchestrator::new(pipeline.name.clone(), stages)?
        .with_prompt(pipeline.prompt.clone())
        .with_limits(limits)
        .with_delivery(DeliveryFanout::new(primary, secondary))
        .with_journal(config.runs_dir());

    Ok(orchestrator)
}

fn build_stage(config: &StageConfig, limits: &RunLimits, base_dir: &Path) -> Result<Stage> {
    let output = config.kind.output();

    let providers = config
        .providers
        .iter()
        .enumerate()
        .map(|(position, provider)| {
            let binding = build_provider(&provider.kind, output, base_dir)
                .with_context(|| format!("Stage '{}': provider '{}'", config.name, provider.name))?;
            Ok(ProviderSpec::new(
                provider.name.clone(),
                provider.rank(position),
                limits.timeout(provider.timeout_seconds),
                binding,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let chain = ProviderChain::new(config.name.clone(), output, providers)?
        .with_race(config.race)
        .with_limits(limits.clone());

    let mut stage = Stage::new(config.name.clone(), config.kind, config.policy, chain);
    if let Some(prompt) = &config.prompt {
        stage = stage.with_prompt(prompt.clone());
    }
    if let Some(max) = config.max_input_chars {
        stage = stage.with_max_input_chars(max);
    }
    if let Some(source) = &config.fallback {
        if config.policy == FailurePolicy::Critical {
            warn!(stage = %config.name, "Fallback on a critical stage is never used");
        }
        let payload = load_fallback(source, output, base_dir)
            .with_context(|| format!("Stage '{}': failed to load fallback", config.name))?;
        stage = stage.with_fallback(payload)?;
    }

    debug!(
        stage = %config.name,
        kind = ?config.kind,
        providers = config.providers.len(),
        "Built stage"
    );
    Ok(stage)
}

fn build_provider(
    kind: &ProviderKind,
    output: ArtifactKind,
    base_dir: &Path,
) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::OpenaiChat {
            base_url,
            model,
            api_key_env,
            system_prompt,
        } => {
            let key = api_key(api_key_env.as_deref());
            let chat = OpenAiChat::new(base_url.clone(), model.clone(), key)
                .with_system_prompt(system_prompt.clone());
            Arc::new(TextProvider::new(Arc::new(chat)))
        }

        ProviderKind::OpenaiImage {
            base_url,
            model,
            api_key_env,
            size,
        } => {
            let key = api_key(api_key_env.as_deref());
            let images =
                OpenAiImages::new(base_url.clone(), model.clone(), key).with_size(size.clone());
            Arc::new(ImageProvider::new(Arc::new(images)))
        }

        ProviderKind::HuggingFace {
            model,
            api_key_env,
            base_url,
        } => {
            let images = HuggingFaceImages::new(model.clone(), api_key(api_key_env.as_deref()))
                .with_base_url(base_url.clone());
            Arc::new(ImageProvider::new(Arc::new(images)))
        }

        ProviderKind::EdgeTts { voice, binary } => {
            let tts = match binary {
                Some(binary) => EdgeTts::with_binary_path(binary.clone()),
                None => EdgeTts::new(),
            };
            Arc::new(SpeechProvider::new(Arc::new(tts), voice.clone()))
        }

        ProviderKind::Ffmpeg {
            binary,
            music,
            duration_seconds,
            music_volume,
            width,
            height,
        } => {
            let settings = CompositionSettings {
                duration_seconds: *duration_seconds,
                music_volume: *music_volume,
                width: *width,
                height: *height,
            };
            let composer = FfmpegComposer::new(settings).with_binary_path(binary.clone());
            let music = music.as_deref().map(|m| match MusicSource::from(m) {
                MusicSource::Path(path) => MusicSource::Path(resolve(base_dir, &path)),
                url => url,
            });
            Arc::new(ComposeProvider::new(Arc::new(composer), music))
        }

        ProviderKind::Static { path } => {
            let payload = read_payload(&resolve(base_dir, path), output)?;
            Arc::new(StaticProvider::new(payload))
        }
    };

    Ok(provider)
}

fn build_channel(config: &ChannelConfig, limits: &RunLimits) -> ChannelSpec {
    let name = config.display_name();

    let channel: Arc<dyn DeliveryChannel> = match &config.kind {
        ChannelKind::Youtube {
            access_token_env,
            title,
            description,
            category_id,
            privacy_status,
            tags,
        } => {
            let uploader = YouTubeUploader::new(api_key(Some(access_token_env)));
            let metadata = VideoMetadata {
                title: title.clone(),
                description: description.clone(),
                category_id: category_id.clone(),
                privacy_status: privacy_status.clone(),
                tags: tags.clone(),
            };
            Arc::new(UploadChannel::new(name, Arc::new(uploader), metadata))
        }

        ChannelKind::Email {
            recipient,
            sender,
            subject,
            body,
            sendmail,
        } => {
            let mailer = SendmailMailer::new(subject.clone(), body.clone())
                .with_sender(sender.clone())
                .with_binary_path(sendmail.clone());
            Arc::new(MailChannel::new(name, Arc::new(mailer), recipient.clone()))
        }

        ChannelKind::Smtp {
            host,
            port,
            starttls,
            username,
            password_env,
            recipient,
            sender,
            subject,
            body,
        } => {
            let server = SmtpServer {
                host: host.clone(),
                port: *port,
                starttls: *starttls,
                username: username.clone(),
            };
            let password = api_key(Some(password_env));
            let mailer = SmtpMailer::new(server, password, subject.clone(), body.clone())
                .with_sender(sender.clone());
            Arc::new(MailChannel::new(name, Arc::new(mailer), recipient.clone()))
        }
    };

    ChannelSpec::new(channel, limits.timeout(config.timeout_seconds))
}

/// Load a stage's static fallback artifact
pub fn load_fallback(
    source: &FallbackSource,
    kind: ArtifactKind,
    base_dir: &Path,
) -> Result<Payload> {
    match source {
        FallbackSource::Text { text } => Ok(Payload::Text(text.clone())),
        FallbackSource::Path { path } => read_payload(&resolve(base_dir, path), kind),
    }
}

fn read_payload(path: &Path, kind: ArtifactKind) -> Result<Payload> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("{} is empty", path.display());
    }
    Payload::from_bytes(kind, bytes)
        .with_context(|| format!("{} is not valid UTF-8 text", path.display()))
}

fn api_key(env_var: Option<&str>) -> Option<String> {
    let key = credential(env_var);
    if let (Some(name), None) = (env_var, &key) {
        warn!(env_var = name, "Credential not set, provider will fail when called");
    }
    key
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Stage kinds in a pipeline, in order (for `validate` output)
pub fn stage_kinds(pipeline: &Pipeline) -> Vec<(String, StageKind, FailurePolicy)> {
    pipeline
        .stages
        .iter()
        .map(|s| (s.name.clone(), s.kind, s.policy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvOverrides, ResolvedConfig};
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> ResolvedConfig {
        ResolvedConfig::resolve(&EnvOverrides::default(), temp.path(), temp.path().join("home"))
            .unwrap()
    }

    #[test]
    fn test_build_full_pipeline() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stock.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();

        let pipeline = Pipeline::from_yaml(
            r#"
name: short
prompt: Create a high-energy 15-second script about the future of AI.
stages:
  - name: script
    kind: script
    providers:
      - name: deepseek
        type: openai_chat
        base_url: https://api.deepseek.com
        model: deepseek-chat
        api_key_env: CLIPFORGE_TEST_UNSET_KEY
  - name: visuals
    kind: visuals
    policy: optional
    fallback:
      path: stock.jpg
    providers:
      - name: shortapi
        type: openai_image
        base_url: https://api.shortapi.ai/v1
        model: flux-pro
      - name: huggingface
        type: hugging_face
        model: black-forest-labs/FLUX.1-schnell
  - name: voice
    kind: voice
    providers:
      - name: edge
        type: edge_tts
        voice: en-US-ChristopherNeural
  - name: compose
    kind: compose
    providers:
      - name: ffmpeg
        type: ffmpeg
        music: https://www.bensound.com/bensound-music/bensound-epic.mp3
delivery:
  primary:
    type: youtube
    access_token_env: CLIPFORGE_TEST_UNSET_TOKEN
    title: "AI Revolution #Shorts"
  secondary:
    type: email
    recipient: me@example.com
"#,
        )
        .unwrap();

        let orchestrator = build_orchestrator(&pipeline, &config(&temp), temp.path()).unwrap();

        assert_eq!(orchestrator.pipeline_name(), "short");
        assert_eq!(orchestrator.stages().len(), 4);
        assert!(orchestrator.delivery().is_configured());

        let visuals = &orchestrator.stages()[1];
        assert_eq!(visuals.chain().providers().len(), 2);
        assert_eq!(visuals.chain().providers()[0].name, "shortapi");
        assert_eq!(
            visuals.fallback.as_ref().unwrap().payload,
            Payload::Image(vec![0xFF, 0xD8, 0xFF])
        );
    }

    #[test]
    fn test_build_smtp_channel() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::from_yaml(
            r#"
name: short
stages:
  - name: script
    kind: script
    providers:
      - name: canned
        type: static
        path: script.txt
delivery:
  secondary:
    type: smtp
    host: smtp.gmail.com
    username: bot@gmail.com
    password_env: CLIPFORGE_TEST_UNSET_PASSWORD
    recipient: bot@gmail.com
    timeout_seconds: 45
"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("script.txt"), "A canned script").unwrap();

        let secondary = pipeline.delivery.secondary.as_ref().unwrap();
        assert!(matches!(
            &secondary.kind,
            ChannelKind::Smtp { port: 465, starttls: false, .. }
        ));
        assert_eq!(secondary.display_name(), "smtp");

        let orchestrator = build_orchestrator(&pipeline, &config(&temp), temp.path()).unwrap();
        assert!(orchestrator.delivery().is_configured());
    }

    #[test]
    fn test_missing_fallback_file() {
        let temp = TempDir::new().unwrap();
        let pipeline = Pipeline::from_yaml(
            r#"
name: short
stages:
  - name: visuals
    kind: visuals
    policy: optional
    fallback:
      path: does-not-exist.jpg
    providers:
      - name: hf
        type: hugging_face
        model: flux
"#,
        )
        .unwrap();

        let err = build_orchestrator(&pipeline, &config(&temp), temp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to load fallback"));
    }

    #[test]
    fn test_text_fallback() {
        let payload = load_fallback(
            &FallbackSource::Text {
                text: "A canned script".to_string(),
            },
            ArtifactKind::Text,
            Path::new("."),
        )
        .unwrap();
        assert_eq!(payload, Payload::Text("A canned script".to_string()));
    }
}

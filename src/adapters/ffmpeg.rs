//! Video composition through the `ffmpeg` command line tool.
//!
//! A still image is looped, scaled and cropped to portrait format with a
//! slow zoom, narration is laid over it and mixed with a quiet music bed.
//! All inputs and the output live in a temporary directory that is removed
//! on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{CompositionInputs, MusicSource, VideoComposer};
use crate::domain::ProviderError;

const FRAME_RATE: u32 = 25;

/// Output format of a composition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionSettings {
    pub duration_seconds: u32,
    pub music_volume: f32,
    pub width: u32,
    pub height: u32,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            duration_seconds: 15,
            music_volume: 0.1,
            width: 1080,
            height: 1920,
        }
    }
}

/// Build the ffmpeg argument list. Without narration a silent track is
/// generated; without music the narration is used as is.
pub fn build_args(
    settings: &CompositionSettings,
    image: &Path,
    narration: Option<&Path>,
    music: Option<&Path>,
    output: &Path,
) -> Vec<String> {
    let CompositionSettings {
        duration_seconds,
        music_volume,
        width,
        height,
    } = *settings;

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loop".into(),
        "1".into(),
        "-i".into(),
        path_arg(image),
    ];

    match narration {
        Some(path) => args.extend(["-i".into(), path_arg(path)]),
        None => args.extend([
            "-f".into(),
            "lavfi".into(),
            "-t".into(),
            duration_seconds.to_string(),
            "-i".into(),
            "anullsrc=channel_layout=stereo:sample_rate=44100".into(),
        ]),
    }

    if let Some(path) = music {
        args.extend(["-i".into(), path_arg(path)]);
    }

    let video = format!(
        "[0:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},\
         zoompan=z='min(zoom+0.0015,1.5)':d={frames}:s={w}x{h}:fps={fps}[v]",
        w = width,
        h = height,
        frames = duration_seconds * FRAME_RATE,
        fps = FRAME_RATE,
    );
    let audio = match music {
        Some(_) => format!(
            "[2:a]volume={}[m];[1:a][m]amix=inputs=2:duration=first[a]",
            music_volume
        ),
        None => "[1:a]anull[a]".to_string(),
    };

    args.extend([
        "-filter_complex".into(),
        format!("{};{}", video, audio),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "[a]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-t".into(),
        duration_seconds.to_string(),
        path_arg(output),
    ]);

    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `ffmpeg` subprocess composer
pub struct FfmpegComposer {
    binary_path: String,
    settings: CompositionSettings,
    client: reqwest::Client,
}

impl FfmpegComposer {
    pub fn new(settings: CompositionSettings) -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            settings,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_binary_path(mut self, binary_path: Option<String>) -> Self {
        if let Some(binary_path) = binary_path {
            self.binary_path = binary_path;
        }
        self
    }

    /// Music is decoration: any problem fetching it means no music
    async fn fetch_music(
        &self,
        source: &MusicSource,
        dir: &Path,
        limit: Duration,
    ) -> Option<PathBuf> {
        match source {
            MusicSource::Path(path) => {
                if path.exists() {
                    Some(path.clone())
                } else {
                    warn!(path = %path.display(), "Music file not found, composing without music");
                    None
                }
            }
            MusicSource::Url(url) => {
                let target = dir.join("music.mp3");
                let fetched = async {
                    let response = self
                        .client
                        .get(url)
                        .timeout(limit)
                        .send()
                        .await?
                        .error_for_status()?;
                    Ok::<_, reqwest::Error>(response.bytes().await?)
                }
                .await;

                match fetched {
                    Ok(bytes) => match tokio::fs::write(&target, &bytes).await {
                        Ok(()) => Some(target),
                        Err(e) => {
                            warn!(error = %e, "Failed to save music, composing without music");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(
                            %url,
                            error = %e,
                            "Failed to download music, composing without music"
                        );
                        None
                    }
                }
            }
        }
    }
}

/// ffmpeg picks the image decoder by file extension
fn image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        "webp"
    } else {
        "jpg"
    }
}

#[async_trait]
impl VideoComposer for FfmpegComposer {
    async fn compose(
        &self,
        inputs: CompositionInputs<'_>,
        limit: Duration,
    ) -> Result<Vec<u8>, ProviderError> {
        let io =
            |e: std::io::Error| ProviderError::transient(format!("composition workspace: {}", e));

        let workdir = TempDir::new().map_err(io)?;
        let image = workdir.path().join(format!("scene.{}", image_extension(inputs.visual)));
        let output = workdir.path().join("final.mp4");

        tokio::fs::write(&image, inputs.visual).await.map_err(io)?;

        let narration = match inputs.audio {
            Some(audio) => {
                let path = workdir.path().join("voice.mp3");
                tokio::fs::write(&path, audio).await.map_err(io)?;
                Some(path)
            }
            None => None,
        };

        let music = match inputs.music {
            Some(source) => self.fetch_music(source, workdir.path(), limit).await,
            None => None,
        };

        let args = build_args(
            &self.settings,
            &image,
            narration.as_deref(),
            music.as_deref(),
            &output,
        );
        debug!(binary = %self.binary_path, ?args, "Running ffmpeg");

        let child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::fatal(format!("failed to spawn {}: {}", self.binary_path, e))
            })?;

        let result = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::timed_out(limit))?
            .map_err(|e| ProviderError::transient(format!("ffmpeg did not finish: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(ProviderError::transient(format!(
                "ffmpeg failed with exit code {}: {}",
                result.status.code().unwrap_or(-1),
                tail
            )));
        }

        tokio::fs::read(&output)
            .await
            .map_err(|e| ProviderError::transient(format!("ffmpeg wrote no video: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(args: &[String]) -> String {
        args.join(" ")
    }

    #[test]
    fn test_args_with_narration_and_music() {
        let args = build_args(
            &CompositionSettings::default(),
            Path::new("/w/scene.jpg"),
            Some(Path::new("/w/voice.mp3")),
            Some(Path::new("/w/music.mp3")),
            Path::new("/w/final.mp4"),
        );
        let line = joined(&args);

        assert!(line.starts_with("-y -loop 1 -i /w/scene.jpg -i /w/voice.mp3 -i /w/music.mp3"));
        assert!(
            line.contains("scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920")
        );
        assert!(line.contains("d=375:s=1080x1920"));
        assert!(line.contains("[2:a]volume=0.1[m];[1:a][m]amix=inputs=2:duration=first[a]"));
        assert!(line.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert!(line.ends_with("-t 15 /w/final.mp4"));
    }

    #[test]
    fn test_args_without_narration_use_silence() {
        let args = build_args(
            &CompositionSettings::default(),
            Path::new("scene.jpg"),
            None,
            None,
            Path::new("out.mp4"),
        );
        let line = joined(&args);

        assert!(line.contains("-f lavfi -t 15 -i anullsrc"));
        assert!(line.contains("[1:a]anull[a]"));
        assert!(!line.contains("amix"));
    }

    #[test]
    fn test_custom_format() {
        let settings = CompositionSettings {
            duration_seconds: 10,
            music_volume: 0.25,
            width: 720,
            height: 1280,
        };
        let args = build_args(
            &settings,
            Path::new("a.jpg"),
            Some(Path::new("b.mp3")),
            Some(Path::new("c.mp3")),
            Path::new("d.mp4"),
        );
        let line = joined(&args);

        assert!(line.contains("crop=720:1280"));
        assert!(line.contains("volume=0.25"));
        assert!(line.contains("-t 10 d.mp4"));
    }

    #[test]
    fn test_image_extension_sniffed() {
        assert_eq!(image_extension(b"\x89PNG\r\n\x1a\n"), "png");
        assert_eq!(image_extension(b"RIFF\0\0\0\0WEBPVP8 "), "webp");
        assert_eq!(image_extension(&[0xFF, 0xD8, 0xFF]), "jpg");
    }
}

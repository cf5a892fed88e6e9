//! Speech synthesis through the `edge-tts` command line tool.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;

use super::SpeechSynthesizer;
use crate::domain::ProviderError;

/// `edge-tts` subprocess synthesizer
pub struct EdgeTts {
    /// Path to the edge-tts binary (default: "edge-tts")
    binary_path: String,
}

impl Default for EdgeTts {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeTts {
    pub fn new() -> Self {
        Self {
            binary_path: "edge-tts".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        limit: Duration,
    ) -> Result<Vec<u8>, ProviderError> {
        let workdir =
            TempDir::new().map_err(|e| ProviderError::transient(format!("temp dir: {}", e)))?;
        let text_path = workdir.path().join("script.txt");
        let media_path = workdir.path().join("voice.mp3");

        tokio::fs::write(&text_path, text)
            .await
            .map_err(|e| ProviderError::transient(format!("write script: {}", e)))?;

        // Script goes through a file; long narrations overflow argv
        let child = Command::new(&self.binary_path)
            .arg("--voice")
            .arg(voice)
            .arg("--file")
            .arg(&text_path)
            .arg("--write-media")
            .arg(&media_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::fatal(format!("failed to spawn {}: {}", self.binary_path, e))
            })?;

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::timed_out(limit))?
            .map_err(|e| ProviderError::transient(format!("edge-tts did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::transient(format!(
                "edge-tts failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        tokio::fs::read(&media_path)
            .await
            .map_err(|e| ProviderError::transient(format!("edge-tts wrote no audio: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_binary_path() {
        let tts = EdgeTts::with_binary_path("/opt/bin/edge-tts");
        assert_eq!(tts.binary_path, "/opt/bin/edge-tts");
        assert_eq!(EdgeTts::default().binary_path, "edge-tts");
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let tts = EdgeTts::with_binary_path("/nonexistent/edge-tts");
        let err = tts
            .synthesize("hello", "en-US-ChristopherNeural", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}

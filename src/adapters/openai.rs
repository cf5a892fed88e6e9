//! OpenAI-compatible HTTP backends.
//!
//! Works against any service exposing `/chat/completions` and
//! `/images/generations` (DeepSeek, OpenAI, ShortAPI, ...).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use super::{ImageGenerator, TextGenerator};
use crate::domain::ProviderError;

/// Response from `/chat/completions`
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Response from `/images/generations`
#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

fn authorized(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> Result<reqwest::RequestBuilder, ProviderError> {
    match api_key {
        Some(key) => Ok(request.bearer_auth(key)),
        None => Err(ProviderError::fatal("API key not configured")),
    }
}

async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, detail.trim().to_string()))
}

/// Chat completion text generator
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    fn messages(&self, prompt: &str) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));
        messages
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let request = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .timeout(timeout)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": self.messages(prompt),
            }));

        let response = checked(authorized(request, self.api_key.as_deref())?.send().await?).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(format!("malformed response: {}", e)))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::transient("malformed response: no completion"))
    }
}

/// Image generation endpoint
pub struct OpenAiImages {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    size: Option<String>,
}

impl OpenAiImages {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            size: None,
        }
    }

    pub fn with_size(mut self, size: Option<String>) -> Self {
        self.size = size;
        self
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let response = checked(self.client.get(url).timeout(timeout).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImages {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
        });
        if let Some(size) = &self.size {
            body["size"] = serde_json::Value::String(size.clone());
        }

        let request = self
            .client
            .post(endpoint(&self.base_url, "images/generations"))
            .timeout(timeout)
            .json(&body);

        let response = checked(authorized(request, self.api_key.as_deref())?.send().await?).await?;

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transient(format!("malformed response: {}", e)))?;

        let image = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::transient("malformed response: no image"))?;

        match (image.b64_json, image.url) {
            (Some(encoded), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ProviderError::transient(format!("malformed response: {}", e))),
            (None, Some(url)) => self.download(&url, timeout).await,
            (None, None) => Err(ProviderError::transient(
                "malformed response: image has no url or data",
            )),
        }
    }
}

//! Hugging Face inference API text-to-image backend.

use std::time::Duration;

use async_trait::async_trait;

use super::ImageGenerator;
use crate::domain::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

/// Text-to-image model served by the inference API
pub struct HuggingFaceImages {
    client: reqwest::Client,
    base_url: String,
    model: String,
    token: Option<String>,
}

impl HuggingFaceImages {
    pub fn new(model: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            token,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url {
            self.base_url = base_url;
        }
        self
    }

    fn url(&self) -> String {
        format!("{}/models/{}", self.base_url.trim_end_matches('/'), self.model)
    }
}

#[async_trait]
impl ImageGenerator for HuggingFaceImages {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let mut request = self
            .client
            .post(self.url())
            .timeout(timeout)
            .json(&serde_json::json!({ "inputs": prompt }));

        // Anonymous requests are allowed, just heavily rate limited
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, detail.trim().to_string()));
        }

        let is_image = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("image/"))
            .unwrap_or(false);

        if !is_image {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::transient(format!(
                "malformed response: expected an image, got {}",
                detail.trim()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

//! YouTube Data API resumable upload.
//!
//! Two requests: the metadata is POSTed to open an upload session, then the
//! clip is PUT to the session URL returned in the `Location` header.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{Uploader, VideoMetadata};

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: Option<String>,
}

/// Request body describing the video
fn metadata_body(metadata: &VideoMetadata) -> serde_json::Value {
    serde_json::json!({
        "snippet": {
            "title": metadata.title,
            "description": metadata.description,
            "categoryId": metadata.category_id,
            "tags": metadata.tags,
        },
        "status": {
            "privacyStatus": metadata.privacy_status,
        }
    })
}

/// YouTube uploader authenticated with an OAuth bearer token
pub struct YouTubeUploader {
    client: reqwest::Client,
    upload_url: String,
    access_token: Option<String>,
}

impl YouTubeUploader {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: UPLOAD_URL.to_string(),
            access_token,
        }
    }

    /// Point at a different endpoint (API proxies, tests)
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    async fn open_session(
        &self,
        token: &str,
        size: usize,
        metadata: &VideoMetadata,
        limit: Duration,
    ) -> Result<String> {
        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", size.to_string())
            .timeout(limit)
            .json(&metadata_body(metadata))
            .send()
            .await
            .context("Failed to open YouTube upload session")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("YouTube rejected the upload session ({}): {}", status, detail.trim());
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .context("YouTube upload session has no Location header")
    }
}

#[async_trait]
impl Uploader for YouTubeUploader {
    async fn upload(
        &self,
        video: &[u8],
        metadata: &VideoMetadata,
        limit: Duration,
    ) -> Result<bool> {
        let token = self
            .access_token
            .as_deref()
            .context("YouTube access token not configured")?;

        let session = self.open_session(token, video.len(), metadata, limit).await?;

        let response = self
            .client
            .put(&session)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .timeout(limit)
            .body(video.to_vec())
            .send()
            .await
            .context("Failed to upload video to YouTube")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("YouTube upload failed ({}): {}", status, detail.trim());
        }

        let uploaded: UploadedVideo = response
            .json()
            .await
            .context("Failed to parse YouTube upload response")?;

        match uploaded.id {
            Some(id) => {
                info!(video_id = %id, title = %metadata.title, "Video is live on YouTube");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

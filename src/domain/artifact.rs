//! Artifacts produced by pipeline stages.
//!
//! An artifact is the typed payload a stage hands downstream. Artifacts are
//! append-only: once produced they are never mutated, only shared.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An artifact produced by a pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Name of the stage that produced this artifact
    pub stage_name: String,

    /// Typed content
    pub payload: Payload,

    /// When the artifact was created
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a new artifact
    pub fn new(stage_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            stage_name: stage_name.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Kind of the payload
    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.payload.as_bytes().len() as u64
    }

    /// First 16 hex chars of the payload's SHA-256
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payload.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Text content, if this is a text artifact
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Serializable description (no payload)
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            stage_name: self.stage_name.clone(),
            kind: self.kind(),
            size_bytes: self.size_bytes(),
            digest: self.digest(),
        }
    }
}

/// Typed artifact content
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image(Vec<u8>),
    Audio(Vec<u8>),
    Video(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Text(_) => ArtifactKind::Text,
            Self::Image(_) => ArtifactKind::Image,
            Self::Audio(_) => ArtifactKind::Audio,
            Self::Video(_) => ArtifactKind::Video,
        }
    }

    /// Raw bytes of the payload (UTF-8 for text)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Image(bytes) | Self::Audio(bytes) | Self::Video(bytes) => bytes,
        }
    }

    /// Build a payload of the given kind from raw bytes
    pub fn from_bytes(
        kind: ArtifactKind,
        bytes: Vec<u8>,
    ) -> Result<Self, std::string::FromUtf8Error> {
        Ok(match kind {
            ArtifactKind::Text => Self::Text(String::from_utf8(bytes)?),
            ArtifactKind::Image => Self::Image(bytes),
            ArtifactKind::Audio => Self::Audio(bytes),
            ArtifactKind::Video => Self::Video(bytes),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

// Media payloads can be megabytes; never dump them into logs.
impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            other => write!(f, "{:?}({} bytes)", other.kind(), other.as_bytes().len()),
        }
    }
}

/// Kinds of artifacts a stage can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Narration script
    Text,

    /// Still visual
    Image,

    /// Narration audio
    Audio,

    /// Composited clip
    Video,
}

impl ArtifactKind {
    /// File extension used when an artifact of this kind is written to disk
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Image => "jpg",
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
        };
        f.write_str(name)
    }
}

/// Artifact metadata recorded in the run journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub stage_name: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub digest: String,
}

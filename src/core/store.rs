//! Per-run artifact namespace.
//!
//! Maps stage name to the artifact that stage produced. One store per run;
//! runs never share a store.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Artifact, ArtifactKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactStoreError {
    #[error("stage '{0}' already produced an artifact in this run")]
    Duplicate(String),
}

/// Append-only map of stage name to produced artifact, in production order
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: Vec<Arc<Artifact>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact. A stage can publish at most once per run.
    pub fn insert(&mut self, artifact: Arc<Artifact>) -> Result<(), ArtifactStoreError> {
        if self.get(&artifact.stage_name).is_some() {
            return Err(ArtifactStoreError::Duplicate(artifact.stage_name.clone()));
        }
        self.entries.push(artifact);
        Ok(())
    }

    /// Artifact produced by a stage
    pub fn get(&self, stage_name: &str) -> Option<&Arc<Artifact>> {
        self.entries.iter().find(|a| a.stage_name == stage_name)
    }

    /// Most recently produced artifact of a kind
    pub fn latest(&self, kind: ArtifactKind) -> Option<&Arc<Artifact>> {
        self.entries.iter().rev().find(|a| a.kind() == kind)
    }

    /// Most recently produced text, if any
    pub fn latest_text(&self) -> Option<&str> {
        self.latest(ArtifactKind::Text).and_then(|a| a.as_text())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Artifact>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Append-only run journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection. Each run owns one directory:
//!
//! ```text
//! <runs_dir>/<run_id>/events.jsonl
//! <runs_dir>/<run_id>/artifacts/<stage>.<ext>
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Artifact, Event, EventType};

/// File-based event store using JSONL format
#[derive(Debug, Clone)]
pub struct EventStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to artifacts directory
    artifacts_dir: PathBuf,
}

impl EventStore {
    /// Create or open the journal of a run under `runs_dir`
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = runs_dir.join(run_id.to_string());
        let artifacts_dir = run_dir.join("artifacts");

        fs::create_dir_all(&artifacts_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create artifacts directory: {}",
                    artifacts_dir.display()
                )
            })?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
            artifacts_dir,
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Whether a journal was ever written for this run. Unlike [`open`](Self::open)
    /// this touches nothing on disk.
    pub async fn exists(runs_dir: &Path, run_id: Uuid) -> bool {
        let events_path = runs_dir.join(run_id.to_string()).join("events.jsonl");
        fs::try_exists(&events_path).await.unwrap_or(false)
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Get the artifacts directory
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Write an artifact's payload to disk, named after its stage
    pub async fn store_artifact(&self, artifact: &Artifact) -> Result<PathBuf> {
        let artifact_path = self
            .artifacts_dir
            .join(format!("{}.{}", artifact.stage_name, artifact.kind().extension()));

        fs::write(&artifact_path, artifact.payload.as_bytes())
            .await
            .with_context(|| format!("Failed to write artifact: {}", artifact_path.display()))?;

        Ok(artifact_path)
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Find events matching a predicate
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<Event>>
    where
        F: Fn(&Event) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// Whether any delivery was already journaled for this run
    pub async fn delivery_attempted(&self) -> Result<bool> {
        let deliveries = self
            .find_events(|e| {
                matches!(
                    e.event_type,
                    EventType::DeliverySucceeded | EventType::DeliveryFailed
                )
            })
            .await?;
        Ok(!deliveries.is_empty())
    }

    /// List all run IDs under `runs_dir`
    pub async fn list_runs(runs_dir: &Path) -> Result<Vec<Uuid>> {
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

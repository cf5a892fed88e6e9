//! Run limits and budget enforcement.
//!
//! Bounds a run through configurable limits on:
//! - Per-attempt timeouts (default for providers without their own)
//! - Total run time
//! - Artifact sizes

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::domain::Payload;

/// Limits applied to every run of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Per-attempt timeout for providers and channels without their own (default: 120)
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,

    /// Total run timeout in seconds (default: 1800 = 30 min)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Largest artifact a provider may return (default: 512MB)
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

fn default_timeout() -> u64 {
    120
}
fn default_run_timeout() -> u64 {
    1800
}
fn default_max_artifact_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout(),
            run_timeout_seconds: default_run_timeout(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

impl RunLimits {
    /// Timeout for a provider, falling back to the default
    pub fn timeout(&self, override_seconds: Option<u64>) -> Duration {
        Duration::from_secs(override_seconds.unwrap_or(self.default_timeout_seconds))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    /// Reject empty or oversized provider output
    pub fn validate_payload(&self, payload: &Payload) -> Result<(), LimitViolation> {
        let size = payload.as_bytes().len() as u64;
        if size == 0 {
            return Err(LimitViolation::EmptyArtifact);
        }
        if size > self.max_artifact_bytes {
            return Err(LimitViolation::MaxArtifactBytes {
                actual: size,
                limit: self.max_artifact_bytes,
            });
        }
        Ok(())
    }

    /// Start the clock for a run
    pub fn start(&self) -> RunBudget {
        RunBudget::new(self.run_timeout())
    }
}

/// Tracks the time left in a run
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    started_at: Instant,
    deadline: Instant,
    limit: Duration,
}

impl RunBudget {
    pub fn new(limit: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            started_at,
            deadline: started_at + limit,
            limit,
        }
    }

    /// Time left before the run deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Clamp a per-attempt timeout to the remaining run budget
    pub fn clamp(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn check(&self) -> Result<(), LimitViolation> {
        if self.remaining().is_zero() {
            return Err(LimitViolation::RunTimeout {
                elapsed_seconds: self.elapsed().as_secs(),
                limit_seconds: self.limit.as_secs(),
            });
        }
        Ok(())
    }
}

/// Limit violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("provider returned an empty artifact")]
    EmptyArtifact,

    #[error("artifact too large: {actual} > {limit} bytes")]
    MaxArtifactBytes { actual: u64, limit: u64 },

    #[error("run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RunLimits::default();
        assert_eq!(limits.default_timeout_seconds, 120);
        assert_eq!(limits.run_timeout_seconds, 1800);
        assert_eq!(limits.max_artifact_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn test_timeout_override() {
        let limits = RunLimits::default();
        assert_eq!(limits.timeout(None), Duration::from_secs(120));
        assert_eq!(limits.timeout(Some(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_payload_validation() {
        let limits = RunLimits {
            max_artifact_bytes: 4,
            ..Default::default()
        };

        assert!(limits.validate_payload(&Payload::Image(vec![1, 2])).is_ok());
        assert_eq!(
            limits.validate_payload(&Payload::Text(String::new())),
            Err(LimitViolation::EmptyArtifact)
        );
        assert!(matches!(
            limits.validate_payload(&Payload::Video(vec![0; 10])),
            Err(LimitViolation::MaxArtifactBytes { actual: 10, limit: 4 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_clamps_and_expires() {
        let budget = RunBudget::new(Duration::from_secs(10));
        assert_eq!(budget.clamp(Duration::from_secs(60)), Duration::from_secs(10));
        assert!(budget.check().is_ok());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(budget.clamp(Duration::from_secs(60)), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(matches!(budget.check(), Err(LimitViolation::RunTimeout { .. })));
    }
}

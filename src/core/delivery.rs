//! Primary/secondary delivery of the final clip.
//!
//! The primary channel is tried first. The secondary channel is tried
//! exactly once, and only when the primary is absent or failed, so a
//! successful upload never also produces a fallback email.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{
    Artifact, ChannelRole, DeliveryAttempt, DeliveryError, DeliveryOutcome, DeliveryReport,
    CANCELLED,
};

/// Somewhere a finished clip can be sent
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Deliver the clip. `Ok(false)` means the channel declined it.
    async fn deliver(&self, video: &Artifact, timeout: Duration) -> Result<bool>;
}

/// A channel and its per-attempt timeout
#[derive(Clone)]
pub struct ChannelSpec {
    pub channel: Arc<dyn DeliveryChannel>,
    pub timeout: Duration,
}

impl ChannelSpec {
    pub fn new(channel: Arc<dyn DeliveryChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("channel", &self.channel.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Exclusive primary-then-secondary delivery
#[derive(Debug, Clone, Default)]
pub struct DeliveryFanout {
    primary: Option<ChannelSpec>,
    secondary: Option<ChannelSpec>,
}

impl DeliveryFanout {
    pub fn new(primary: Option<ChannelSpec>, secondary: Option<ChannelSpec>) -> Self {
        Self { primary, secondary }
    }

    pub fn is_configured(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    /// Deliver the clip. Never fails: the report says which channel (if
    /// any) accepted it. Cancellation stops before the next channel.
    pub async fn deliver(&self, video: &Artifact, cancel: &CancellationToken) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if let Some(primary) = &self.primary {
            let attempt = attempt(ChannelRole::Primary, primary, video, cancel).await;
            let delivered = attempt.delivered();
            report.attempts.push(attempt);
            if delivered {
                return report;
            }
        } else {
            info!("No primary delivery channel configured");
        }

        if cancel.is_cancelled() {
            warn!("Delivery cancelled, skipping secondary channel");
            report.cancelled = true;
            return report;
        }

        if let Some(secondary) = &self.secondary {
            report
                .attempts
                .push(attempt(ChannelRole::Secondary, secondary, video, cancel).await);
        }
        report.cancelled = cancel.is_cancelled();

        if !report.is_delivered() {
            warn!(
                attempts = report.attempts.len(),
                "{}",
                DeliveryError::Undelivered
            );
        }

        report
    }
}

async fn attempt(
    role: ChannelRole,
    spec: &ChannelSpec,
    video: &Artifact,
    cancel: &CancellationToken,
) -> DeliveryAttempt {
    let name = spec.channel.name().to_string();
    let started = Instant::now();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow::anyhow!(CANCELLED)),
        result = tokio::time::timeout(spec.timeout, spec.channel.deliver(video, spec.timeout)) => {
            match result {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {:?}", spec.timeout)),
            }
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Ok(true) => {
            info!(%role, channel = %name, duration_ms, "Delivered");
            DeliveryOutcome::Delivered
        }
        Ok(false) => {
            let err = DeliveryError::ChannelFailed {
                role,
                channel: name.clone(),
                reason: "declined".to_string(),
            };
            warn!(duration_ms, "{}", err);
            DeliveryOutcome::Failed {
                reason: "declined".to_string(),
            }
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            let err = DeliveryError::ChannelFailed {
                role,
                channel: name.clone(),
                reason: reason.clone(),
            };
            warn!(duration_ms, "{}", err);
            DeliveryOutcome::Failed { reason }
        }
    };

    DeliveryAttempt {
        role,
        channel: name,
        outcome,
        duration_ms,
    }
}

//! Failure taxonomy.
//!
//! Errors are scoped to the level that produces them:
//! - `ProviderError`: one provider attempt, always absorbed by the chain
//! - `StageError`: one stage, acted on by the orchestrator per stage policy
//! - `DeliveryError`: distribution of the final artifact

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::run::ChannelRole;

/// Failure of a single provider attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth trying again later (timeout, transport, malformed response)
    #[error("transient: {0}")]
    Transient(String),

    /// This provider will not succeed on retry (e.g. authentication rejected)
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::Transient(format!("timed out after {:?}", after))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Fatal(reason) => reason,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status, err.to_string()),
            None => Self::Transient(err.to_string()),
        }
    }
}

impl ProviderError {
    /// Classify an HTTP status: rejected credentials and unprocessable
    /// requests are fatal, everything else (429, 5xx, ...) is transient.
    pub fn from_status(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), detail.into());
        match status.as_u16() {
            400 | 401 | 403 | 404 | 422 => Self::Fatal(detail),
            _ => Self::Transient(detail),
        }
    }
}

/// Stage-level outcome the orchestrator reacts to
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// An optional stage fell back or produced nothing; the run continues
    #[error("stage '{stage}' degraded: {reason}")]
    Degraded { stage: String, reason: String },

    /// A critical stage failed; the run stops here
    #[error("stage '{stage}' aborted the run: {reason}")]
    Aborted { stage: String, reason: String },
}

/// Distribution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("{role} channel '{channel}' failed: {reason}")]
    ChannelFailed {
        role: ChannelRole,
        channel: String,
        reason: String,
    },

    #[error("no delivery channel succeeded")]
    Undelivered,

    #[error("run {0} has no artifact to deliver")]
    NothingToDeliver(Uuid),

    #[error("delivery for run {0} was already attempted")]
    AlreadyAttempted(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key").is_fatal());
        assert!(ProviderError::from_status(StatusCode::FORBIDDEN, "nope").is_fatal());
        assert!(!ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow").is_fatal());
        assert!(!ProviderError::from_status(StatusCode::BAD_GATEWAY, "down").is_fatal());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = ProviderError::timed_out(Duration::from_secs(5));
        assert!(!err.is_fatal());
        assert_eq!(err.reason(), "timed out after 5s");
    }
}

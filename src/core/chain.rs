//! Ordered provider fallback.
//!
//! A `ProviderChain` tries the providers of one stage in rank order until one
//! returns a usable artifact. The first success wins; lower-ranked providers
//! are never called after it. Every failure, transient or fatal, falls
//! through to the next provider. The chain does no I/O of its own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    Artifact, ArtifactKind, AttemptOutcome, Payload, ProviderAttempt, ProviderError,
};

use super::limits::{RunBudget, RunLimits};
use super::pipeline::ConfigError;
use super::store::ArtifactStore;

/// What a provider gets to work with
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Rendered prompt (first stage) or upstream text
    pub text: Option<&'a str>,

    /// Output of the stage immediately before this one
    pub previous: Option<&'a Arc<Artifact>>,

    /// Everything produced so far in this run
    pub store: &'a ArtifactStore,
}

/// One backend able to produce an artifact for a stage
#[async_trait]
pub trait Provider: Send + Sync {
    /// Produce a payload. `timeout` is the budget for this attempt; the
    /// chain enforces it regardless, implementations may pass it on to
    /// their transport.
    async fn produce(
        &self,
        input: &StageInput<'_>,
        timeout: Duration,
    ) -> Result<Payload, ProviderError>;
}

/// A provider together with its place in a stage
#[derive(Clone)]
pub struct ProviderSpec {
    pub name: String,

    /// Position in the stage's order; lower runs first
    pub rank: usize,

    /// Per-attempt timeout
    pub timeout: Duration,

    pub provider: Arc<dyn Provider>,
}

impl ProviderSpec {
    pub fn new(
        name: impl Into<String>,
        rank: usize,
        timeout: Duration,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            name: name.into(),
            rank,
            timeout,
            provider,
        }
    }
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// The chain produced an artifact
#[derive(Debug)]
pub struct Resolved {
    pub artifact: Artifact,

    /// Name of the winning provider
    pub provider: String,

    /// Every attempt made, in rank order, ending with the winner
    pub attempts: Vec<ProviderAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("all {} providers failed", attempts.len())]
    Exhausted { attempts: Vec<ProviderAttempt> },

    #[error("cancelled after {} attempts", attempts.len())]
    Cancelled { attempts: Vec<ProviderAttempt> },
}

impl ChainError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            Self::Exhausted { attempts } | Self::Cancelled { attempts } => attempts,
        }
    }

    pub fn into_attempts(self) -> Vec<ProviderAttempt> {
        match self {
            Self::Exhausted { attempts } | Self::Cancelled { attempts } => attempts,
        }
    }
}

/// Providers of one stage, in strict rank order
#[derive(Debug, Clone)]
pub struct ProviderChain {
    stage_name: String,
    output: ArtifactKind,
    providers: Vec<ProviderSpec>,
    race: usize,
    limits: RunLimits,
}

impl ProviderChain {
    /// Build a chain. Fails on an empty provider list, rank ties or zero
    /// timeouts; providers are sorted by rank.
    pub fn new(
        stage_name: impl Into<String>,
        output: ArtifactKind,
        mut providers: Vec<ProviderSpec>,
    ) -> Result<Self, ConfigError> {
        let stage_name = stage_name.into();
        if providers.is_empty() {
            return Err(ConfigError::NoProviders(stage_name));
        }

        providers.sort_by_key(|p| p.rank);
        for pair in providers.windows(2) {
            if pair[0].rank == pair[1].rank {
                return Err(ConfigError::RankTie {
                    stage: stage_name,
                    rank: pair[0].rank,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        if let Some(p) = providers.iter().find(|p| p.timeout.is_zero()) {
            return Err(ConfigError::ZeroTimeout {
                stage: stage_name,
                provider: p.name.clone(),
            });
        }

        Ok(Self {
            stage_name,
            output,
            providers,
            race: 1,
            limits: RunLimits::default(),
        })
    }

    /// Race the top `width` providers instead of trying them one by one.
    /// Losers are cancelled as soon as one succeeds.
    pub fn with_race(mut self, width: usize) -> Self {
        self.race = width.max(1);
        self
    }

    /// Limits used to reject empty or oversized output
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn providers(&self) -> &[ProviderSpec] {
        &self.providers
    }

    /// Try providers until one succeeds
    pub async fn resolve(
        &self,
        input: &StageInput<'_>,
        budget: &RunBudget,
        cancel: &CancellationToken,
    ) -> Result<Resolved, ChainError> {
        if self.race > 1 {
            self.resolve_racing(input, budget, cancel).await
        } else {
            self.resolve_sequential(&self.providers, input, budget, cancel, Vec::new())
                .await
        }
    }

    async fn resolve_sequential(
        &self,
        specs: &[ProviderSpec],
        input: &StageInput<'_>,
        budget: &RunBudget,
        cancel: &CancellationToken,
        mut attempts: Vec<ProviderAttempt>,
    ) -> Result<Resolved, ChainError> {
        for spec in specs {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled { attempts });
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = self.attempt(spec, input, budget) => Some(outcome),
            };

            let Some((result, attempt)) = outcome else {
                attempts.push(interrupted(spec, started, "cancelled"));
                return Err(ChainError::Cancelled { attempts });
            };

            attempts.push(attempt);
            if let Ok(artifact) = result {
                return Ok(Resolved {
                    artifact,
                    provider: spec.name.clone(),
                    attempts,
                });
            }
        }

        Err(ChainError::Exhausted { attempts })
    }

    async fn resolve_racing(
        &self,
        input: &StageInput<'_>,
        budget: &RunBudget,
        cancel: &CancellationToken,
    ) -> Result<Resolved, ChainError> {
        let width = self.race.min(self.providers.len());
        let (front, rest) = self.providers.split_at(width);
        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.providers.len());

        debug!(stage = %self.stage_name, width, "Racing top providers");

        let mut in_flight: FuturesUnordered<_> = front
            .iter()
            .map(|spec| async move { (spec, self.attempt(spec, input, budget).await) })
            .collect();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = in_flight.next() => Some(next),
            };

            match next {
                None => {
                    drop(in_flight);
                    let losers = unfinished(front, &attempts, started, "cancelled");
                    attempts.extend(losers);
                    attempts.sort_by_key(|a| a.rank);
                    return Err(ChainError::Cancelled { attempts });
                }
                Some(None) => break,
                Some(Some((spec, (result, attempt)))) => {
                    attempts.push(attempt);
                    if let Ok(artifact) = result {
                        // Dropping the set cancels every provider still running.
                        drop(in_flight);
                        let losers = unfinished(front, &attempts, started, "cancelled: lost race");
                        attempts.extend(losers);
                        attempts.sort_by_key(|a| a.rank);
                        return Ok(Resolved {
                            artifact,
                            provider: spec.name.clone(),
                            attempts,
                        });
                    }
                }
            }
        }

        drop(in_flight);
        attempts.sort_by_key(|a| a.rank);
        self.resolve_sequential(rest, input, budget, cancel, attempts)
            .await
    }

    /// Invoke one provider under its timeout and classify the result
    async fn attempt(
        &self,
        spec: &ProviderSpec,
        input: &StageInput<'_>,
        budget: &RunBudget,
    ) -> (Result<Artifact, ProviderError>, ProviderAttempt) {
        let timeout = budget.clamp(spec.timeout);
        let started = Instant::now();

        let result = if timeout.is_zero() {
            Err(ProviderError::transient("run time budget exhausted"))
        } else {
            match tokio::time::timeout(timeout, spec.provider.produce(input, timeout)).await {
                Ok(result) => result.and_then(|payload| self.check(payload)),
                Err(_) => Err(ProviderError::timed_out(timeout)),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, outcome) = match result {
            Ok(payload) => {
                let artifact = Artifact::new(self.stage_name.clone(), payload);
                info!(
                    stage = %self.stage_name,
                    provider = %spec.name,
                    rank = spec.rank,
                    duration_ms,
                    bytes = artifact.size_bytes(),
                    "Provider succeeded"
                );
                let outcome = AttemptOutcome::Success {
                    artifact: artifact.summary(),
                };
                (Ok(artifact), outcome)
            }
            Err(e) => {
                warn!(
                    stage = %self.stage_name,
                    provider = %spec.name,
                    rank = spec.rank,
                    duration_ms,
                    fatal = e.is_fatal(),
                    error = %e,
                    "Provider failed"
                );
                let outcome = match &e {
                    ProviderError::Transient(reason) => AttemptOutcome::TransientFailure {
                        reason: reason.clone(),
                    },
                    ProviderError::Fatal(reason) => AttemptOutcome::FatalFailure {
                        reason: reason.clone(),
                    },
                };
                (Err(e), outcome)
            }
        };

        let attempt = ProviderAttempt {
            provider: spec.name.clone(),
            rank: spec.rank,
            outcome,
            duration_ms,
        };
        (result, attempt)
    }

    /// A payload of the wrong kind or size counts as a malformed response
    fn check(&self, payload: Payload) -> Result<Payload, ProviderError> {
        if payload.kind() != self.output {
            return Err(ProviderError::transient(format!(
                "malformed response: expected {}, got {}",
                self.output,
                payload.kind()
            )));
        }
        self.limits
            .validate_payload(&payload)
            .map_err(|v| ProviderError::transient(format!("malformed response: {}", v)))?;
        Ok(payload)
    }
}

fn interrupted(spec: &ProviderSpec, started: Instant, reason: &str) -> ProviderAttempt {
    ProviderAttempt {
        provider: spec.name.clone(),
        rank: spec.rank,
        outcome: AttemptOutcome::TransientFailure {
            reason: reason.to_string(),
        },
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Attempts for racing providers that never reported back
fn unfinished(
    front: &[ProviderSpec],
    finished: &[ProviderAttempt],
    started: Instant,
    reason: &str,
) -> Vec<ProviderAttempt> {
    front
        .iter()
        .filter(|spec| !finished.iter().any(|a| a.rank == spec.rank))
        .map(|spec| interrupted(spec, started, reason))
        .collect()
}

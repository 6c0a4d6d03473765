//! Structured domain errors (§7 "Error Handling Design").
//!
//! Each variant family maps to one of the error *kinds* the spec names:
//! transient-I/O, circuit-open, timeout, configuration, not-found,
//! conflict, validation, invariant-violation. Resilience primitives
//! absorb transient/timeout within their budget; everything else
//! propagates to the caller as a `CoordinatorError`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("transient I/O error talking to {collaborator}: {source}")]
    TransientIo {
        collaborator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen { breaker: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violation (bug, recovered): {0}")]
    InvariantViolation(String),
}

impl CoordinatorError {
    pub fn not_found(kind: impl Into<String>, id: Uuid) -> Self {
        Self::NotFound { kind: kind.into(), id: id.to_string() }
    }

    /// Whether a resilience primitive should count this toward its
    /// failure bookkeeping (transient/timeout only — `circuit-open`
    /// itself must not, or a breaker could never recover).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::Timeout { .. })
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

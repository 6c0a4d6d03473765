//! Composition helper: retry wraps circuit breaker, so retry budgets are
//! consumed by breaker-open errors as well as the wrapped operation's own
//! failures (§4.1 "Composition").

use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use super::retry::{RetryError, RetryHandler};

/// The terminal error shape once both layers are exhausted: either the
/// breaker stayed open through every attempt, or the wrapped operation's
/// own error propagated out.
#[derive(Debug, thiserror::Error)]
pub enum ResilientError<E: std::fmt::Debug> {
    #[error("retry budget exhausted with circuit open")]
    ExhaustedOnOpenCircuit,
    #[error("retry budget exhausted: {0}")]
    Exhausted(#[source] RetryWrapped<E>),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RetryWrapped<E: std::fmt::Debug>(pub E);

/// Runs `op` through `breaker`, retried by `retry` on retryable failures
/// and on circuit-open, per §4.1's composition contract.
pub async fn with_circuit_breaker_and_retry<F, Fut, T, E>(
    retry: &RetryHandler,
    breaker: &Arc<CircuitBreaker>,
    is_retryable: impl Fn(&E) -> bool + Copy,
    mut op: F,
) -> Result<T, ResilientError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let (result, _log) = retry
        .execute(
            |err: &CircuitBreakerError<E>| match err {
                CircuitBreakerError::Open => true,
                CircuitBreakerError::Timeout => true,
                CircuitBreakerError::Inner(inner) => is_retryable(inner),
            },
            |_| false,
            || {
                let fut = op();
                async move { breaker.call(is_retryable, || fut).await }
            },
        )
        .await;

    match result {
        Ok(value) => Ok(value),
        Err(RetryError::TimedOut { .. }) => Err(ResilientError::ExhaustedOnOpenCircuit),
        Err(RetryError::Exhausted { last, .. }) => match last {
            CircuitBreakerError::Open => Err(ResilientError::ExhaustedOnOpenCircuit),
            CircuitBreakerError::Timeout => Err(ResilientError::ExhaustedOnOpenCircuit),
            CircuitBreakerError::Inner(inner) => Err(ResilientError::Exhausted(RetryWrapped(inner))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{CircuitBreakerConfig, RetryConfig};

    #[tokio::test]
    async fn retry_consumes_circuit_open_errors() {
        let cb_cfg = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_seconds: 3600,
            success_threshold: 1,
            call_timeout_ms: 1_000,
            window_seconds: 60,
            minimum_requests: 100,
            failure_rate_threshold: 0.5,
            slow_call_threshold_ms: 5_000,
            slow_call_rate_threshold: 0.5,
        };
        let breaker = Arc::new(CircuitBreaker::new("test", cb_cfg));
        let retry_cfg = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_strategy: "fixed".to_string(),
            jitter_max_ms: 1,
            timeout_ms: 1_000,
        };
        let retry = RetryHandler::new(retry_cfg);

        let result: Result<(), ResilientError<&str>> =
            with_circuit_breaker_and_retry(&retry, &breaker, |_| true, || async { Err("boom") }).await;

        assert!(matches!(result, Err(ResilientError::ExhaustedOnOpenCircuit)));
    }
}

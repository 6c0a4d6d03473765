//! Retry handler with pluggable backoff (§4.1 "Retry Handler").

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::domain::models::config::RetryConfig;

/// Backoff strategy family (SPEC_FULL supplement, carried verbatim from
/// `resilience/retry_handler.py`'s `BackoffStrategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
    DecorrelatedJitter,
}

impl BackoffStrategy {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            "exponential_jitter" => Some(Self::ExponentialJitter),
            "decorrelated_jitter" => Some(Self::DecorrelatedJitter),
            _ => None,
        }
    }

    /// Delay before the attempt numbered `attempt` (1-indexed), capped
    /// at `max_delay`. `previous_delay` feeds decorrelated jitter's
    /// recurrence.
    fn delay(
        self,
        attempt: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter_max: Duration,
        previous_delay: Duration,
    ) -> Duration {
        let base_ms = base_delay.as_millis() as f64;
        let max_ms = max_delay.as_millis() as f64;
        let mut rng = rand::thread_rng();

        let raw_ms = match self {
            Self::Fixed => base_ms,
            Self::Linear => base_ms * f64::from(attempt),
            Self::Exponential => base_ms * 2f64.powi(attempt as i32 - 1),
            Self::ExponentialJitter => {
                let exp = base_ms * 2f64.powi(attempt as i32 - 1);
                let jitter = rng.gen_range(0.0..=jitter_max.as_millis() as f64);
                exp + jitter
            }
            Self::DecorrelatedJitter => {
                let prev_ms = previous_delay.as_millis() as f64;
                let upper = (prev_ms * 3.0).max(base_ms);
                rng.gen_range(base_ms..=upper)
            }
        };
        Duration::from_millis(raw_ms.min(max_ms).max(0.0) as u64)
    }
}

/// Per-attempt observability record (SPEC_FULL supplement).
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay_before: Duration,
    pub succeeded: bool,
}

/// Distinguished terminal errors, per the Design Notes
/// "exception-for-control-flow" redesign flag.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts")]
    Exhausted { attempts: u32, last: E },
    #[error("retries exhausted on repeated timeout after {attempts} attempts")]
    TimedOut { attempts: u32 },
}

pub struct RetryHandler {
    config: RetryConfig,
    strategy: BackoffStrategy,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        let strategy = BackoffStrategy::parse_str(&config.backoff_strategy).unwrap_or(BackoffStrategy::ExponentialJitter);
        Self { config, strategy }
    }

    /// Retries `op` up to `max_attempts`, applying `is_retryable` to
    /// classify errors and `retry_on_result` as a custom "should retry
    /// on a successful-but-unsatisfactory result" predicate. Returns the
    /// per-attempt log alongside the terminal outcome.
    #[instrument(skip_all)]
    pub async fn execute<F, Fut, T, E>(
        &self,
        is_retryable: impl Fn(&E) -> bool,
        retry_on_result: impl Fn(&T) -> bool,
        mut op: F,
    ) -> (Result<T, RetryError<E>>, Vec<RetryAttempt>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut log = Vec::new();
        let mut previous_delay = Duration::from_millis(self.config.base_delay_ms);
        let mut last_error: Option<E> = None;
        let mut timeouts_only = true;

        for attempt in 1..=self.config.max_attempts {
            let delay = if attempt == 1 {
                Duration::ZERO
            } else {
                self.strategy.delay(
                    attempt - 1,
                    Duration::from_millis(self.config.base_delay_ms),
                    Duration::from_millis(self.config.max_delay_ms),
                    Duration::from_millis(self.config.jitter_max_ms),
                    previous_delay,
                )
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            previous_delay = delay;

            let attempt_timeout = Duration::from_millis(self.config.timeout_ms);
            let outcome = tokio::time::timeout(attempt_timeout, op()).await;

            match outcome {
                Ok(Ok(value)) => {
                    if retry_on_result(&value) && attempt < self.config.max_attempts {
                        debug!(attempt, "result predicate requested retry");
                        log.push(RetryAttempt { attempt, delay_before: delay, succeeded: false });
                        continue;
                    }
                    log.push(RetryAttempt { attempt, delay_before: delay, succeeded: true });
                    return (Ok(value), log);
                }
                Ok(Err(err)) => {
                    timeouts_only = false;
                    log.push(RetryAttempt { attempt, delay_before: delay, succeeded: false });
                    if !is_retryable(&err) {
                        return (Err(RetryError::Exhausted { attempts: attempt, last: err }), log);
                    }
                    last_error = Some(err);
                }
                Err(_elapsed) => {
                    log.push(RetryAttempt { attempt, delay_before: delay, succeeded: false });
                }
            }
        }

        if timeouts_only && last_error.is_none() {
            (Err(RetryError::TimedOut { attempts: self.config.max_attempts }), log)
        } else {
            (
                Err(RetryError::Exhausted {
                    attempts: self.config.max_attempts,
                    last: last_error.expect("non-timeout exhaustion must carry a last error"),
                }),
                log,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cfg() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            backoff_strategy: "fixed".to_string(),
            jitter_max_ms: 5,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn succeeds_after_two_failures() {
        let handler = RetryHandler::new(cfg());
        let calls = AtomicU32::new(0);
        let (result, log) = handler
            .execute(
                |_: &&str| true,
                |_: &&str| false,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("fail")
                        } else {
                            Ok("ok")
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(log.len(), 3);
        assert!(log.last().unwrap().succeeded);
    }

    #[tokio::test]
    async fn zero_retry_budget_is_terminal_on_first_failure() {
        let mut c = cfg();
        c.max_attempts = 1;
        let handler = RetryHandler::new(c);
        let (result, log): (Result<&str, RetryError<&str>>, _) = handler
            .execute(|_| true, |_: &&str| false, || async { Err("fail") })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_is_terminal_immediately() {
        let handler = RetryHandler::new(cfg());
        let calls = AtomicU32::new(0);
        let (result, _log): (Result<&str, RetryError<&str>>, _) = handler
            .execute(
                |_| false,
                |_: &&str| false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fatal") }
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_timeout_raises_timed_out_not_exhausted() {
        let mut c = cfg();
        c.timeout_ms = 5;
        c.max_attempts = 2;
        let handler = RetryHandler::new(c);
        let (result, _log): (Result<(), RetryError<&str>>, _) = handler
            .execute(
                |_: &&str| true,
                |_: &()| false,
                || async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                },
            )
            .await;
        assert!(matches!(result, Err(RetryError::TimedOut { attempts: 2 })));
    }
}

//! Circuit breaker (§4.1 "Circuit Breaker").
//!
//! Wraps an async operation with states `{closed, open, half_open}`. A
//! breaker trips to `open` on consecutive failures, a windowed failure
//! rate, or a windowed slow-call rate; it recovers through `half_open`
//! after `success_threshold` consecutive successes.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::domain::models::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// One call's outcome, retained in a bounded ring for windowed tripping
/// decisions and the metrics snapshot (SPEC_FULL supplement).
#[derive(Debug, Clone)]
struct CallRecord {
    success: bool,
    duration: Duration,
    timestamp: DateTime<Utc>,
}

/// Drops records older than `window_seconds`, so a low-traffic breaker
/// never folds stale calls into its windowed rate calculations (§4.1
/// "sliding window").
fn prune_window(records: &mut VecDeque<CallRecord>, now: DateTime<Utc>, window_seconds: i64) {
    let window = chrono::Duration::seconds(window_seconds);
    while records.front().is_some_and(|r| now - r.timestamp > window) {
        records.pop_front();
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
    records: VecDeque<CallRecord>,
    total_calls: u64,
    total_failures: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            records: VecDeque::new(),
            total_calls: 0,
            total_failures: 0,
        }
    }
}

/// Distinguishes the "operation never ran" conditions from the wrapped
/// operation's own error type, per the Design Notes "exception-for-
/// control-flow" redesign flag.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit is open")]
    Open,
    #[error("call timed out")]
    Timeout,
    #[error(transparent)]
    Inner(E),
}

/// Read-only metrics snapshot (SPEC_FULL supplement, from
/// `resilience/circuit_breaker.py`'s `get_metrics()`).
#[derive(Debug, Clone)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub total_calls: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub windowed_failure_rate: f64,
    pub windowed_slow_call_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
}

/// One named breaker guarding one flaky operation or collaborator
/// endpoint.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Step 1-2: fail fast if open and still within recovery timeout;
    /// otherwise transition open -> half_open past the timeout.
    fn pre_call_check(&self, now: DateTime<Utc>) -> Result<(), ()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Open => {
                let recovery_elapsed = inner
                    .last_failure_time
                    .map(|t| now - t)
                    .unwrap_or(chrono::Duration::zero());
                if recovery_elapsed < chrono::Duration::seconds(self.config.recovery_timeout_seconds) {
                    Err(())
                } else {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    debug!(breaker = %self.name, "transitioning open -> half_open");
                    Ok(())
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    fn record_outcome(&self, success: bool, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        inner.total_calls += 1;
        inner.records.push_back(CallRecord { success, duration, timestamp: now });
        prune_window(&mut inner.records, now, self.config.window_seconds);

        if success {
            inner.consecutive_failures = 0;
            match inner.state {
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        debug!(breaker = %self.name, "transitioning half_open -> closed");
                    }
                }
                CircuitState::Closed => {}
                CircuitState::Open => {}
            }
            return;
        }

        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_time = Some(now);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            warn!(breaker = %self.name, "half_open probe failed, reopening");
            return;
        }

        if inner.state == CircuitState::Closed {
            let window_len = inner.records.len();
            let window_failures = inner.records.iter().filter(|r| !r.success).count();
            let slow_calls = inner
                .records
                .iter()
                .filter(|r| r.duration.as_millis() as u64 >= self.config.slow_call_threshold_ms)
                .count();

            let trip_by_consecutive = inner.consecutive_failures >= self.config.failure_threshold;
            let trip_by_rate = window_len >= self.config.minimum_requests
                && (window_failures as f64 / window_len as f64) >= self.config.failure_rate_threshold;
            let trip_by_slow = window_len >= self.config.minimum_requests
                && (slow_calls as f64 / window_len as f64) >= self.config.slow_call_rate_threshold;

            if trip_by_consecutive || trip_by_rate || trip_by_slow {
                inner.state = CircuitState::Open;
                warn!(breaker = %self.name, consecutive = inner.consecutive_failures, "tripped to open");
            }
        }
    }

    /// Wrap `op` with the breaker's per-call timeout and state machine.
    /// `is_retryable` classifies the inner error: only retryable errors
    /// count toward circuit failures (§4.1 step 4); others propagate
    /// without affecting state.
    #[instrument(skip_all, fields(breaker = %self.name))]
    pub async fn call<F, Fut, T, E>(
        &self,
        is_retryable: impl Fn(&E) -> bool,
        op: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.pre_call_check(Utc::now()).is_err() {
            return Err(CircuitBreakerError::Open);
        }

        let started = std::time::Instant::now();
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_outcome(true, started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                if is_retryable(&err) {
                    self.record_outcome(false, started.elapsed());
                }
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_elapsed) => {
                self.record_outcome(false, started.elapsed());
                Err(CircuitBreakerError::Timeout)
            }
        }
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.lock().unwrap();
        prune_window(&mut inner.records, Utc::now(), self.config.window_seconds);
        let window_len = inner.records.len();
        let windowed_failure_rate = if window_len == 0 {
            0.0
        } else {
            inner.records.iter().filter(|r| !r.success).count() as f64 / window_len as f64
        };
        let windowed_slow_call_rate = if window_len == 0 {
            0.0
        } else {
            inner
                .records
                .iter()
                .filter(|r| r.duration.as_millis() as u64 >= self.config.slow_call_threshold_ms)
                .count() as f64
                / window_len as f64
        };
        let mut durations: Vec<u128> = inner.records.iter().map(|r| r.duration.as_millis()).collect();
        durations.sort_unstable();
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u128>() as f64 / durations.len() as f64
        };
        let p95_duration_ms = if durations.is_empty() {
            0.0
        } else {
            let idx = ((durations.len() as f64) * 0.95).ceil() as usize;
            durations[idx.saturating_sub(1).min(durations.len() - 1)] as f64
        };

        CircuitMetrics {
            state: inner.state,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            consecutive_failures: inner.consecutive_failures,
            windowed_failure_rate,
            windowed_slow_call_rate,
            avg_duration_ms,
            p95_duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_seconds: 0,
            success_threshold: 2,
            call_timeout_ms: 1_000,
            window_seconds: 60,
            minimum_requests: 100,
            failure_rate_threshold: 0.5,
            slow_call_threshold_ms: 5_000,
            slow_call_rate_threshold: 0.5,
        }
    }

    #[tokio::test]
    async fn trips_on_consecutive_failures_then_fails_fast() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..3 {
            let res: Result<(), CircuitBreakerError<&str>> =
                breaker.call(|_| true, || async { Err("boom") }).await;
            assert!(matches!(res, Err(CircuitBreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let res: Result<(), CircuitBreakerError<&str>> =
            breaker.call(|_| true, || async { Ok(()) }).await;
        assert!(matches!(res, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn recovers_through_half_open_after_timeout() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..3 {
            let _: Result<(), CircuitBreakerError<&str>> =
                breaker.call(|_| true, || async { Err("boom") }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_timeout_seconds = 0, so the very next call probes.
        for _ in 0..2 {
            let res: Result<(), CircuitBreakerError<&str>> =
                breaker.call(|_| true, || async { Ok(()) }).await;
            assert!(res.is_ok());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", cfg());
        let _: Result<(), CircuitBreakerError<&str>> =
            breaker.call(|_| true, || async { Err("boom") }).await;
        let _: Result<(), CircuitBreakerError<&str>> =
            breaker.call(|_| true, || async { Ok(()) }).await;
        assert_eq!(breaker.metrics().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn non_retryable_errors_do_not_affect_state() {
        let breaker = CircuitBreaker::new("test", cfg());
        for _ in 0..5 {
            let _: Result<(), CircuitBreakerError<&str>> =
                breaker.call(|_| false, || async { Err("ignored") }).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().total_failures, 0);
    }

    #[tokio::test]
    async fn old_records_fall_out_of_the_time_window() {
        let mut c = cfg();
        c.window_seconds = 1;
        let breaker = CircuitBreaker::new("test", c);
        let _: Result<(), CircuitBreakerError<&str>> =
            breaker.call(|_| true, || async { Err("boom") }).await;
        assert_eq!(breaker.metrics().windowed_failure_rate, 1.0);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let _: Result<(), CircuitBreakerError<&str>> =
            breaker.call(|_| true, || async { Ok(()) }).await;
        assert_eq!(breaker.metrics().windowed_failure_rate, 0.0);
    }

    #[tokio::test]
    async fn timeout_classified_as_failure() {
        let mut timeout_cfg = cfg();
        timeout_cfg.call_timeout_ms = 10;
        timeout_cfg.failure_threshold = 1;
        let breaker = CircuitBreaker::new("test", timeout_cfg);
        let res: Result<(), CircuitBreakerError<&str>> = breaker
            .call(|_| true, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(CircuitBreakerError::Timeout)));
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

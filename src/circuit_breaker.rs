//! Generic failure-isolation primitive wrapping a call site.
//!
//! No single teacher file implements a circuit breaker; this follows the
//! explicit state-constant style `sentinel/confirmation.rs` uses for its
//! own status machine (`DETECTED`/`CONFIRMING`/`FINALIZED`/...), expressed
//! here as a proper closed/open/half-open Rust enum rather than string
//! constants.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{CircuitOpenError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub open_duration: Duration,
    pub success_threshold_half_open: u32,
    /// If non-empty, only these kinds count as failures toward tripping
    /// the breaker; every other thrown/returned error still propagates to
    /// the caller but is not recorded against the failure window. Empty
    /// means every error counts.
    pub exception_kinds: Vec<ErrorKind>,
    pub name: String,
}

impl CircuitBreakerConfig {
    pub fn high_availability(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(30),
            open_duration: Duration::from_secs(15),
            success_threshold_half_open: 1,
            exception_kinds: Vec::new(),
            name: name.into(),
        }
    }

    pub fn external_service(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(120),
            open_duration: Duration::from_secs(60),
            success_threshold_half_open: 3,
            exception_kinds: Vec::new(),
            name: name.into(),
        }
    }

    pub fn storage(name: impl Into<String>) -> Self {
        Self {
            failure_threshold: 10,
            failure_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
            success_threshold_half_open: 2,
            exception_kinds: Vec::new(),
            name: name.into(),
        }
    }

    /// Restrict which error kinds count as failures for this call site.
    pub fn with_exception_kinds(mut self, kinds: Vec<ErrorKind>) -> Self {
        self.exception_kinds = kinds;
        self
    }

    fn counts_as_failure(&self, kind: Option<ErrorKind>) -> bool {
        if self.exception_kinds.is_empty() {
            return true;
        }
        kind.is_some_and(|k| self.exception_kinds.contains(&k))
    }
}

#[derive(Debug, Default)]
struct Counters {
    successful: u64,
    failed: u64,
    rejected: u64,
    consecutive_failures: u32,
    last_success_ts: Option<Instant>,
    last_failure_ts: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: State,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub rejected: u64,
    pub consecutive_failures: u32,
    pub last_success_ts: Option<Instant>,
    pub last_failure_ts: Option<Instant>,
}

struct Inner {
    state: State,
    failure_times: Vec<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    counters: Counters,
    last_error: Option<String>,
}

/// State-change event: `(prev, new, last_error, at)`. Transport is out of
/// scope here; this crate emits it as a structured `tracing` event at the
/// call site of every transition.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub prev: State,
    pub new: State,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Thread-safe three-state circuit breaker. State transitions are atomic
/// with respect to each other (guarded by a single mutex); calls in
/// CLOSED/HALF_OPEN may still execute concurrently.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_times: Vec::new(),
                opened_at: None,
                half_open_successes: 0,
                counters: Counters::default(),
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Move `inner.state` to `new` and emit the state-change event,
    /// provided the state actually changes.
    fn transition(&self, inner: &mut Inner, new: State) {
        let prev = inner.state;
        if prev == new {
            return;
        }
        inner.state = new;
        let event = StateChange {
            prev,
            new,
            last_error: inner.last_error.clone(),
            at: Utc::now(),
        };
        tracing::info!(
            circuit = %self.config.name,
            prev = ?event.prev,
            new = ?event.new,
            last_error = ?event.last_error,
            at = %event.at,
            "circuit breaker state change",
        );
    }

    /// Returns the effective state, transitioning OPEN -> HALF_OPEN if
    /// `open_duration` has elapsed.
    fn effective_state(&self, inner: &mut Inner) -> State {
        if inner.state == State::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.open_duration
        {
            inner.half_open_successes = 0;
            self.transition(inner, State::HalfOpen);
        }
        inner.state
    }

    fn record_success(&self, inner: &mut Inner) {
        inner.counters.successful += 1;
        inner.counters.consecutive_failures = 0;
        inner.counters.last_success_ts = Some(Instant::now());

        if inner.state == State::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold_half_open {
                inner.failure_times.clear();
                self.transition(inner, State::Closed);
            }
        }
    }

    fn record_failure(&self, inner: &mut Inner, error_message: String) {
        let now = Instant::now();
        inner.counters.failed += 1;
        inner.counters.consecutive_failures += 1;
        inner.counters.last_failure_ts = Some(now);
        inner.last_error = Some(error_message);

        match inner.state {
            State::HalfOpen => {
                inner.opened_at = Some(now);
                self.transition(inner, State::Open);
            }
            State::Closed => {
                inner.failure_times.retain(|t| now.duration_since(*t) <= self.config.failure_window);
                inner.failure_times.push(now);
                if inner.failure_times.len() as u32 >= self.config.failure_threshold {
                    inner.opened_at = Some(now);
                    self.transition(inner, State::Open);
                }
            }
            State::Open => {}
        }
    }

    /// Wrap a call site. Short-circuits with `CircuitOpenError` while OPEN.
    /// Every returned error counts as a failure (`exception_kinds` unset).
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CallResult<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_classified(op, |_| None).await
    }

    /// Wrap a call site with an error classifier. When `exception_kinds`
    /// is configured, only errors the classifier maps to one of those
    /// kinds count toward tripping the breaker; other errors still
    /// propagate to the caller but leave the failure window untouched.
    pub async fn execute_classified<F, Fut, T, E>(
        &self,
        op: F,
        classify: impl FnOnce(&E) -> Option<ErrorKind>,
    ) -> Result<T, CallResult<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        {
            // Single critical section for the check-then-reject: no other
            // call can reset/close the breaker between reading the state
            // and recording the rejection.
            let mut inner = self.inner.lock().unwrap();
            if self.effective_state(&mut inner) == State::Open {
                inner.counters.rejected += 1;
                return Err(CallResult::CircuitOpen(CircuitOpenError {
                    name: self.config.name.clone(),
                }));
            }
        }

        match op().await {
            Ok(value) => {
                let mut inner = self.inner.lock().unwrap();
                self.record_success(&mut inner);
                Ok(value)
            }
            Err(err) => {
                if self.config.counts_as_failure(classify(&err)) {
                    let mut inner = self.inner.lock().unwrap();
                    self.record_failure(&mut inner, err.to_string());
                }
                Err(CallResult::Failed(err))
            }
        }
    }

    pub fn trip(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, State::Open);
        inner.opened_at = Some(Instant::now());
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.transition(&mut inner, State::Closed);
        inner.failure_times.clear();
        inner.opened_at = None;
        inner.half_open_successes = 0;
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut inner = self.inner.lock().unwrap();
        let state = self.effective_state(&mut inner);
        Snapshot {
            state,
            total: inner.counters.successful + inner.counters.failed,
            successful: inner.counters.successful,
            failed: inner.counters.failed,
            rejected: inner.counters.rejected,
            consecutive_failures: inner.counters.consecutive_failures,
            last_success_ts: inner.counters.last_success_ts,
            last_failure_ts: inner.counters.last_failure_ts,
        }
    }
}

#[derive(Debug)]
pub enum CallResult<E> {
    CircuitOpen(CircuitOpenError),
    Failed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qa_opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::high_availability("test"));
        for _ in 0..3 {
            let res: Result<(), CallResult<&str>> =
                cb.execute(|| async { Err::<(), &str>("boom") }).await;
            assert!(matches!(res, Err(CallResult::Failed(_))));
        }
        assert_eq!(cb.snapshot().state, State::Open);

        let res: Result<(), CallResult<&str>> = cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(CallResult::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn qa_half_open_recovers_after_successes() {
        let mut config = CircuitBreakerConfig::high_availability("test2");
        config.open_duration = Duration::from_millis(10);
        config.success_threshold_half_open = 2;
        let cb = CircuitBreaker::new(config);
        cb.trip();

        tokio::time::sleep(Duration::from_millis(20)).await;

        for _ in 0..2 {
            let res: Result<(), CallResult<&str>> = cb.execute(|| async { Ok(()) }).await;
            assert!(res.is_ok());
        }
        assert_eq!(cb.snapshot().state, State::Closed);
    }

    #[tokio::test]
    async fn qa_failure_during_half_open_reopens() {
        let mut config = CircuitBreakerConfig::high_availability("test3");
        config.open_duration = Duration::from_millis(10);
        let cb = CircuitBreaker::new(config);
        cb.trip();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let res: Result<(), CallResult<&str>> = cb.execute(|| async { Err("still broken") }).await;
        assert!(matches!(res, Err(CallResult::Failed(_))));
        assert_eq!(cb.snapshot().state, State::Open);
    }

    #[test]
    fn qa_reset_clears_window() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::storage("test4"));
        cb.trip();
        cb.reset();
        assert_eq!(cb.snapshot().state, State::Closed);
    }

    #[tokio::test]
    async fn qa_exception_kinds_filters_which_failures_count() {
        let config = CircuitBreakerConfig::high_availability("filtered")
            .with_exception_kinds(vec![ErrorKind::DownstreamTransient]);
        let cb = CircuitBreaker::new(config);

        // Validation errors are not in `exception_kinds`; they propagate
        // but never count toward the failure window.
        for _ in 0..10 {
            let res: Result<(), CallResult<&str>> = cb
                .execute_classified(|| async { Err("bad input") }, |_| Some(ErrorKind::Validation))
                .await;
            assert!(matches!(res, Err(CallResult::Failed(_))));
        }
        assert_eq!(cb.snapshot().state, State::Closed);

        // Downstream-transient errors do count and trip the breaker at
        // the configured threshold (3 for HighAvailability).
        for _ in 0..3 {
            let res: Result<(), CallResult<&str>> = cb
                .execute_classified(|| async { Err("sql timeout") }, |_| Some(ErrorKind::DownstreamTransient))
                .await;
            assert!(matches!(res, Err(CallResult::Failed(_))));
        }
        assert_eq!(cb.snapshot().state, State::Open);
    }
}

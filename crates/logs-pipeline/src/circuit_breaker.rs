// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consecutive-failure circuit breaker gating batch deliveries.
//!
//! # State Transitions
//!
//! ```text
//! Closed   → Open:     consecutive failures >= threshold
//! Open     → HalfOpen: on allow(), once open_duration has elapsed
//! HalfOpen → Closed:   next recorded success
//! HalfOpen → Open:     next recorded failure (the trial is one-shot)
//! any      → Closed:   reset()
//! ```
//!
//! The breaker gates whole delivery operations: [`CircuitBreaker::allow`] is
//! consulted once per flushed batch, not once per retry.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_DURATION};
use crate::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial delivery is allowed.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration: DEFAULT_OPEN_DURATION,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_transition: Instant,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            info!(
                "LOGS | Circuit breaker {} -> {} (consecutive failures: {})",
                self.state, to, self.failures
            );
        }
        self.state = to;
        self.last_transition = Instant::now();
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[allow(clippy::expect_used)]
impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_transition: Instant::now(),
            }),
        }
    }

    /// Checks whether a delivery may proceed.
    ///
    /// Fails with [`Error::CircuitOpen`] while open. Once `open_duration` has
    /// elapsed since the circuit opened, moves to half-open and lets the
    /// caller through for a single trial.
    pub fn allow(&self) -> Result<(), Error> {
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.state == CircuitState::Open {
            if inner.last_transition.elapsed() >= self.config.open_duration {
                inner.transition(CircuitState::HalfOpen);
            } else {
                debug!("LOGS | Circuit breaker is open, skipping delivery");
                return Err(Error::CircuitOpen);
            }
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.transition(CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.failures = inner.failures.saturating_add(1);

        if inner.state == CircuitState::HalfOpen {
            warn!("LOGS | Trial delivery failed, reopening circuit");
            inner.transition(CircuitState::Open);
        } else if inner.failures >= self.config.failure_threshold {
            inner.transition(CircuitState::Open);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.failures = 0;
        inner.transition(CircuitState::Closed);
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.read().expect("lock poisoned").state
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.inner.read().expect("lock poisoned").failures
    }

    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(open_secs),
        })
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 30);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen)));
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = breaker(3, 30);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failures(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_three_open_thirty_seconds_scenario() {
        let cb = breaker(3, 30);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen)));
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allowed_exactly_at_open_duration() {
        let cb = breaker(1, 30);
        cb.record_failure();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_timer() {
        let cb = breaker(3, 30);
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // The open period starts over from the trial failure.
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(cb.allow(), Err(Error::CircuitOpen)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_single_failure_reopens_below_threshold() {
        let cb = breaker(10, 0);
        for _ in 0..10 {
            cb.record_failure();
        }
        assert!(cb.allow().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_closes() {
        let cb = breaker(1, 3600);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[test]
    #[traced_test]
    fn test_transitions_are_logged() {
        let cb = breaker(1, 3600);
        cb.record_failure();
        assert!(logs_contain("Circuit breaker closed -> open"));
    }

    #[test]
    fn test_concurrent_failures_counted() {
        let cb = std::sync::Arc::new(breaker(1000, 30));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = std::sync::Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cb.failures(), 800);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}

//! Per-transport circuit breaker.
//!
//! Closed calls go straight through and count consecutive failures. Once the
//! count reaches the threshold the breaker opens and rejects calls until the
//! reset timeout elapses. The next call after that is the single half-open
//! trial: success closes the breaker, failure opens it again. Callers arriving
//! while the trial is in flight are rejected.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_ms: 60_000 }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the operation
    Open { breaker: String },
    /// The operation ran and failed
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { breaker } => write!(f, "circuit breaker '{breaker}' is open"),
            BreakerError::Inner(error) => error.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(error) => Some(error),
        }
    }
}

/// Decides whether an error counts towards opening the breaker
pub type ErrorFilter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed { failures: u32 },
    Open { since: Instant },
    /// One trial call is in flight
    HalfOpen,
}

enum Admission {
    Call { trial: bool },
    Reject,
}

pub struct CircuitBreaker<E> {
    name: String,
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
    counts: ErrorFilter<E>,
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("circuit", &*self.lock())
            .finish()
    }
}

impl<E> CircuitBreaker<E> {
    /// Breaker where every error counts
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_filter(name, config, Arc::new(|_: &E| true))
    }

    pub fn with_filter(name: impl Into<String>, config: CircuitBreakerConfig, counts: ErrorFilter<E>) -> Self {
        Self {
            name: name.into(),
            config,
            circuit: Mutex::new(Circuit::Closed { failures: 0 }),
            counts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Circuit::Closed { .. } => BreakerState::Closed,
            Circuit::Open { .. } => BreakerState::Open,
            Circuit::HalfOpen => BreakerState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match *self.lock() {
            Circuit::Closed { failures } => failures,
            _ => self.config.failure_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Admission {
        let mut circuit = self.lock();
        match *circuit {
            Circuit::Closed { .. } => Admission::Call { trial: false },
            Circuit::Open { since } if since.elapsed() >= self.config.reset_timeout() => {
                info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                *circuit = Circuit::HalfOpen;
                Admission::Call { trial: true }
            }
            Circuit::Open { .. } | Circuit::HalfOpen => Admission::Reject,
        }
    }

    fn record_success(&self) {
        let mut circuit = self.lock();
        if !matches!(*circuit, Circuit::Closed { .. }) {
            info!(breaker = %self.name, "Circuit breaker closed");
        }
        *circuit = Circuit::Closed { failures: 0 };
    }

    fn record_failure(&self) {
        let mut circuit = self.lock();
        match *circuit {
            Circuit::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold.max(1) {
                    warn!(breaker = %self.name, failures, "Circuit breaker opened");
                    *circuit = Circuit::Open { since: Instant::now() };
                } else {
                    *circuit = Circuit::Closed { failures };
                }
            }
            Circuit::HalfOpen | Circuit::Open { .. } => {
                warn!(breaker = %self.name, "Circuit breaker trial failed, reopening");
                *circuit = Circuit::Open { since: Instant::now() };
            }
        }
    }

    /// Run `operation` through the breaker
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = match self.admit() {
            Admission::Call { trial } => trial,
            Admission::Reject => return Err(BreakerError::Open { breaker: self.name.clone() }),
        };

        let mut guard = TrialGuard { breaker: self, armed: trial };
        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if (self.counts)(&error) {
                    self.record_failure();
                } else {
                    // The dependency answered, the request itself was bad
                    self.record_success();
                }
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// Like [`CircuitBreaker::call`], but a rejected call returns the
    /// fallback's value instead of an error
    pub async fn call_with_fallback<T, F, Fut, G, GFut>(&self, operation: F, fallback: G) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = T>,
    {
        match self.call(operation).await {
            Ok(value) => Ok(value),
            Err(BreakerError::Open { .. }) => Ok(fallback().await),
            Err(BreakerError::Inner(error)) => Err(error),
        }
    }
}

/// Reopens the breaker if a half-open trial is dropped before it finishes
struct TrialGuard<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    armed: bool,
}

impl<E> Drop for TrialGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            *self.breaker.lock() = Circuit::Open { since: Instant::now() };
        }
    }
}

//! Retry/circuit-breaker resilience envelope.
//!
//! Wraps a per-endpoint (shard + role) connection operation: transient
//! driver errors are retried with exponential backoff up to a ceiling,
//! after which the circuit opens and rejects calls outright until its
//! reset window elapses. Built once per logical endpoint and reused
//!, mirroring the teacher's health/backoff primitives
//! (`backend::pool::healthcheck`, `backend::pool::shard::monitor`) rather
//! than a named circuit-breaker crate, since none appears in its
//! dependency graph.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use sharddb_config::ResolvedConnection;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::driver::DriverError;
use crate::Error;

/// Decides whether a driver error is safe to retry.
///
/// The driver, not the policy, knows which of its own error kinds are
/// transient; [`DefaultClassifier`] just trusts the flag the driver
/// already attached to [`DriverError`].
pub trait TransientClassifier: Send + Sync {
    fn is_transient(&self, error: &DriverError) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl TransientClassifier for DefaultClassifier {
    fn is_transient(&self, error: &DriverError) -> bool {
        error.transient
    }
}

/// Apply full jitter (50%-150% of `base`) to a backoff delay, so a burst
/// of shards hitting the same transient error don't all retry in
/// lockstep against an endpoint that's still recovering.
fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.5..1.5);
    base.mul_f64(factor)
}

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
}

/// A retry/circuit-breaker policy bound to one resolved endpoint.
pub struct ResiliencePolicy {
    endpoint: String,
    retry_attempts: u32,
    retry_backoff: Duration,
    circuit_breaker_threshold: u32,
    circuit_breaker_reset: Duration,
    classifier: Arc<dyn TransientClassifier>,
    state: Mutex<CircuitState>,
}

impl ResiliencePolicy {
    pub fn new(resolved: &ResolvedConnection) -> Self {
        Self::with_classifier(resolved, Arc::new(DefaultClassifier))
    }

    pub fn with_classifier(resolved: &ResolvedConnection, classifier: Arc<dyn TransientClassifier>) -> Self {
        Self {
            endpoint: format!("{}/{}:{:?}", resolved.shard_set_name, resolved.shard_id, resolved.role),
            retry_attempts: resolved.retry_attempts,
            retry_backoff: Duration::from_millis(resolved.retry_backoff_ms),
            circuit_breaker_threshold: resolved.circuit_breaker_threshold,
            circuit_breaker_reset: Duration::from_millis(resolved.circuit_breaker_reset_ms),
            classifier,
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Run `op`, retrying transient failures with exponential backoff up
    /// to `retry_attempts`, subject to the circuit breaker and `ct`.
    ///
    /// `FnMut` rather than `Fn`: the common caller closes over a checked-out
    /// connection and calls its `&mut self` `execute`, which only a
    /// uniquely-borrowing closure can do.
    pub async fn call<T, F, Fut>(&self, ct: &CancellationToken, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DriverError>>,
    {
        self.check_circuit()?;

        let mut attempt: u32 = 0;
        loop {
            if ct.is_cancelled() {
                return Err(Error::OperationCancelled);
            }

            match op().await {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(driver_err) => {
                    if !self.classifier.is_transient(&driver_err) {
                        self.on_failure();
                        return Err(Error::Transient(Box::new(driver_err)));
                    }

                    attempt += 1;
                    if attempt > self.retry_attempts {
                        warn!(endpoint = %self.endpoint, attempt, "retry ceiling exhausted");
                        self.on_failure();
                        return Err(Error::Transient(Box::new(driver_err)));
                    }

                    let backoff = jittered(self.retry_backoff * attempt);
                    debug!(endpoint = %self.endpoint, attempt, ?backoff, "transient error, retrying");

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = ct.cancelled() => return Err(Error::OperationCancelled),
                    }
                }
            }
        }
    }

    fn check_circuit(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let CircuitState::Open { since } = *state {
            if since.elapsed() < self.circuit_breaker_reset {
                return Err(Error::CircuitOpen(self.endpoint.clone()));
            }
            debug!(endpoint = %self.endpoint, "circuit breaker reset window elapsed, allowing trial request");
            *state = CircuitState::Closed {
                consecutive_failures: self.circuit_breaker_threshold.saturating_sub(1),
            };
        }
        Ok(())
    }

    fn on_success(&self) {
        *self.state.lock() = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    fn on_failure(&self) {
        let mut state = self.state.lock();
        let consecutive_failures = match *state {
            CircuitState::Closed { consecutive_failures } => consecutive_failures + 1,
            CircuitState::Open { .. } => self.circuit_breaker_threshold,
        };

        if consecutive_failures >= self.circuit_breaker_threshold {
            warn!(endpoint = %self.endpoint, "circuit breaker tripped");
            *state = CircuitState::Open { since: Instant::now() };
        } else {
            *state = CircuitState::Closed { consecutive_failures };
        }
    }
}

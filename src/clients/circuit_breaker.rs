use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tracing::{debug, info, warn};

use crate::{
    error::{CircuitOpenError, Retryable},
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// Guards one external dependency.
///
/// State lives in process memory: a trip in one worker process does not affect
/// another process guarding the same dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let dependency = dependency.into();
        info!(
            dependency = %dependency,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout.as_secs_f64(),
            "Circuit breaker initialized"
        );

        Self {
            dependency,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError> + Retryable,
    {
        self.acquire()?;

        let mut guard = CallGuard {
            breaker: self,
            settled: false,
        };

        let result = operation().await;
        guard.settled = true;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.is_retryable() => self.record_failure(),
            // The dependency answered; a permanent failure says nothing about its health.
            Err(_) => self.record_success(),
        }

        result
    }

    fn acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_time
                    .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);

                if cooled_down {
                    info!(dependency = %self.dependency, "Circuit breaker attempting reset");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    warn!(dependency = %self.dependency, "Circuit breaker is open, rejecting request");
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    debug!(dependency = %self.dependency, "Trial call in flight, rejecting request");
                    Err(self.open_error())
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();

        if inner.state == CircuitState::HalfOpen {
            info!(dependency = %self.dependency, "Circuit breaker closed after successful recovery");
        }

        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                warn!(dependency = %self.dependency, "Circuit breaker reopened after failed recovery attempt");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    dependency = %self.dependency,
                    failures = inner.failure_count,
                    "Circuit breaker opened due to consecutive failures"
                );
            }
            _ => {
                debug!(
                    dependency = %self.dependency,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );
            }
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            dependency: self.dependency.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the half-open trial slot when a guarded future is dropped before completing.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

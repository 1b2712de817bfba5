//! Circuit breaker guarding the shared presence backend.
//!
//! While the breaker is open, calls are refused without touching the backend
//! so that a dead Redis costs nothing on the hot path and the fallback store
//! answers from process memory instead.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    /// Circuit is closed, allowing all requests
    Closed,
    /// Circuit is open, rejecting all requests
    Open,
    /// Circuit is half-open, allowing trial requests to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to keep circuit open before trying half-open
    pub open_duration: Duration,
    /// Number of successful requests needed in half-open to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker for handling a failing dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

/// Circuit breaker specific errors
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    /// Creates a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks if the circuit breaker allows the request
    pub async fn can_execute(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.success_count = 0;
                    tracing::info!("Circuit breaker '{}' transitioned to HALF-OPEN", self.name);
                }
                elapsed
            }
        }
    }

    /// Records a successful operation
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitBreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    tracing::info!("Circuit breaker '{}' transitioned to CLOSED", self.name);
                }
            }
            CircuitBreakerState::Closed => inner.failure_count = 0,
            CircuitBreakerState::Open => {}
        }
    }

    /// Records a failed operation
    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        let trip = match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                inner.failure_count >= self.config.failure_threshold
            }
            // Any failure while probing goes straight back to open
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };
        if trip {
            inner.state = CircuitBreakerState::Open;
            inner.success_count = 0;
            inner.opened_at = Some(Instant::now());
            tracing::warn!("Circuit breaker '{}' transitioned to OPEN", self.name);
        }
    }

    pub async fn state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitBreakerState::Open
    }

    /// Runs `operation` under breaker protection, recording its outcome.
    pub async fn call<T, E, Fut>(&self, operation: Fut) -> Result<T, CircuitBreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute().await {
            return Err(CircuitBreakerError::Open(self.name.clone()));
        }
        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure().await;
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            open_duration: Duration::from_millis(50),
            success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let cb = CircuitBreaker::new("test", config(3));

        assert!(cb.can_execute().await);
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);

        cb.record_failure().await;
        assert!(cb.is_open().await);
        assert!(!cb.can_execute().await);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_recovery() {
        let cb = CircuitBreaker::new("test", config(2));
        cb.record_failure().await;
        cb.record_failure().await;
        assert!(cb.is_open().await);

        sleep(Duration::from_millis(60)).await;
        assert!(cb.can_execute().await);
        assert_eq!(cb.state().await, CircuitBreakerState::HalfOpen);

        cb.record_success().await;
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_half_open_failure() {
        let cb = CircuitBreaker::new("test", config(1));
        cb.record_failure().await;
        sleep(Duration::from_millis(60)).await;
        assert!(cb.can_execute().await);

        cb.record_failure().await;
        assert!(cb.is_open().await);
    }

    #[tokio::test]
    async fn open_circuit_skips_the_operation() {
        let cb = CircuitBreaker::new("test", config(1));
        let first: Result<(), _> = cb.call(async { Err::<(), _>("boom") }).await;
        assert!(matches!(first, Err(CircuitBreakerError::Inner("boom"))));

        let mut ran = false;
        let second = cb
            .call(async {
                ran = true;
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(second, Err(CircuitBreakerError::Open(_))));
        assert!(!ran);
    }
}

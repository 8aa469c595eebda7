//! Circuit breaker pattern implementation
//!
//! Prevents piling load onto a failing dependency by rejecting calls after
//! `failure_threshold` failures, then admitting exactly one probe once
//! `recovery_timeout` has elapsed since the last recorded failure.
//!
//! The state triple (`state`, `failure_count`, `last_failure`) and the probe
//! slot live behind one mutex. Admission and recording are each a single
//! critical section; the operation itself runs outside the lock. Only one
//! caller at a time can hold the probe slot, everyone else arriving while it
//! is held is rejected.

use crate::clock::{SharedClock, TokioClock};
use crate::error::{BreakerError, CircuitOpenError, ConfigError};
use crate::events::{ResilienceEvent, SharedSink, TracingSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected
    Open,
    /// Circuit is half-open - a single probe tests recovery
    HalfOpen,
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Name for logging and events
    pub name: String,
    /// Number of failures before opening circuit
    pub failure_threshold: u32,
    /// Minimum time after the last failure before a probe is admitted
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Reject parameters the state machine cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(self.failure_threshold));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Snapshot of breaker internals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    /// Current state
    pub state: CircuitState,
    /// Failures recorded since the last success
    pub failure_count: u32,
    /// Instant of the most recent failure
    pub last_failure: Option<Instant>,
    /// Whether a half-open probe is currently running
    pub probe_in_flight: bool,
}

/// Circuit breaker guarding calls to one dependency.
///
/// Long-lived; share it by reference or `Arc` among the callers of that
/// dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    sink: SharedSink,
    inner: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("inner", &self.inner)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker on the tokio clock, reporting through `tracing`
    pub fn try_new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(TokioClock),
            sink: Arc::new(TracingSink),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the event sink
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state.
    ///
    /// Open only becomes HalfOpen on the next call attempt, so this keeps
    /// reporting Open after the recovery timeout until someone calls.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.inner.lock();
        CircuitMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Run `operation` if the breaker admits it.
    ///
    /// Rejections never invoke the operation. Operation failures are recorded
    /// and handed back unchanged inside [`BreakerError::Inner`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().map_err(BreakerError::Open)?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: admission == Admission::Probe,
        };

        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(admission);
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.config.name.clone(),
            retry_after,
        }
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.open_error(Duration::ZERO));
                }
                inner.probe_in_flight = true;
                Ok(Admission::Probe)
            }
            CircuitState::Open => {
                if inner.probe_in_flight {
                    return Err(self.open_error(Duration::ZERO));
                }
                let elapsed = inner
                    .last_failure
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed > self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    drop(inner);
                    self.sink.emit(&ResilienceEvent::BreakerHalfOpen {
                        source: self.config.name.clone(),
                    });
                    Ok(Admission::Probe)
                } else {
                    Err(self.open_error(self.config.recovery_timeout - elapsed))
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        let closed = match (admission, inner.state) {
            (Admission::Probe, _) => {
                inner.probe_in_flight = false;
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                true
            }
            (Admission::Normal, CircuitState::Closed) => {
                inner.failure_count = 0;
                false
            }
            // Admitted before the circuit tripped; the probe decides recovery.
            (Admission::Normal, _) => false,
        };
        drop(inner);

        if closed {
            self.sink.emit(&ResilienceEvent::BreakerClosed {
                source: self.config.name.clone(),
            });
        }
    }

    fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        if admission == Admission::Probe {
            inner.probe_in_flight = false;
        }

        let trips = admission == Admission::Probe
            || (inner.state != CircuitState::Open
                && inner.failure_count >= self.config.failure_threshold);
        let failures = inner.failure_count;
        if trips {
            inner.state = CircuitState::Open;
        }
        drop(inner);

        if trips {
            self.sink.emit(&ResilienceEvent::BreakerOpened {
                source: self.config.name.clone(),
                failures,
            });
        }
    }
}

/// Releases the probe slot if the probe never reports back (the caller
/// dropped the future or the operation panicked).
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::RecordingSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_pending, assert_ready};

    fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, ManualClock, RecordingSink) {
        let clock = ManualClock::new();
        let sink = RecordingSink::new();
        let cb = CircuitBreaker::try_new(
            CircuitBreakerConfig::new("test")
                .with_failure_threshold(threshold)
                .with_recovery_timeout(recovery),
        )
        .unwrap()
        .with_clock(Arc::new(clock.clone()))
        .with_sink(Arc::new(sink.clone()));
        (cb, clock, sink)
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.call(|| async { Ok::<_, &str>(7) }).await
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let (cb, _, _) = breaker(3, Duration::from_secs(5));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.metrics().last_failure, None);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = CircuitBreaker::try_new(CircuitBreakerConfig::new("x").with_failure_threshold(0))
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidFailureThreshold(0));
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let (cb, _, sink) = breaker(3, Duration::from_secs(5));

        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner("boom"))));
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(
            sink.count(|e| matches!(e, ResilienceEvent::BreakerOpened { failures: 3, .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let (cb, clock, _) = breaker(1, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();

        clock.advance(Duration::from_secs(2));
        let calls = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        match result {
            Err(BreakerError::Open(e)) => {
                assert_eq!(e.name, "test");
                assert_eq!(e.retry_after, Duration::from_secs(3));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exact_timeout_still_rejects() {
        let (cb, clock, _) = breaker(1, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();

        clock.advance(Duration::from_secs(5));
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (cb, _, _) = breaker(3, Duration::from_secs(5));

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(succeed(&cb).await.unwrap(), 7);

        assert_eq!(cb.metrics().failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let (cb, clock, sink) = breaker(2, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();

        clock.advance(Duration::from_secs(6));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(succeed(&cb).await.unwrap(), 7);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().failure_count, 0);
        let kinds: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    ResilienceEvent::BreakerHalfOpen { .. } | ResilienceEvent::BreakerClosed { .. }
                )
            })
            .collect();
        assert_eq!(kinds.len(), 2);
        assert!(matches!(kinds[0], ResilienceEvent::BreakerHalfOpen { .. }));
        assert!(matches!(kinds[1], ResilienceEvent::BreakerClosed { .. }));
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure() {
        let (cb, clock, _) = breaker(2, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        let first_failure = cb.metrics().last_failure.unwrap();

        clock.advance(Duration::from_secs(6));
        assert!(matches!(fail(&cb).await, Err(BreakerError::Inner(_))));

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.failure_count, 3);
        assert!(metrics.last_failure.unwrap() > first_failure);
        assert!(!metrics.probe_in_flight);

        // recovery is measured from the refreshed failure
        clock.advance(Duration::from_secs(1));
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_concurrent_caller_rejected_during_probe() {
        let (cb, clock, _) = breaker(1, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(6));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut probe = tokio_test::task::spawn(cb.call(|| async move {
            rx.await.ok();
            Ok::<_, &str>("recovered")
        }));
        assert_pending!(probe.poll());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.metrics().probe_in_flight);

        let second = succeed(&cb).await.unwrap_err();
        assert!(second.is_open());

        tx.send(()).unwrap();
        let result = assert_ready!(probe.poll());
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_probe_releases_slot() {
        let (cb, clock, _) = breaker(1, Duration::from_secs(5));
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(6));

        {
            let mut probe = tokio_test::task::spawn(
                cb.call(|| std::future::pending::<Result<(), &'static str>>()),
            );
            assert_pending!(probe.poll());
            assert!(cb.metrics().probe_in_flight);
        }

        assert!(!cb.metrics().probe_in_flight);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_success_does_not_close_open_circuit() {
        let (cb, _, _) = breaker(1, Duration::from_secs(5));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut slow = tokio_test::task::spawn(cb.call(|| async move {
            rx.await.ok();
            Ok::<_, &str>(1)
        }));
        assert_pending!(slow.poll());

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        tx.send(()).unwrap();
        assert_eq!(assert_ready!(slow.poll()).unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"name": "rpc", "failure_threshold": 5}"#).unwrap();
        assert_eq!(config.name, "rpc");
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(5));
    }
}

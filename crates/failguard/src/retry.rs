//! Retry orchestration with per-attempt deadlines, exponential backoff and a
//! guaranteed fallback.
//!
//! `execute` is total: every error sequence resolves to either the
//! operation's value or the configured fallback. Misconfiguration is the only
//! hard error and it surfaces from [`RetryOrchestratorBuilder::build`].

use crate::backoff::{BackoffConfig, BackoffPolicy};
use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{SharedClock, TokioClock};
use crate::error::{AttemptError, BreakerError, CircuitOpenError, ConfigError, ErrorKind};
use crate::events::{ResilienceEvent, SharedSink, TracingSink};
use crate::retry_policy::RetryClassifier;
use crate::timeout::{with_timeout, Deadline};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Name for logging and events
    pub name: String,
    /// Upper bound on attempts per `execute`
    pub max_retries: u32,
    /// Deadline applied to each individual attempt
    pub per_attempt_timeout: Duration,
    /// Whether a timed-out attempt may be retried
    pub retry_on_timeout: bool,
    /// Delay schedule between attempts
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_retries: 3,
            per_attempt_timeout: Duration::from_secs(5),
            retry_on_timeout: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryConfig {
    /// Create a new config with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set maximum attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt deadline
    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Choose whether timeouts are retried
    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    /// Set the backoff schedule
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Parse a JSON document, filling unspecified fields with defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.backoff.validate()?;
        Ok(config)
    }
}

/// Why `execute` resolved to the fallback value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Every permitted attempt failed with a retryable error
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// An error outside the retryable set ended execution early
    NonRetryable {
        /// What kind of failure it was
        kind: ErrorKind,
    },
    /// A guarding breaker refused the attempt
    Rejected(CircuitOpenError),
    /// The caller cancelled
    Cancelled,
    /// Configured for zero attempts
    NoAttempts,
}

/// Result of an orchestrated execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation produced a value
    Success(T),
    /// The fallback value was returned
    Fallback {
        /// The configured fallback
        value: T,
        /// Why
        reason: FallbackReason,
    },
}

impl<T> Outcome<T> {
    /// The carried value, success or fallback
    pub fn into_value(self) -> T {
        match self {
            Self::Success(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Borrow the carried value
    pub fn value(&self) -> &T {
        match self {
            Self::Success(value) | Self::Fallback { value, .. } => value,
        }
    }

    /// Whether the operation itself succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Fallback reason, if any
    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            Self::Success(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Tagged result of one attempt, consumed by the retry loop
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    /// The attempt produced a value
    Success(T),
    /// Transient failure; another attempt may follow
    RetryableFailure(AttemptError<E>),
    /// Failure that ends execution immediately
    FatalFailure(AttemptError<E>),
}

/// Context handed to the operation on every attempt
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    /// When this attempt will be abandoned
    pub deadline: Deadline,
    /// Cancelled when the attempt is abandoned or the caller cancels
    pub token: CancellationToken,
}

/// Retries a unit of work and falls back to a fixed value on exhaustion
pub struct RetryOrchestrator<T> {
    config: RetryConfig,
    backoff: BackoffPolicy,
    fallback: T,
    clock: SharedClock,
    sink: SharedSink,
}

impl<T: std::fmt::Debug> std::fmt::Debug for RetryOrchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("config", &self.config)
            .field("fallback", &self.fallback)
            .field("clock", &self.clock)
            .finish()
    }
}

/// Builder for [`RetryOrchestrator`]
pub struct RetryOrchestratorBuilder<T> {
    config: RetryConfig,
    fallback: Option<T>,
    clock: SharedClock,
    sink: SharedSink,
}

impl<T> RetryOrchestratorBuilder<T> {
    /// Value returned when attempts are exhausted
    pub fn fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Time source for deadlines and backoff
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Event sink
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<RetryOrchestrator<T>, ConfigError> {
        let backoff = BackoffPolicy::new(self.config.backoff.clone())?;
        let fallback = self
            .fallback
            .ok_or_else(|| ConfigError::MissingFallback(self.config.name.clone()))?;

        Ok(RetryOrchestrator {
            config: self.config,
            backoff,
            fallback,
            clock: self.clock,
            sink: self.sink,
        })
    }
}

impl<T> RetryOrchestrator<T> {
    /// Start building an orchestrator
    pub fn builder(config: RetryConfig) -> RetryOrchestratorBuilder<T> {
        RetryOrchestratorBuilder {
            config,
            fallback: None,
            clock: Arc::new(TokioClock),
            sink: Arc::new(TracingSink),
        }
    }

    /// Orchestrator configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// The backoff policy in use
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// The configured fallback value
    pub fn fallback_value(&self) -> &T {
        &self.fallback
    }
}

impl<T: Clone> RetryOrchestrator<T> {
    /// Run `operation` until it succeeds, fails fatally or runs out of
    /// attempts. Never fails.
    pub async fn execute<E, F, Fut, C>(&self, operation: F, classifier: C) -> T
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: RetryClassifier<E>,
    {
        self.execute_outcome(operation, classifier)
            .await
            .into_value()
    }

    /// Like [`execute`](Self::execute), reporting how the value was obtained
    pub async fn execute_outcome<E, F, Fut, C>(&self, operation: F, classifier: C) -> Outcome<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: RetryClassifier<E>,
    {
        self.execute_with(None, &CancellationToken::new(), operation, classifier)
            .await
    }

    /// Run every attempt through `breaker`. A rejection is fatal and does not
    /// consume retry budget.
    pub async fn execute_guarded<E, F, Fut, C>(
        &self,
        breaker: &CircuitBreaker,
        operation: F,
        classifier: C,
    ) -> Outcome<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: RetryClassifier<E>,
    {
        self.execute_with(Some(breaker), &CancellationToken::new(), operation, classifier)
            .await
    }

    /// General form: optional breaker and a caller cancellation token.
    ///
    /// Cancelling `token` abandons the in-flight attempt or backoff sleep and
    /// resolves to the fallback with [`FallbackReason::Cancelled`].
    pub async fn execute_with<E, F, Fut, C>(
        &self,
        breaker: Option<&CircuitBreaker>,
        token: &CancellationToken,
        mut operation: F,
        classifier: C,
    ) -> Outcome<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: RetryClassifier<E>,
    {
        let max = self.config.max_retries;
        let mut attempt = 0;

        while attempt < max {
            let number = attempt + 1;
            self.sink.emit(&ResilienceEvent::AttemptStarted {
                source: self.config.name.clone(),
                n: number,
            });

            let result = self.run_attempt(breaker, token, &mut operation, number).await;
            match self.classify(result, &classifier) {
                AttemptOutcome::Success(value) => {
                    self.sink.emit(&ResilienceEvent::AttemptSucceeded {
                        source: self.config.name.clone(),
                        n: number,
                    });
                    return Outcome::Success(value);
                }
                AttemptOutcome::FatalFailure(err) => {
                    let kind = err.kind(false);
                    self.emit_failed(number, kind);
                    tracing::debug!(
                        source = %self.config.name,
                        attempt = number,
                        error = %kind,
                        "Non-retryable failure"
                    );
                    let reason = match err {
                        AttemptError::Rejected(open) => FallbackReason::Rejected(open),
                        AttemptError::Cancelled => FallbackReason::Cancelled,
                        _ => FallbackReason::NonRetryable { kind },
                    };
                    return self.fall_back(reason);
                }
                AttemptOutcome::RetryableFailure(err) => {
                    attempt += 1;
                    self.emit_failed(number, err.kind(true));
                    tracing::debug!(
                        source = %self.config.name,
                        attempt,
                        remaining = max - attempt,
                        "Operation failed, will retry"
                    );

                    if attempt == max {
                        return self.fall_back(FallbackReason::Exhausted { attempts: attempt });
                    }

                    let delay = self.backoff.delay(attempt);
                    tracing::trace!(delay = ?delay, "Waiting before retry");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return self.fall_back(FallbackReason::Cancelled),
                        _ = self.clock.sleep(delay) => {}
                    }
                }
            }
        }

        self.fall_back(FallbackReason::NoAttempts)
    }

    /// Map an attempt result onto the loop's tagged outcome
    pub fn classify<E, C>(
        &self,
        result: Result<T, AttemptError<E>>,
        classifier: &C,
    ) -> AttemptOutcome<T, E>
    where
        C: RetryClassifier<E>,
    {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(err) => {
                let retryable = match &err {
                    AttemptError::Timeout(_) => self.config.retry_on_timeout,
                    AttemptError::Rejected(_) | AttemptError::Cancelled => false,
                    AttemptError::Operation(e) => classifier.is_retryable(e),
                };
                if retryable {
                    AttemptOutcome::RetryableFailure(err)
                } else {
                    AttemptOutcome::FatalFailure(err)
                }
            }
        }
    }

    async fn run_attempt<E, F, Fut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        token: &CancellationToken,
        operation: &mut F,
        number: u32,
    ) -> Result<T, AttemptError<E>>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let timeout = self.config.per_attempt_timeout;
        let attempt_token = token.child_token();
        let attempt = Attempt {
            number,
            deadline: Deadline::starting_now(self.clock.as_ref(), timeout),
            token: attempt_token.clone(),
        };

        let mut timed = |attempt: Attempt| {
            let fut = operation(attempt);
            async move {
                match with_timeout(self.clock.as_ref(), timeout, &self.config.name, fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(AttemptError::Operation(e)),
                    Err(elapsed) => Err(AttemptError::Timeout(elapsed)),
                }
            }
        };

        let guarded = async {
            match breaker {
                Some(cb) => cb.call(|| timed(attempt)).await.map_err(|e| match e {
                    BreakerError::Open(open) => AttemptError::Rejected(open),
                    BreakerError::Inner(inner) => inner,
                }),
                None => timed(attempt).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AttemptError::Cancelled),
            out = guarded => out,
        };

        // whatever the operation left running for this attempt is now orphaned
        attempt_token.cancel();
        result
    }

    fn emit_failed(&self, n: u32, error_kind: ErrorKind) {
        self.sink.emit(&ResilienceEvent::AttemptFailed {
            source: self.config.name.clone(),
            n,
            error_kind,
        });
    }

    fn fall_back(&self, reason: FallbackReason) -> Outcome<T> {
        self.sink.emit(&ResilienceEvent::FallbackReturned {
            source: self.config.name.clone(),
            reason: reason.clone(),
        });
        Outcome::Fallback {
            value: self.fallback.clone(),
            reason,
        }
    }
}

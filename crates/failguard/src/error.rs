//! Error taxonomy shared by the breaker and the retry orchestrator.
//!
//! Only [`ConfigError`] is ever surfaced as a hard failure, and only at
//! construction time. Everything else is either re-raised by the breaker to
//! its direct caller or absorbed into a fallback by the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Invalid constructor parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Breaker threshold must be at least one failure
    #[error("failure threshold must be >= 1 (got {0})")]
    InvalidFailureThreshold(u32),

    /// Backoff multiplier must be at least 1
    #[error("backoff multiplier must be >= 1 (got {0})")]
    InvalidMultiplier(u32),

    /// Jitter is a fraction of the delay
    #[error("backoff jitter must be within [0, 1] (got {0})")]
    InvalidJitter(f64),

    /// Cap lower than the base unit would flatten every delay
    #[error("backoff max delay {max:?} is below the base unit {unit:?}")]
    MaxDelayBelowUnit {
        /// Configured cap
        max: Duration,
        /// Configured base unit
        unit: Duration,
    },

    /// The orchestrator has nothing to return on exhaustion
    #[error("retry orchestrator '{0}' has no fallback value")]
    MissingFallback(String),

    /// Configuration document could not be parsed
    #[error("invalid configuration document: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// The breaker rejected a call without invoking the operation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("circuit '{name}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the circuit breaker
    pub name: String,
    /// Time until a probe may be admitted
    pub retry_after: Duration,
}

/// An attempt did not complete before its deadline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation '{operation}' timed out after {duration:?}")]
pub struct TimeoutError {
    /// The operation that timed out
    pub operation: String,
    /// The deadline that was exceeded
    pub duration: Duration,
}

/// Error returned by [`CircuitBreaker::call`](crate::CircuitBreaker::call)
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected locally, the operation never ran
    #[error(transparent)]
    Open(CircuitOpenError),
    /// The operation ran and failed; the failure has been recorded
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns the inner operation error, if the operation ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open(_) => None,
            Self::Inner(e) => Some(e),
        }
    }

    /// Whether the call was rejected without running
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Why a single attempt inside the orchestrator failed
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The per-attempt deadline elapsed
    #[error(transparent)]
    Timeout(TimeoutError),
    /// A guarding breaker refused the attempt
    #[error(transparent)]
    Rejected(CircuitOpenError),
    /// The caller cancelled the execution
    #[error("attempt cancelled")]
    Cancelled,
    /// The operation itself reported a failure
    #[error("{0}")]
    Operation(E),
}

impl<E> AttemptError<E> {
    /// Flat discriminant for events. Operation errors are reported as
    /// `Transport` or `Unexpected` depending on how they were classified.
    pub fn kind(&self, retryable: bool) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Rejected(_) => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Operation(_) if retryable => ErrorKind::Transport,
            Self::Operation(_) => ErrorKind::Unexpected,
        }
    }
}

/// Serializable error discriminant carried by events and fallback reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deadline exceeded
    Timeout,
    /// Retryable operation failure
    Transport,
    /// Breaker rejection
    CircuitOpen,
    /// Failure outside the retryable set
    Unexpected,
    /// Caller cancellation
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::CircuitOpen => "circuit_open",
            Self::Unexpected => "unexpected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_display() {
        let err = CircuitOpenError {
            name: "sensor".to_string(),
            retry_after: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("sensor"));
        assert!(msg.contains("3s"));
    }

    #[test]
    fn test_breaker_error_into_inner() {
        let inner: BreakerError<&str> = BreakerError::Inner("boom");
        assert!(!inner.is_open());
        assert_eq!(inner.into_inner(), Some("boom"));

        let open: BreakerError<&str> = BreakerError::Open(CircuitOpenError {
            name: "x".into(),
            retry_after: Duration::ZERO,
        });
        assert!(open.is_open());
        assert_eq!(open.into_inner(), None);
    }

    #[test]
    fn test_attempt_error_kind() {
        let timeout: AttemptError<()> = AttemptError::Timeout(TimeoutError {
            operation: "fetch".into(),
            duration: Duration::from_secs(1),
        });
        assert_eq!(timeout.kind(true), ErrorKind::Timeout);

        let op: AttemptError<&str> = AttemptError::Operation("refused");
        assert_eq!(op.kind(true), ErrorKind::Transport);
        assert_eq!(op.kind(false), ErrorKind::Unexpected);
        assert_eq!(AttemptError::<()>::Cancelled.kind(false), ErrorKind::Cancelled);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CircuitOpen).unwrap();
        assert_eq!(json, "\"circuit_open\"");
    }

    #[test]
    fn test_config_error_from_json() {
        let err: ConfigError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}

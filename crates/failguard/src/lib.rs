//! # failguard
//!
//! Execution wrappers that protect callers from a failing or slow dependency:
//!
//! - **Circuit Breaker**: stop calling a dependency after repeated failures,
//!   then admit a single probe once it had time to recover
//! - **Retry Orchestrator**: bounded attempts, per-attempt deadlines,
//!   exponential backoff and a guaranteed fallback value
//! - **Backoff / Clock**: a pure delay schedule and an injected time source,
//!   so everything can be tested on virtual time
//! - **Events**: structured events for an external observer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use failguard::{
//!     CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryOrchestrator, RetryAll,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), failguard::ConfigError> {
//! let breaker = CircuitBreaker::try_new(
//!     CircuitBreakerConfig::new("sensor_api")
//!         .with_failure_threshold(3)
//!         .with_recovery_timeout(Duration::from_secs(5)),
//! )?;
//!
//! let retry = RetryOrchestrator::builder(
//!     RetryConfig::new("sensor_api")
//!         .with_max_retries(3)
//!         .with_per_attempt_timeout(Duration::from_secs(1)),
//! )
//! .fallback("degraded")
//! .build()?;
//!
//! let outcome = retry
//!     .execute_guarded(&breaker, |_attempt| async { Ok::<_, std::io::Error>("reading") }, RetryAll)
//!     .await;
//! println!("{:?}", outcome.into_value());
//! # Ok(())
//! # }
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use failguard::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let cb = CircuitBreaker::try_new(CircuitBreakerConfig::new("my_service")).unwrap();
//! assert_eq!(cb.state(), CircuitState::Closed);
//! ```
//!
//! ## Backoff
//!
//! ```rust
//! use failguard::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::default();
//! assert_eq!(policy.schedule(3), vec![Duration::from_secs(2), Duration::from_secs(4)]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod events;
pub mod fetch;
pub mod retry;
pub mod retry_policy;
pub mod timeout;

pub use backoff::{BackoffConfig, BackoffPolicy};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};

pub use clock::{Clock, ManualClock, SharedClock, TokioClock};

pub use error::{
    AttemptError, BreakerError, CircuitOpenError, ConfigError, ErrorKind, TimeoutError,
};

pub use events::{EventSink, NoopSink, RecordingSink, ResilienceEvent, SharedSink, TracingSink};

pub use fetch::{
    degraded, DataSource, DecodeError, Decoder, FetchError, FetchPipeline, JsonDecoder,
    PipelineClassifier, PipelineError,
};

pub use retry::{
    Attempt, AttemptOutcome, FallbackReason, Outcome, RetryConfig, RetryOrchestrator,
    RetryOrchestratorBuilder,
};

pub use retry_policy::{
    MessageClassifier, RetryAll, RetryClassifier, RetryNone, TransportClassifier,
};

pub use timeout::{with_timeout, Deadline};

pub use tokio_util::sync::CancellationToken;

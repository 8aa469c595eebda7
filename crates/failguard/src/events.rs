//! Structured events emitted by the breaker and the orchestrator
//!
//! The core never formats logs itself beyond `tracing` diagnostics; it hands
//! discrete [`ResilienceEvent`]s to an injected [`EventSink`].

use crate::error::ErrorKind;
use crate::retry::FallbackReason;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Discrete observable event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// An orchestrator attempt is about to run (1-based)
    AttemptStarted {
        /// Orchestrator name
        source: String,
        /// Attempt number
        n: u32,
    },
    /// An orchestrator attempt failed
    AttemptFailed {
        /// Orchestrator name
        source: String,
        /// Attempt number
        n: u32,
        /// Classified failure
        error_kind: ErrorKind,
    },
    /// An orchestrator attempt produced a value
    AttemptSucceeded {
        /// Orchestrator name
        source: String,
        /// Attempt number
        n: u32,
    },
    /// Breaker tripped to Open
    BreakerOpened {
        /// Breaker name
        source: String,
        /// Failure count at the time of opening
        failures: u32,
    },
    /// Breaker admitted a probe
    BreakerHalfOpen {
        /// Breaker name
        source: String,
    },
    /// Breaker recovered
    BreakerClosed {
        /// Breaker name
        source: String,
    },
    /// Orchestrator resolved to its fallback value
    FallbackReturned {
        /// Orchestrator name
        source: String,
        /// Why the fallback was used
        reason: FallbackReason,
    },
}

impl ResilienceEvent {
    /// Name of the component that emitted the event
    pub fn source(&self) -> &str {
        match self {
            Self::AttemptStarted { source, .. }
            | Self::AttemptFailed { source, .. }
            | Self::AttemptSucceeded { source, .. }
            | Self::BreakerOpened { source, .. }
            | Self::BreakerHalfOpen { source }
            | Self::BreakerClosed { source }
            | Self::FallbackReturned { source, .. } => source,
        }
    }
}

/// Consumer of resilience events
pub trait EventSink: Send + Sync {
    /// Receive one event. Must not block.
    fn emit(&self, event: &ResilienceEvent);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn EventSink>;

/// Forwards events to `tracing`.
///
/// Attempt failures log at `warn`, fallbacks at `error`, recovery and
/// success at `info`, everything else at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::AttemptStarted { source, n } => {
                tracing::debug!(source = %source, attempt = n, "Attempt started");
            }
            ResilienceEvent::AttemptFailed {
                source,
                n,
                error_kind,
            } => {
                tracing::warn!(source = %source, attempt = n, error_kind = %error_kind, "Attempt failed");
            }
            ResilienceEvent::AttemptSucceeded { source, n } => {
                tracing::info!(source = %source, attempt = n, "Attempt succeeded");
            }
            ResilienceEvent::BreakerOpened { source, failures } => {
                tracing::warn!(circuit = %source, failures = failures, "Circuit opened due to failures");
            }
            ResilienceEvent::BreakerHalfOpen { source } => {
                tracing::debug!(circuit = %source, "Circuit half-open, admitting probe");
            }
            ResilienceEvent::BreakerClosed { source } => {
                tracing::info!(circuit = %source, "Circuit closed after successful probe");
            }
            ResilienceEvent::FallbackReturned { source, reason } => {
                tracing::error!(source = %source, reason = ?reason, "Falling back to safe value");
            }
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ResilienceEvent>>>,
}

impl RecordingSink {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `pred`
    pub fn count(&self, pred: impl Fn(&ResilienceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = ResilienceEvent::AttemptFailed {
            source: "fetch".to_string(),
            n: 2,
            error_kind: ErrorKind::Timeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "attempt_failed");
        assert_eq!(json["n"], 2);
        assert_eq!(json["error_kind"], "timeout");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.emit(&ResilienceEvent::BreakerHalfOpen {
            source: "cb".into(),
        });
        sink.emit(&ResilienceEvent::BreakerClosed {
            source: "cb".into(),
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(
            sink.count(|e| matches!(e, ResilienceEvent::BreakerClosed { .. })),
            1
        );
        assert_eq!(sink.events()[0].source(), "cb");

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.emit(&ResilienceEvent::FallbackReturned {
            source: "fetch".into(),
            reason: FallbackReason::NoAttempts,
        });
    }
}

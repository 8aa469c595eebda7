//! Scoped deadlines for individual attempts
//!
//! A deadline races the work against a [`Clock`] sleep. Whichever loses is
//! dropped, so timers and in-flight work are released on every exit path.

use crate::clock::Clock;
use crate::error::TimeoutError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Run `future` for at most `duration` as measured by `clock`.
///
/// The future is polled before the timer, so work that is already complete
/// wins even with a zero duration.
pub async fn with_timeout<T>(
    clock: &dyn Clock,
    duration: Duration,
    operation: &str,
    future: impl Future<Output = T>,
) -> Result<T, TimeoutError> {
    tokio::select! {
        biased;
        out = future => Ok(out),
        _ = clock.sleep(duration) => Err(TimeoutError {
            operation: operation.to_string(),
            duration,
        }),
    }
}

/// Absolute point in time by which an attempt must finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` after `start`
    pub fn new(start: Instant, timeout: Duration) -> Self {
        Self { start, timeout }
    }

    /// Deadline starting at the clock's current instant
    pub fn starting_now(clock: &dyn Clock, timeout: Duration) -> Self {
        Self::new(clock.now(), timeout)
    }

    /// The instant at which the deadline expires, or `None` when the budget
    /// reaches past any representable instant
    pub fn at(&self) -> Option<Instant> {
        self.start.checked_add(self.timeout)
    }

    /// The configured budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check if deadline has passed
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.at().is_some_and(|at| clock.now() >= at)
    }

    /// Get remaining time; `Duration::MAX` for a deadline that never expires
    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        match self.at() {
            Some(at) => at.saturating_duration_since(clock.now()),
            None => Duration::MAX,
        }
    }

    /// Check if enough time remains for an operation
    pub fn has_time_for(&self, clock: &dyn Clock, estimate: Duration) -> bool {
        self.remaining(clock) >= estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};

    #[tokio::test]
    async fn test_with_timeout_success() {
        let clock = ManualClock::new();
        let result = with_timeout(&clock, Duration::from_secs(1), "test", async { 42 }).await;

        assert_eq!(result.unwrap(), 42);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_ready_future_wins_zero_deadline() {
        let clock = ManualClock::new();
        let result = with_timeout(&clock, Duration::ZERO, "test", async { "done" }).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_with_timeout_expired_manual() {
        let clock = ManualClock::new();
        let result = with_timeout(
            &clock,
            Duration::from_secs(1),
            "slow_op",
            std::future::pending::<()>(),
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "slow_op");
        assert_eq!(err.duration, Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expired_tokio() {
        let result = with_timeout(&TokioClock, Duration::from_millis(10), "slow_op", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_deadline_tracking() {
        let clock = ManualClock::new();
        let deadline = Deadline::starting_now(&clock, Duration::from_secs(10));

        assert!(!deadline.is_expired(&clock));
        assert!(deadline.has_time_for(&clock, Duration::from_secs(5)));
        assert!(!deadline.has_time_for(&clock, Duration::from_secs(15)));

        clock.advance(Duration::from_secs(7));
        assert_eq!(deadline.remaining(&clock), Duration::from_secs(3));

        clock.advance(Duration::from_secs(3));
        assert!(deadline.is_expired(&clock));
        assert_eq!(deadline.remaining(&clock), Duration::ZERO);
    }

    #[test]
    fn test_unbounded_deadline_never_expires() {
        let deadline = Deadline::starting_now(&TokioClock, Duration::MAX);

        assert_eq!(deadline.at(), None);
        assert!(!deadline.is_expired(&TokioClock));
        assert_eq!(deadline.remaining(&TokioClock), Duration::MAX);
        assert!(deadline.has_time_for(&TokioClock, Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_with_timeout_max_duration() {
        let result = with_timeout(&TokioClock, Duration::MAX, "test", async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }
}

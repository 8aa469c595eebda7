//! Injected monotonic time source
//!
//! Both the breaker and the orchestrator read time and sleep only through a
//! [`Clock`], so tests can drive them without wall-clock waits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// About 30 years. Overflowing advances land this far ahead instead.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Monotonic time source and sleeper
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
///
/// Honors tokio's paused time, so `#[tokio::test(start_paused = true)]`
/// tests run on virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct ManualState {
    now: Instant,
    sleeps: Vec<Duration>,
}

impl ManualState {
    fn advance(&mut self, duration: Duration) {
        let now = self.now;
        self.now = now
            .checked_add(duration)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
    }
}

/// Manually driven clock.
///
/// `sleep` completes immediately after advancing the clock by the requested
/// duration and recording it. Clones share the same timeline.
///
/// Because sleeps never suspend, a deadline raced against this clock expires
/// on the first pending poll of the guarded work, whatever its length. Work
/// that must finish in time has to complete without yielding.
///
/// Advancing past the last representable instant parks the clock in the far
/// future instead of overflowing.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        let origin = Instant::now();
        Self {
            origin,
            state: Arc::new(Mutex::new(ManualState {
                now: origin,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        self.state.lock().advance(duration);
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.state.lock().now - self.origin
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of all recorded sleeps, saturating at `Duration::MAX`
    pub fn total_slept(&self) -> Duration {
        self.state
            .lock()
            .sleeps
            .iter()
            .fold(Duration::ZERO, |total, d| total.saturating_add(*d))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.advance(duration);
        state.sleeps.push(duration);
    }
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

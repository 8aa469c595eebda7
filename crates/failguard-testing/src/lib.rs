//! # failguard testing support
//!
//! Test doubles for exercising breakers and orchestrators deterministically:
//! - [`Script`]: a scripted sequence of successes, failures and hangs
//! - [`ScriptedSource`]: a [`DataSource`] replaying a script
//! - proptest strategies generating failure sequences
//!
//! ## Usage
//!
//! ```rust,ignore
//! use failguard_testing::{Script, Step, TestError};
//!
//! let script = Script::new(vec![Step::Fail(TestError::Transient), Step::Succeed(1)]);
//! let value = orchestrator.execute(|_| script.next(), TestError::is_transient).await;
//! assert_eq!(script.calls(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use failguard::{DataSource, Deadline, FetchError};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Scripted operations
// ============================================================================

/// One scripted step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T, E> {
    /// Resolve with a value
    Succeed(T),
    /// Resolve with an error
    Fail(E),
    /// Never resolve
    Hang,
}

/// Replays steps in order; the last step repeats once the script runs out.
#[derive(Debug)]
pub struct Script<T, E> {
    steps: Mutex<VecDeque<Step<T, E>>>,
    last: Mutex<Option<Step<T, E>>>,
    calls: AtomicU32,
}

impl<T: Clone, E: Clone> Script<T, E> {
    /// Script the given steps
    pub fn new(steps: Vec<Step<T, E>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// A script that fails with `error` forever
    pub fn always_failing(error: E) -> Self {
        Self::new(vec![Step::Fail(error)])
    }

    /// A script that succeeds with `value` forever
    pub fn always_succeeding(value: T) -> Self {
        Self::new(vec![Step::Succeed(value)])
    }

    /// `failures` failures followed by a success
    pub fn fail_then_succeed(failures: usize, error: E, value: T) -> Self {
        let mut steps = vec![Step::Fail(error); failures];
        steps.push(Step::Succeed(value));
        Self::new(steps)
    }

    /// Number of times the operation actually started
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn advance(&self) -> Option<Step<T, E>> {
        let mut last = self.last.lock();
        match self.steps.lock().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }

    /// Run the next step. Counting happens when the future is first polled,
    /// so futures that are built but never run are not counted.
    pub async fn next(&self) -> Result<T, E> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.advance() {
            Some(Step::Succeed(value)) => Ok(value),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Hang) | None => std::future::pending().await,
        }
    }
}

/// Error type for scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestError {
    /// Worth retrying
    Transient,
    /// Not worth retrying
    Fatal,
}

impl TestError {
    /// Classifier usable directly with the orchestrator
    pub fn is_transient(error: &TestError) -> bool {
        matches!(error, TestError::Transient)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient failure"),
            Self::Fatal => write!(f, "fatal failure"),
        }
    }
}

impl std::error::Error for TestError {}

// ============================================================================
// Scripted data source
// ============================================================================

/// A [`DataSource`] replaying a script of payloads and fetch errors
#[derive(Debug)]
pub struct ScriptedSource {
    script: Script<Vec<u8>, FetchError>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedSource {
    /// Replay `steps`
    pub fn new(steps: Vec<Step<Vec<u8>, FetchError>>) -> Self {
        Self {
            script: Script::new(steps),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Identifiers requested so far
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    /// Number of fetches started
    pub fn calls(&self) -> u32 {
        self.script.calls()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    type Payload = Vec<u8>;

    async fn fetch(&self, identifier: &str, _deadline: Deadline) -> Result<Vec<u8>, FetchError> {
        self.requested.lock().push(identifier.to_string());
        self.script.next().await
    }
}

// ============================================================================
// Property-based testing strategies
// ============================================================================

/// Strategy for a single step over `u32` values and [`TestError`]
pub fn step() -> impl Strategy<Value = Step<u32, TestError>> {
    prop_oneof![
        3 => Just(Step::Fail(TestError::Transient)),
        1 => Just(Step::Fail(TestError::Fatal)),
        1 => Just(Step::Hang),
        2 => any::<u32>().prop_map(Step::Succeed),
    ]
}

/// Arbitrary step sequences of length `1..=max_len`
pub fn steps(max_len: usize) -> impl Strategy<Value = Vec<Step<u32, TestError>>> {
    prop::collection::vec(step(), 1..=max_len)
}

/// Sequences made only of retryable failures (transient errors and hangs)
pub fn retryable_failures(max_len: usize) -> impl Strategy<Value = Vec<Step<u32, TestError>>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Step::Fail(TestError::Transient)),
            1 => Just(Step::Hang),
        ],
        1..=max_len,
    )
}

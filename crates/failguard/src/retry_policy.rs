//! Retry classification
//!
//! Decides which operation errors are transient. Timeouts, breaker
//! rejections and cancellation are classified by the orchestrator itself;
//! classifiers only ever see the operation's own error type.

use crate::fetch::FetchError;

/// Trait for classifying errors as retryable or not
pub trait RetryClassifier<E> {
    /// Check if the error is retryable
    fn is_retryable(&self, error: &E) -> bool;
}

impl<E, F> RetryClassifier<E> for F
where
    F: Fn(&E) -> bool,
{
    fn is_retryable(&self, error: &E) -> bool {
        self(error)
    }
}

/// Retries every operation error
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

impl<E> RetryClassifier<E> for RetryAll {
    fn is_retryable(&self, _error: &E) -> bool {
        true
    }
}

/// Treats every operation error as fatal
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryNone;

impl<E> RetryClassifier<E> for RetryNone {
    fn is_retryable(&self, _error: &E) -> bool {
        false
    }
}

/// Transport and timeout failures of a [`DataSource`](crate::DataSource)
/// are transient; anything else is an unexpected fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportClassifier;

impl RetryClassifier<FetchError> for TransportClassifier {
    fn is_retryable(&self, error: &FetchError) -> bool {
        matches!(error, FetchError::Transport(_) | FetchError::Timeout(_))
    }
}

/// Message-based classifier for error types that carry no structure
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageClassifier;

impl MessageClassifier {
    /// Check a rendered error message against common transient patterns
    pub fn is_message_retryable(message: &str) -> bool {
        let msg = message.to_lowercase();

        // Network/connection errors
        if msg.contains("connection")
            || msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("network")
            || msg.contains("dns")
        {
            return true;
        }

        // Server-side and throttling errors
        if msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
            || msg.contains("429")
            || msg.contains("service unavailable")
            || msg.contains("too many requests")
        {
            return true;
        }

        msg.contains("temporary") || msg.contains("try again")
    }
}

impl<E: std::fmt::Display> RetryClassifier<E> for MessageClassifier {
    fn is_retryable(&self, error: &E) -> bool {
        Self::is_message_retryable(&error.to_string())
    }
}

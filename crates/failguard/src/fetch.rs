//! Fetch-then-decode pipeline
//!
//! Wires a [`DataSource`] through a [`RetryOrchestrator`] and decodes the
//! payload afterwards. Transport failures and timeouts are retried; a payload
//! that fails to decode is an unexpected fault and resolves straight to the
//! fallback.

use crate::retry::{Attempt, FallbackReason, Outcome, RetryOrchestrator};
use crate::retry_policy::{RetryClassifier, TransportClassifier};
use crate::timeout::Deadline;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`DataSource`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection, protocol or status failure
    #[error("transport error: {0}")]
    Transport(String),
    /// The source gave up waiting on its own deadline
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    /// Anything else
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Payload could not be turned into a structured value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decode error: {0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

/// Remote or local source of raw payloads
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Raw payload type
    type Payload: Send;

    /// Fetch `identifier`, giving up once `deadline` passes
    async fn fetch(&self, identifier: &str, deadline: Deadline)
        -> Result<Self::Payload, FetchError>;
}

/// Turns raw payloads into structured values
pub trait Decoder<P> {
    /// Structured output
    type Output;

    /// Decode one payload
    fn decode(&self, raw: &P) -> Result<Self::Output, DecodeError>;
}

/// Decodes JSON byte payloads with `serde_json`
#[derive(Debug)]
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// Decoder for `T`
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder<Vec<u8>> for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, raw: &Vec<u8>) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

impl<T: DeserializeOwned> Decoder<String> for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, raw: &String) -> Result<T, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// The degraded document returned when a fetch cannot be completed:
/// `{"status": "degraded", "data": []}`
pub fn degraded() -> serde_json::Value {
    serde_json::json!({ "status": "degraded", "data": [] })
}

/// Errors seen by the orchestrator while fetching and decoding
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Decode failed
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Fetch failures are classified by the inner classifier; decode failures are
/// never retried.
///
/// Decoding runs inside each attempt, so a malformed payload ends execution
/// at once instead of being fetched again. Supply a different
/// [`RetryClassifier<PipelineError>`] to [`FetchPipeline::fetch_with`] to
/// retry bad payloads as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineClassifier<C = TransportClassifier>(pub C);

impl<C: RetryClassifier<FetchError>> RetryClassifier<PipelineError> for PipelineClassifier<C> {
    fn is_retryable(&self, error: &PipelineError) -> bool {
        match error {
            PipelineError::Fetch(e) => self.0.is_retryable(e),
            PipelineError::Decode(_) => false,
        }
    }
}

/// Source, decoder and orchestrator bundled together
#[derive(Debug)]
pub struct FetchPipeline<S, D, T> {
    orchestrator: RetryOrchestrator<T>,
    source: S,
    decoder: D,
}

impl<S, D, T> FetchPipeline<S, D, T>
where
    S: DataSource,
    D: Decoder<S::Payload, Output = T>,
    T: Clone,
{
    /// Bundle the parts
    pub fn new(orchestrator: RetryOrchestrator<T>, source: S, decoder: D) -> Self {
        Self {
            orchestrator,
            source,
            decoder,
        }
    }

    /// The data source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and decode `identifier`, falling back on failure
    pub async fn fetch(&self, identifier: &str) -> T {
        self.fetch_outcome(identifier).await.into_value()
    }

    /// Like [`fetch`](Self::fetch), reporting how the value was obtained
    pub async fn fetch_outcome(&self, identifier: &str) -> Outcome<T> {
        self.fetch_with(identifier, PipelineClassifier(TransportClassifier))
            .await
    }

    /// Fetch and decode with a caller-chosen classifier
    pub async fn fetch_with<C>(&self, identifier: &str, classifier: C) -> Outcome<T>
    where
        C: RetryClassifier<PipelineError>,
    {
        let outcome = self
            .orchestrator
            .execute_outcome(
                |attempt: Attempt| async move {
                    let raw = self.source.fetch(identifier, attempt.deadline).await?;
                    let value = self.decoder.decode(&raw)?;
                    Ok::<_, PipelineError>(value)
                },
                classifier,
            )
            .await;

        if let Outcome::Fallback {
            reason: FallbackReason::Exhausted { attempts },
            ..
        } = &outcome
        {
            tracing::error!(
                identifier,
                attempts,
                "All retries exhausted, falling back to safe mode"
            );
        }
        outcome
    }
}

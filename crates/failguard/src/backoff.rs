//! Exponential backoff between retry attempts
//!
//! `delay(k) = unit * multiplier^k`, saturating on overflow, optionally capped
//! and optionally jittered. With the defaults the delay preceding attempt
//! `k + 1` is exactly `2^k` seconds.

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// One time unit; `delay(k)` is `multiplier^k` of these
    pub unit: Duration,
    /// Growth base (2 for classic doubling)
    pub multiplier: u32,
    /// Optional ceiling for a single delay
    pub max_delay: Option<Duration>,
    /// Jitter factor (0.0 to 1.0) applied symmetrically around the delay
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            multiplier: 2,
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Create a new backoff config
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base time unit
    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Set the growth base
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Cap every delay at `max`
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Millisecond-scale backoff for local dependencies
    pub fn fast() -> Self {
        Self {
            unit: Duration::from_millis(50),
            multiplier: 2,
            max_delay: Some(Duration::from_secs(2)),
            jitter: 0.1,
        }
    }

    /// Check the invariants `BackoffPolicy` relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier == 0 {
            return Err(ConfigError::InvalidMultiplier(self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }
        if let Some(max) = self.max_delay {
            if max < self.unit {
                return Err(ConfigError::MaxDelayBelowUnit {
                    max,
                    unit: self.unit,
                });
            }
        }
        Ok(())
    }
}

/// Validated backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    /// Build a policy from a config, rejecting invalid parameters
    pub fn new(config: BackoffConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this policy was built from
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Deterministic delay for `attempt`, before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let uncapped = self
            .config
            .multiplier
            .checked_pow(attempt)
            .and_then(|factor| self.config.unit.checked_mul(factor))
            .unwrap_or(Duration::MAX);

        match self.config.max_delay {
            Some(max) => uncapped.min(max),
            None => uncapped,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.config.jitter <= 0.0 || base.is_zero() || base == Duration::MAX {
            return base;
        }

        let mut rng = rand::thread_rng();
        let jitter_range = base.as_secs_f64() * self.config.jitter;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);
        let jittered = Duration::try_from_secs_f64((base.as_secs_f64() + jitter).max(0.0))
            .unwrap_or(Duration::MAX);

        match self.config.max_delay {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }

    /// Un-jittered delays preceding attempts `2..=max_retries`
    pub fn schedule(&self, max_retries: u32) -> Vec<Duration> {
        (1..max_retries).map(|k| self.base_delay(k)).collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            config: BackoffConfig::default(),
        }
    }
}

//! Reconnect backoff configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// How the delay between reconnect attempts evolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Always wait `initial`
    Fixed,
    /// Start at `initial`, multiply by `multiplier` up to `max`
    Exponential,
}

/// Backoff configuration for reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay growth policy
    pub policy: BackoffPolicy,

    /// Initial delay (the constant delay for `fixed`)
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Give up after this many failed attempts (unbounded when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl BackoffConfig {
    /// A constant delay with no jitter
    pub fn fixed(delay: Duration) -> Self {
        Self {
            policy: BackoffPolicy::Fixed,
            initial: delay,
            max: delay,
            multiplier: 1.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Exponential growth from `initial` up to `max`
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            initial,
            max,
            multiplier,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Bound the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Check the bounds are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.is_zero() {
            return Err(ConfigError::Invalid(
                "reconnect_backoff.initial must be greater than zero".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(ConfigError::Invalid(format!(
                "reconnect_backoff.max ({:?}) is smaller than initial ({:?})",
                self.max, self.initial
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "reconnect_backoff.multiplier must be a finite value of at least 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(format!(
                "reconnect_backoff.jitter must be within 0.0..=1.0, got {}",
                self.jitter
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "reconnect_backoff.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: None,
        }
    }
}

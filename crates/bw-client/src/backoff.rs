//! Delay schedule for reconnect attempts

use std::time::Duration;

use bw_core::config::{BackoffConfig, BackoffPolicy};

/// Fixed or exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    /// Current delay
    current: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl Backoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            policy: config.policy,
            current: config.initial,
            max: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Constant delay without jitter
    pub fn fixed(delay: Duration) -> Self {
        Self::from_config(&BackoffConfig::fixed(delay))
    }

    /// Create an exponential backoff with custom parameters
    pub fn exponential(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self::from_config(&BackoffConfig::exponential(initial, max, multiplier).with_jitter(jitter))
    }

    /// Get the next delay and advance the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        if self.policy == BackoffPolicy::Exponential {
            // Overflowing products saturate at the maximum
            let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
                .unwrap_or(self.max);
            self.current = std::cmp::min(next, self.max);
        }

        // Add jitter
        if self.jitter > 0.0 {
            let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
            delay.saturating_add(Duration::try_from_secs_f64(jitter_amount).unwrap_or_default())
        } else {
            delay
        }
    }
}

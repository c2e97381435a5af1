//! Retry policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::EnrollError;

pub const MIN_ATTEMPTS: u32 = 1;
pub const MAX_ATTEMPTS: u32 = 10;
pub const MIN_INITIAL_DELAY_MS: u64 = 100;
pub const MAX_INITIAL_DELAY_MS: u64 = 60_000;
pub const MIN_BACKOFF_MULTIPLIER: f64 = 1.0;
pub const MAX_BACKOFF_MULTIPLIER: f64 = 5.0;

/// Bounded retry with exponential backoff. Immutable for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of invocations allowed, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Growth factor applied to each subsequent delay
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Optional ceiling on a single delay. Unset means unbounded growth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Result<Self, EnrollError> {
        let policy = Self {
            max_attempts,
            initial_delay_ms,
            backoff_multiplier,
            max_delay_ms: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Cap every delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(max_delay.as_millis() as u64);
        self
    }

    /// Check the configured ranges
    pub fn validate(&self) -> Result<(), EnrollError> {
        if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(EnrollError::ConfigError(format!(
                "retry.max_attempts must be within [{}, {}], got {}",
                MIN_ATTEMPTS, MAX_ATTEMPTS, self.max_attempts
            )));
        }
        if !(MIN_INITIAL_DELAY_MS..=MAX_INITIAL_DELAY_MS).contains(&self.initial_delay_ms) {
            return Err(EnrollError::ConfigError(format!(
                "retry.initial_delay_ms must be within [{}, {}], got {}",
                MIN_INITIAL_DELAY_MS, MAX_INITIAL_DELAY_MS, self.initial_delay_ms
            )));
        }
        if !(MIN_BACKOFF_MULTIPLIER..=MAX_BACKOFF_MULTIPLIER).contains(&self.backoff_multiplier) {
            return Err(EnrollError::ConfigError(format!(
                "retry.backoff_multiplier must be within [{}, {}], got {}",
                MIN_BACKOFF_MULTIPLIER, MAX_BACKOFF_MULTIPLIER, self.backoff_multiplier
            )));
        }
        if let Some(cap) = self.max_delay_ms {
            if cap < self.initial_delay_ms {
                return Err(EnrollError::ConfigError(format!(
                    "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                    cap, self.initial_delay_ms
                )));
            }
        }
        Ok(())
    }

    /// Delay slept before the given 1-based attempt.
    ///
    /// Attempt 1 has no pre-delay. Attempt `n > 1` waits
    /// `initial_delay_ms * backoff_multiplier^(n - 2)`, truncated to whole
    /// milliseconds.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let mut delay_ms = if delay_ms.is_finite() && delay_ms < u64::MAX as f64 {
            delay_ms as u64
        } else {
            u64::MAX
        };
        if let Some(cap) = self.max_delay_ms {
            delay_ms = delay_ms.min(cap);
        }
        Duration::from_millis(delay_ms)
    }

    /// All delays slept when every attempt fails
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (2..=self.max_attempts).map(|attempt| self.delay_before_attempt(attempt))
    }
}

//! Backoff policy for failed reconciles
//!
//! A failed reconcile is requeued with exponential backoff instead of
//! spinning hot. Because the runner serializes passes per object, there is
//! no thundering herd to break up and the delays stay deterministic.

use std::time::Duration;

/// Configuration for reconcile retries
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up (0 = never give up)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the backoff
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// The delay before the given (1-based) retry attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let delay = self.initial_delay.mul_f64(factor.max(1.0));
        delay.min(self.max_delay)
    }

    /// True if the given (1-based) attempt count uses up max_attempts
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

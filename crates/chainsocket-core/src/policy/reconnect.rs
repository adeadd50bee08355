//! Exponential reconnect backoff with an attempt budget.

use std::time::Duration;

/// Configuration for the reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub base_interval: Duration,
    /// Multiplier applied to the delay on each further attempt.
    pub decay: f64,
    /// Maximum delay (caps exponential growth).
    pub max_interval: Duration,
    /// Maximum number of attempts; `0` means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(1_000),
            decay: 1.5,
            max_interval: Duration::from_millis(30_000),
            max_attempts: 0,
        }
    }
}

/// Stateless reconnect policy. The attempt counter lives with the caller.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Delay before the reconnect attempt numbered `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.config.base_interval.as_millis() as f64;
        let cap_ms = self.config.max_interval.as_millis() as f64;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = base_ms * self.config.decay.powi(exp);
        // powi overflows to inf (or NaN for a zero base); min() keeps the cap.
        let capped = if raw_ms.is_nan() { cap_ms } else { raw_ms.min(cap_ms) };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Returns `true` if another attempt is allowed after `attempt` attempts.
    pub fn should_attempt(&self, attempt: u32) -> bool {
        self.config.max_attempts == 0 || attempt <= self.config.max_attempts
    }
}

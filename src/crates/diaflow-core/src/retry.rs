//! Retry policies with exponential backoff and jitter
//!
//! Transient node failures (timeouts, rate limits, 5xx) are retried by
//! the engine according to a [`RetryPolicy`]. Delays grow exponentially,
//! are capped, and get a random jitter factor so simultaneous failures
//! don't retry in lockstep.
//!
//! ```rust
//! use diaflow_core::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(5)
//!     .with_initial_interval(1.0)
//!     .with_backoff_factor(2.0)
//!     .with_max_interval(60.0)
//!     .with_jitter(false);
//!
//! assert_eq!(policy.calculate_delay(2).as_secs_f64(), 4.0);
//! assert!(!policy.should_retry(5));
//! ```

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed node executions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,
    /// Initial interval between retries in seconds
    pub initial_interval: f64,
    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,
    /// Maximum interval between retries in seconds
    pub max_interval: f64,
    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Disable retries entirely (single attempt).
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given 0-indexed attempt.
    ///
    /// `initial_interval * backoff_factor^attempt`, capped at
    /// `max_interval`, with a 0.5x-1.5x jitter factor when enabled.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }
        let base = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);
        let final_delay = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Tracks attempts and the last error across a retry loop.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_max_interval(100.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(0).as_secs_f64(), 1.0);
        assert_eq!(policy.calculate_delay(1).as_secs_f64(), 2.0);
        assert_eq!(policy.calculate_delay(2).as_secs_f64(), 4.0);
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::new(10)
            .with_initial_interval(10.0)
            .with_max_interval(50.0)
            .with_jitter(false);
        assert_eq!(policy.calculate_delay(5).as_secs_f64(), 50.0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5).with_initial_interval(1.0).with_jitter(true);
        let base = 4.0; // 1.0 * 2^2
        for _ in 0..20 {
            let delay = policy.calculate_delay(2).as_secs_f64();
            assert!((base * 0.5..=base * 1.5).contains(&delay));
        }
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_state_tracking() {
        let mut state = RetryState::new();
        state.record_attempt(Some("timeout".into()));
        state.record_attempt(Some("rate limit".into()));
        assert_eq!(state.attempts, 2);
        assert_eq!(state.last_error.as_deref(), Some("rate limit"));
        state.reset();
        assert_eq!(state.attempts, 0);
    }
}

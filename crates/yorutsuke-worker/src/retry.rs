//! Backoff schedule for retried batch writes.

use std::time::Duration;

/// Configuration for retrying the unprocessed part of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 means no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with doubling delays.
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            ..Self::default()
        }
    }

    /// Create a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate the delay before retry number `attempt` (zero-based).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff_millis =
            (self.initial_backoff.as_millis() as f64) * self.backoff_multiplier.powi(exponent);

        if !backoff_millis.is_finite() || backoff_millis >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }

        Duration::from_millis(backoff_millis as u64).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let config = RetryConfig::new(6, Duration::from_millis(100))
            .with_max_backoff(Duration::from_millis(1000));

        let delays: Vec<u128> = (0..6)
            .map(|attempt| config.calculate_backoff(attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn huge_attempts_stay_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.calculate_backoff(u32::MAX), config.max_backoff);
    }

    #[test]
    fn no_retry_has_zero_delay() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.calculate_backoff(0), Duration::ZERO);
    }
}

//! Exponential backoff with jitter for dispatch retries.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Retry schedule derived from `RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_ms: u64,
    max_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: if config.enabled { config.max_attempts.max(1) } else { 1 },
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
        }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }
}

/// Calculate exponential backoff delay with up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);

        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b2 = calculate_backoff(2, 100, 2000);
        assert!(b2.as_millis() >= 200);

        let capped = calculate_backoff(10, 100, 1000);
        assert!(capped.as_millis() >= 1000 && capped.as_millis() < 1100);
    }

    #[test]
    fn test_disabled_retries_allow_single_attempt() {
        let config = RetryConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts(), 1);
        assert_eq!(RetryPolicy::from_config(&RetryConfig::default()).max_attempts(), 3);
    }
}

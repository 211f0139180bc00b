//! Retry policy with capped exponential backoff
//!
//! The policy is a pure function of the attempt outcome and the number of
//! failures so far; the upload engine only executes the decision.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::TransportError;

/// What to do after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Succeed,
    /// Sleep for the delay, then try again
    Retry(Duration),
    FailFatal,
    FailExhausted,
}

/// Decide the next step after an attempt
///
/// `failures` counts failed attempts including this one.
pub fn decide<T>(
    config: &RetryConfig,
    outcome: &Result<T, TransportError>,
    failures: u32,
) -> Decision {
    match outcome {
        Ok(_) => Decision::Succeed,
        Err(e) if !e.should_retry() => Decision::FailFatal,
        Err(_) if failures > config.max_retries => Decision::FailExhausted,
        Err(_) => Decision::Retry(calculate_backoff(config, failures)),
    }
}

/// Delay before retry number `retry` (1-based)
///
/// Never decreases as `retry` grows and never exceeds `max_backoff_ms`.
pub fn calculate_backoff(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(63) as i32;
    let base_ms = config.initial_backoff_ms as f64 * config.multiplier.max(1.0).powi(exponent);
    let capped_ms = base_ms.min(config.max_backoff_ms as f64);
    Duration::from_millis(capped_ms as u64)
}

/// Retry configuration builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn multiplier(mut self, factor: f64) -> Self {
        self.config.multiplier = factor;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_calculate_backoff() {
        let config = config();
        assert_eq!(calculate_backoff(&config, 1), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&config, 2), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&config, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_cap_and_monotonic() {
        let config = config();
        let mut previous = Duration::ZERO;
        for retry in 1..100 {
            let delay = calculate_backoff(&config, retry);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(config.max_backoff_ms));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_backoff() {
        let config = RetryBuilder::new()
            .initial_backoff_ms(50)
            .max_backoff_ms(50)
            .multiplier(1.0)
            .build();
        assert_eq!(calculate_backoff(&config, 1), calculate_backoff(&config, 7));
    }

    #[test]
    fn test_decide() {
        let config = config();
        let ok: Result<(), TransportError> = Ok(());
        let transient: Result<(), TransportError> = Err(TransportError::transient("timeout"));
        let fatal: Result<(), TransportError> = Err(TransportError::fatal("bad request"));

        assert_eq!(decide(&config, &ok, 0), Decision::Succeed);
        assert_eq!(decide(&config, &fatal, 1), Decision::FailFatal);
        assert_eq!(
            decide(&config, &transient, 1),
            Decision::Retry(Duration::from_millis(100))
        );
        assert!(matches!(decide(&config, &transient, 5), Decision::Retry(_)));
        assert_eq!(decide(&config, &transient, 6), Decision::FailExhausted);
    }

    #[test]
    fn test_zero_retries() {
        let config = RetryBuilder::new().max_retries(0).build();
        let transient: Result<(), TransportError> = Err(TransportError::transient("timeout"));
        assert_eq!(decide(&config, &transient, 1), Decision::FailExhausted);
    }

    #[test]
    fn test_retry_builder() {
        let config = RetryBuilder::new()
            .max_retries(3)
            .initial_backoff_ms(200)
            .max_backoff_ms(20000)
            .multiplier(1.5)
            .build();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff_ms, 200);
        assert_eq!(config.max_backoff_ms, 20000);
        assert_eq!(config.multiplier, 1.5);
    }
}

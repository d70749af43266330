//! Retry with bounded attempts
//!
//! Cloud mutations are retried on a fixed interval and only when the error is
//! rate-limit class; anything else fails the item immediately. Delays go
//! through [`Clock`] so tests run them on virtual time.

use crate::clock::Clock;
use crate::error::{FailoverError, FailoverResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// base * multiplier^(attempt-1), capped at max
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl BackoffStrategy {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(duration) => *duration,
            BackoffStrategy::Exponential {
                base,
                max,
                multiplier,
            } => {
                let factor = multiplier.powf(attempt.saturating_sub(1) as f64);
                let delay = Duration::from_millis((base.as_millis() as f64 * factor) as u64);
                std::cmp::min(delay, *max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    pub is_retryable: fn(&FailoverError) -> bool,
    pub operation_name: Option<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            is_retryable: FailoverError::is_transient,
            operation_name: None,
        }
    }
}

impl RetryConfig {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            backoff: BackoffStrategy::Fixed(delay),
            ..Default::default()
        }
    }

    /// Fixed-interval policy used for every NIC and route mutation
    ///
    /// `max_retries` counts retries after the first attempt.
    pub fn for_cloud_mutations(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            backoff: BackoffStrategy::Fixed(interval),
            is_retryable: FailoverError::is_transient,
            operation_name: None,
        }
    }

    /// Short policy for best-effort device reads
    pub fn for_device_reads(attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            backoff: BackoffStrategy::Fixed(interval),
            is_retryable: |_| true,
            operation_name: None,
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Retry an async operation under the given policy
pub async fn retry<F, Fut, T>(
    clock: &dyn Clock,
    config: &RetryConfig,
    mut operation: F,
) -> FailoverResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FailoverResult<T>>,
{
    let name = config.operation_name.as_deref().unwrap_or("operation");
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if !(config.is_retryable)(&error) {
                    debug!("{} failed with non-retryable error: {}", name, error);
                    return Err(error);
                }
                if attempt >= config.max_attempts {
                    warn!("{} exhausted {} attempts: {}", name, config.max_attempts, error);
                    return Err(error);
                }

                let delay = config.backoff.delay(attempt);
                warn!(
                    "Retry attempt {}/{} for {} after error: {} (waiting {:?})",
                    attempt, config.max_attempts, name, error, delay
                );
                clock.sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> FailoverError {
        FailoverError::from_cloud_status("update_nic", 429, "Too Many Requests")
    }

    #[tokio::test]
    async fn test_successful_on_first_attempt() {
        let config = RetryConfig::fixed(3, Duration::from_millis(1));
        let clock = MockClock::default();
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry(&clock, &config, || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        })
        .await
        .unwrap();

        assert_eq!(result, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_rate_limit_until_success() {
        let config = RetryConfig::for_cloud_mutations(5, Duration::from_millis(1));
        let clock = MockClock::default();
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry(&clock, &config, || {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(rate_limited())
                } else {
                    Ok(count)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries_on_virtual_time() {
        let config = RetryConfig::for_cloud_mutations(2, Duration::from_secs(30));
        let clock = MockClock::default();
        let started = clock.now();
        let counter = Arc::new(AtomicU32::new(0));

        let result: FailoverResult<()> = retry(&clock, &config, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;

        assert!(matches!(result, Err(FailoverError::TransientCloud { .. })));
        // first attempt plus two retries, each retry waiting one interval
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(clock.now() - started, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let config = RetryConfig::for_cloud_mutations(5, Duration::from_millis(1));
        let clock = MockClock::default();
        let counter = Arc::new(AtomicU32::new(0));

        let result: FailoverResult<()> = retry(&clock, &config, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(FailoverError::from_cloud_status("update_nic", 400, "Bad Request")) }
        })
        .await;

        assert!(matches!(result, Err(FailoverError::CloudApi { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_millis(500));
    }
}

//! Bounded polling on an external condition
//!
//! Used for local lock acquisition and for waiting out another run's status.

use crate::clock::Clock;
use crate::error::FailoverResult;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    /// Give up after this many probes
    Attempts(u32),
    /// Give up once `since` is older than `max_age`
    MaxAge {
        since: DateTime<Utc>,
        max_age: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub limit: PollLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Exhausted { attempts: u32 },
}

/// Probe until it yields a value or the limit is reached
///
/// The probe runs at least once. Errors from the probe end the poll.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    config: PollConfig,
    mut probe: F,
) -> FailoverResult<PollOutcome<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FailoverResult<Option<T>>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        if let Some(value) = probe(attempt).await? {
            return Ok(PollOutcome::Ready(value));
        }

        let exhausted = match config.limit {
            PollLimit::Attempts(max) => attempt >= max,
            PollLimit::MaxAge { since, max_age } => {
                (clock.now() - since).to_std().unwrap_or(Duration::ZERO) >= max_age
            }
        };
        if exhausted {
            return Ok(PollOutcome::Exhausted { attempts: attempt });
        }

        trace!(attempt, interval = ?config.interval, "condition not met, polling again");
        clock.sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    #[tokio::test]
    async fn test_ready_after_some_attempts() {
        let clock = MockClock::default();
        let config = PollConfig {
            interval: Duration::from_secs(1),
            limit: PollLimit::Attempts(5),
        };
        let outcome = poll_until(&clock, config, |attempt| async move {
            Ok((attempt == 3).then_some(attempt))
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Ready(3));
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let clock = MockClock::default();
        let config = PollConfig {
            interval: Duration::from_secs(1),
            limit: PollLimit::Attempts(4),
        };
        let outcome: PollOutcome<()> = poll_until(&clock, config, |_| async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 4 });
    }

    #[tokio::test]
    async fn test_age_limit_uses_clock() {
        let clock = MockClock::default();
        let since = clock.now();
        let config = PollConfig {
            interval: Duration::from_secs(10),
            limit: PollLimit::MaxAge {
                since,
                max_age: Duration::from_secs(60),
            },
        };
        let outcome: PollOutcome<()> = poll_until(&clock, config, |_| async { Ok(None) })
            .await
            .unwrap();
        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 7 });
        assert!(clock.now() - since >= chrono::Duration::seconds(60));
    }
}

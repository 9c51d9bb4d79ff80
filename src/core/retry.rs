use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{Backoff, TransferConfig};

/// Upper bound for exponential backoff.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            backoff: config.backoff,
            ..Self::new(config.max_retries, config.retry_delay())
        }
    }

    /// Delay to wait after the failed attempt number `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let exponent = failed_attempt.saturating_sub(1).min(16);
                self.delay.saturating_mul(1 << exponent).min(MAX_DELAY)
            }
        }
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Sleep before the next attempt. Returns `false` if `cancel` fired first.
    pub async fn wait(&self, failed_attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay_after(failed_attempt);
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            backoff: Backoff::Exponential,
            ..RetryPolicy::new(10, Duration::from_secs(5))
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
        assert_eq!(policy.delay_after(9), MAX_DELAY);
    }

    #[test]
    fn test_zero_attempts_becomes_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.has_attempts_left(0));
        assert!(!policy.has_attempts_left(1));
    }

    #[tokio::test]
    async fn test_wait_interrupted_by_cancel() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!policy.wait(1, &cancel).await);
    }

    #[tokio::test]
    async fn test_wait_completes() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();

        assert!(policy.wait(1, &cancel).await);
    }
}

//! Reconnect backoff
//!
//! Delays double from `base` on every failed attempt. Sleeping goes through a
//! [`Sleeper`] so tests can record the sequence instead of waiting it out.

use futures_util::future::BoxFuture;
use std::time::Duration;

/// Exponential backoff over a fixed number of total attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay after the 0-based `attempt` failed: `base * 2^attempt`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Delays slept between attempts; one fewer than `max_attempts`
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|attempt| self.delay(attempt))
    }
}

/// Source of backoff sleeps
pub trait Sleeper: Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_delays_double() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), 4);
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
        );
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        assert_eq!(BackoffPolicy::new(Duration::from_secs(1), 1).delays().count(), 0);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 100);
        assert!(policy.delay(64) >= policy.delay(31));
    }
}

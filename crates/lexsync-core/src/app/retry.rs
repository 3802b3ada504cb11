//! Retry policy: decides backoff delays and attempt budgets.

use std::time::Duration;

/// Exponential backoff with an optional ceiling.
///
/// Used by the resource loader (between fetch attempts) and by the change
/// channel (between reconnects).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,

    /// Attempt budget. For the loader this counts fetch attempts, for the
    /// channel it counts consecutive failed reconnects.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Loader policy: 3 attempts, 1s then 2s between them.
    pub fn loader_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
            max_attempts: 3,
        }
    }

    /// Reconnect policy: `min(1000 * 2^attempts, 30000)` ms, 5 attempts.
    pub fn reconnect_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(30)),
            max_attempts: 5,
        }
    }

    /// Delay to wait after the `attempts`-th failure (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    ///
    /// Example with base_delay=1s, multiplier=2.0:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = if delay_secs.is_finite() {
            Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

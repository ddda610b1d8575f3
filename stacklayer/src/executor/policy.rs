//! Scheduling priority and retry policy.

use std::fmt;
use std::time::Duration;

/// Task scheduling priority. Higher values are dispatched first; tasks of
/// equal priority run in submission order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Priority(pub i32);

impl Priority {
    /// Operations requested through the API.
    pub const USER: Priority = Priority(PRIORITY_USER);

    /// Work started by periodic jobs (schedules, expiry).
    pub const BACKGROUND: Priority = Priority(PRIORITY_BACKGROUND);
}

pub const PRIORITY_USER: i32 = 100;
pub const PRIORITY_BACKGROUND: i32 = 0;

impl Default for Priority {
    fn default() -> Self {
        Self::USER
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::USER => write!(f, "USER"),
            Self::BACKGROUND => write!(f, "BACKGROUND"),
            Priority(p) => write!(f, "{}", p),
        }
    }
}

/// How often and how far apart a task may ask to be retried.
///
/// A task returning `TaskResult::Retry` is re-queued after `delay` until it
/// has been retried `max_retries` times; the next retry request fails it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Retry requests fail the task immediately.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Returns true if a task on its `attempt`-th run (1-based) may retry.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_outranks_background() {
        assert!(Priority::USER > Priority::BACKGROUND);
        assert_eq!(Priority::default(), Priority::USER);
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(Priority::USER.to_string(), "USER");
        assert_eq!(Priority(7).to_string(), "7");
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
        assert!(!RetryPolicy::none().allows_retry(1));
    }
}

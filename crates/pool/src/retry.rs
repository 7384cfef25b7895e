//! Fixed-delay retry policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_millis;

/// Bounded attempts separated by a constant delay
///
/// Shared by storage writes and embedding calls, which both retry a few
/// times a few milliseconds apart.
///
/// # Example
///
/// ```
/// use vecflow_pool::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::fixed(Duration::from_millis(5), 10);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(5));
/// assert!(!policy.has_attempts_remaining(10));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Pause before every attempt after the first
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(5), 10)
    }
}

impl RetryPolicy {
    /// `max_attempts` attempts `delay` apart (at least one attempt)
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delay to wait before `attempt` (1-based); the first attempt never waits
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Whether another attempt may follow `current_attempt`
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

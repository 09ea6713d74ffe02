//! Retry policy with exponential backoff.

use rand::Rng;
use std::time::Duration;

/// Upper bound on configurable attempts (large paginated calls).
pub const MAX_ATTEMPTS_LIMIT: u32 = 8;

/// Backoff schedule for transient upstream failures.
///
/// ## Default Values
/// - Initial delay: 2 seconds, doubling per attempt
/// - Maximum delay: 30 seconds
/// - Attempts: 3
/// - Jitter: up to 500 ms
///
/// ```rust
/// use slotwatch_feeds::RetryPolicy;
///
/// let policy = RetryPolicy::default().without_jitter();
/// assert_eq!(policy.calculate_delay(1), 2_000);
/// assert_eq!(policy.calculate_delay(2), 4_000);
/// assert_eq!(policy.calculate_delay(5), 30_000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    max_jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT),
            max_jitter_ms: 500,
        }
    }

    /// Same schedule with a different attempt budget (clamped to 1..=8).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT);
        self
    }

    /// Disable jitter (useful for testing).
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter_ms = 0;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay in milliseconds after failed attempt number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let backoff_power = attempt.saturating_sub(1).min(16);
        let exponential = self.initial_delay_ms.saturating_mul(1 << backoff_power);
        let capped = exponential.min(self.max_delay_ms);

        if self.max_jitter_ms > 0 {
            capped + rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        } else {
            capped
        }
    }

    pub fn calculate_delay_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.calculate_delay(attempt))
    }

    /// Whether another attempt follows failed attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2_000, 30_000, 3)
    }
}

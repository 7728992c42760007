/// file: src/retry.rs
/// description: Bounded exponential backoff policy for the reconnect loop
use std::time::Duration;

// Guards the shift in the delay computation; with any realistic attempt cap
// the exponent never gets anywhere near this.
const MAX_EXPONENT: u32 = 16;

/// Bounded exponential backoff. The Nth retry waits `base_delay * 2^(N-1)`;
/// once `max_attempts` retries have been consumed a further failure is
/// terminal. `max_attempts == 0` means no automatic retries at all.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            attempt: 0,
        }
    }

    /// Returns the delay before the next reconnect attempt and consumes one
    /// attempt, or `None` when the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay * 2u32.pow((self.attempt - 1).min(MAX_EXPONENT)))
    }

    /// Resets the attempt counter. Called on every successful connect and on
    /// every explicit `connect()`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let mut policy = RetryPolicy::new(3, Duration::from_millis(1000));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn zero_max_attempts_is_immediately_exhausted() {
        let mut policy = RetryPolicy::new(0, Duration::from_millis(500));
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_restores_the_full_budget() {
        let mut policy = RetryPolicy::new(2, Duration::from_millis(100));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }
}

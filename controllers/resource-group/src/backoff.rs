//! # Fibonacci Backoff
//!
//! Retry delays for resolving a watched kind through API discovery.
//! A kind referenced by a ResourceGroup may not be served yet (its CRD is
//! applied later), so the watch task keeps retrying with a delay that grows
//! along the Fibonacci sequence: 1s, 1s, 2s, 3s, 5s, 8s, ... up to the cap.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff in seconds
    prev_secs: u64,
    /// Current backoff in seconds
    current_secs: u64,
    /// Maximum backoff in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds in seconds
    ///
    /// `min_secs` is clamped to at least 1 and `max_secs` to at least `min_secs`.
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        let min_secs = min_secs.max(1);
        Self {
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;

        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);

        Duration::from_secs(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 60);

        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 2);
        assert_eq!(secs(&mut backoff), 3);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 8);
        assert_eq!(secs(&mut backoff), 13);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        for expected in [1, 1, 2, 3, 5, 8, 10] {
            assert_eq!(secs(&mut backoff), expected);
        }
        // Next would be 18 (8+10), but should be capped at 10
        assert_eq!(secs(&mut backoff), 10);
        // Should stay at max
        assert_eq!(secs(&mut backoff), 10);
    }

    #[test]
    fn test_fibonacci_backoff_larger_minimum() {
        let mut backoff = FibonacciBackoff::new(2, 20);
        for expected in [2, 2, 4, 6, 10, 16, 20, 20] {
            assert_eq!(secs(&mut backoff), expected);
        }
    }

    #[test]
    fn test_fibonacci_backoff_clamps_bounds() {
        // Zero minimum would never back off
        let mut backoff = FibonacciBackoff::new(0, 0);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
    }
}

//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff curve: `base * 2^(attempt - 1)`, capped at `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a backoff curve from a base delay and a cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base) }
    }

    /// Build a curve from millisecond values as they appear in config.
    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before the given attempt, without jitter.
    ///
    /// Attempt 0 means "first try" and never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay before the given attempt with up to 10% jitter added, never past the cap.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        let jitter_range = delay.as_millis() as u64 / 10;
        if jitter_range == 0 {
            return delay;
        }

        let jitter = rand::thread_rng().gen_range(0..jitter_range);
        (delay + Duration::from_millis(jitter)).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let backoff = Backoff::from_millis(1_000, 30_000);

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(5), Duration::from_secs(16));
        assert_eq!(backoff.delay(6), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let backoff = Backoff::from_millis(100, 2_000);
        for attempt in 1..8 {
            let plain = backoff.delay(attempt);
            let jittered = backoff.delay_with_jitter(attempt);
            assert!(jittered >= plain);
            assert!(jittered <= plain + plain / 10);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let backoff = Backoff::from_millis(1_000, 30_000);
        for _ in 0..200 {
            assert!(backoff.delay_with_jitter(10) <= Duration::from_secs(30));
        }
        // Below the cap jitter still applies.
        let early = backoff.delay_with_jitter(3);
        assert!(early >= Duration::from_secs(4) && early <= Duration::from_millis(4_400));
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let backoff = Backoff::from_millis(500, 100);
        assert_eq!(backoff.cap(), Duration::from_millis(500));
    }
}

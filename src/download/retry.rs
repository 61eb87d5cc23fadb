//! Retry policy for transient fetch failures.
//!
//! Per-job attempts are bounded by `--tries`; the delay between attempts is
//! either the fixed `--waitretry` value or exponential backoff with jitter.
//! (Per-host backoff is separate and lives in the host registry.)

use std::time::Duration;

use rand::Rng;

use super::error::FetchError;

/// Base delay for the first retry.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Backoff cap.
const MAX_DELAY: Duration = Duration::from_secs(32);
/// Upper bound on added jitter.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    Retry { delay: Duration, attempt: u32 },
    /// Give up.
    GiveUp,
}

/// Per-job retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first (`--tries`).
    tries: u32,
    /// Fixed retry delay overriding the exponential schedule (`--waitretry`).
    waitretry: Option<Duration>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(tries: u32, waitretry: Option<Duration>) -> Self {
        Self {
            tries: tries.max(1),
            waitretry,
        }
    }

    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Decides whether the attempt that just failed (`attempt`, 1-indexed)
    /// warrants another try.
    #[must_use]
    pub fn decide(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        if !error.is_transient() || attempt >= self.tries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if let Some(fixed) = self.waitretry {
            return fixed;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = BASE_DELAY.saturating_mul(1u32 << exponent).min(MAX_DELAY);
        backoff + jitter()
    }
}

fn jitter() -> Duration {
    let ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> FetchError {
        FetchError::Timeout {
            url: "http://a.test/x".into(),
        }
    }

    fn permanent() -> FetchError {
        FetchError::RemoteMissing {
            url: "http://a.test/x".into(),
        }
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = RetryPolicy::new(5, None);
        assert_eq!(policy.decide(&permanent(), 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_transient_errors_retry_until_tries() {
        let policy = RetryPolicy::new(3, None);
        assert!(matches!(
            policy.decide(&transient(), 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.decide(&transient(), 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert_eq!(policy.decide(&transient(), 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_tries_floor_is_one() {
        let policy = RetryPolicy::new(0, None);
        assert_eq!(policy.tries(), 1);
        assert_eq!(policy.decide(&transient(), 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_waitretry_overrides_backoff() {
        let policy = RetryPolicy::new(5, Some(Duration::from_secs(7)));
        match policy.decide(&transient(), 3) {
            RetryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(7)),
            RetryDecision::GiveUp => panic!("expected retry"),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(100, None);
        let d1 = policy.delay_for(1);
        let d3 = policy.delay_for(3);
        assert!(d1 >= Duration::from_secs(1));
        assert!(d1 <= Duration::from_millis(1500));
        assert!(d3 >= Duration::from_secs(4));
        let d20 = policy.delay_for(20);
        assert!(d20 <= MAX_DELAY + MAX_JITTER);
    }

    #[test]
    fn test_5xx_is_retried_404_is_not() {
        let policy = RetryPolicy::new(3, None);
        let server_err = FetchError::HttpStatus {
            url: "u".into(),
            status: 503,
        };
        assert!(matches!(
            policy.decide(&server_err, 1),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(&permanent(), 1), RetryDecision::GiveUp);
    }
}

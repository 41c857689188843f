//! Retry with exponential backoff and jitter

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;

/// Bounded retry schedule handed to every component that retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomize each delay into `[backoff / 2, backoff]`.
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Retry without sleeping (tests, in-memory backends).
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Upstream API defaults: 5 attempts, 1s doubling to 30s.
    pub const fn http() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Store transaction defaults: 3 attempts, 1s doubling.
    pub const fn store() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(8))
    }

    /// Deterministic backoff before retry number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(2u32.pow(exp))
            .min(self.max_delay)
    }

    /// Backoff with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        backoff.mul_f64(rand::rng().random_range(0.5..=1.0))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, fails with an error `is_transient` rejects,
    /// or the attempt budget runs out. Returns the last error on failure.
    pub fn run<T, E: Display>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let max = self.attempts();
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max && is_transient(&e) => {
                    let delay = self.delay(attempt);
                    log::debug!("{label}: attempt {attempt}/{max} failed: {e}, retrying in {delay:?}");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        log::warn!("{label}: giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::http()
    }
}

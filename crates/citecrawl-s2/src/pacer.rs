//! Self-imposed request pacing shared by all workers of a process

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hands out send slots at most once per `interval`.
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so concurrent workers queue up behind each other instead of bursting.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// `None` or a non-positive rate disables pacing.
    pub fn per_second(rate: Option<f64>) -> Self {
        match rate {
            Some(r) if r > 0.0 && r.is_finite() => Self::new(Duration::from_secs_f64(1.0 / r)),
            _ => Self::unlimited(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until this caller's slot arrives.
    pub fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let wait = {
            let mut next = match self.next_slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot - now
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

//! Jittered exponential backoff for reconnect delays.
//!
//! Produces `delay_n = min(M, i * b^n)`, jittered uniformly into `[0,
//! delay_n]`, for base `b`, initial increment `i`, and maximum `M`. This is
//! the sequence a supervisor advances through on every failed connection
//! attempt and resets on every success.

use rand::Rng;
use std::time::Duration;

/// Base of the exponential sequence.
const BASE: f64 = 1.85;
/// Seconds added to the exponent before the first growth; also the upper
/// bound of the first (post-reset) delay.
const INITIAL_INCREMENT: f64 = 2.0;
/// Maximum delay, in seconds, the sequence ever produces.
const MAXIMUM: f64 = 600.0;

/// A monotonically growing, capped, jittered delay sequence.
///
/// Single-producer: nothing inside `Backoff` is synchronized, matching its
/// use from a single supervisor task.
#[derive(Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Create a fresh sequence at its initial state.
    #[must_use]
    pub const fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Compute the unjittered ceiling for the current attempt, without
    /// advancing it.
    fn ceiling(&self) -> f64 {
        let exp = BASE.powi(self.attempt as i32);
        (INITIAL_INCREMENT * exp).min(MAXIMUM)
    }

    /// Return the next delay in the sequence and advance the attempt
    /// counter.
    ///
    /// The returned delay is uniformly distributed in `[0, ceiling]` where
    /// `ceiling` grows with each call until it saturates at [`MAXIMUM`]
    /// seconds.
    pub fn next(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let jittered = if ceiling <= 0.0 {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..=ceiling)
        };

        Duration::from_secs_f64(jittered)
    }

    /// Return the sequence to its initial state; the next [`next`](Self::next)
    /// call returns a value in `[0, i]`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Backoff: Send, Sync);

    #[test]
    fn first_delay_after_reset_is_bounded_by_initial_increment() {
        let mut b = Backoff::new();
        for _ in 0..200 {
            b.reset();
            let delay = b.next();
            assert!(delay <= Duration::from_secs_f64(INITIAL_INCREMENT));
        }
    }

    #[test]
    fn ceiling_grows_with_attempt() {
        let mut b = Backoff::new();
        let mut last_ceiling = b.ceiling();
        for _ in 0..10 {
            let _ = b.next();
            let ceiling = b.ceiling();
            assert!(ceiling >= last_ceiling);
            last_ceiling = ceiling;
        }
    }

    #[test]
    fn delay_is_capped_at_maximum() {
        let mut b = Backoff::new();
        b.attempt = 1_000;
        for _ in 0..50 {
            let delay = b.next();
            assert!(delay <= Duration::from_secs_f64(MAXIMUM));
        }
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut b = Backoff::new();
        for _ in 0..5 {
            let _ = b.next();
        }
        assert_eq!(b.attempt, 5);
        b.reset();
        assert_eq!(b.attempt, 0);
    }

    #[test]
    fn attempt_counter_saturates_instead_of_overflowing() {
        let mut b = Backoff::new();
        b.attempt = u32::MAX;
        let delay = b.next();
        assert!(delay <= Duration::from_secs_f64(MAXIMUM));
        assert_eq!(b.attempt, u32::MAX);
    }

    #[test]
    fn delay_never_exceeds_its_ceiling() {
        let mut b = Backoff::new();
        for attempt in 0..30 {
            b.attempt = attempt;
            let ceiling = b.ceiling();
            let delay = b.next();
            assert!(delay.as_secs_f64() <= ceiling + f64::EPSILON);
        }
    }
}

//! Outgoing frame rate limiter.
//!
//! Discord permits at most 120 gateway commands in any rolling 60 second
//! window. [`SendLimiter`] wraps a leaky bucket configured to approximate
//! that flat windowed-burst contract: `acquire()` suspends the caller until
//! a slot frees up, first-come-first-served. It carries no other observable
//! state — no reserved sub-allowance for heartbeats or any other frame
//! kind, just the one bucket every outbound write funnels through.

use leaky_bucket_lite::LeakyBucket;
use std::time::Duration;

/// Maximum number of commands allowed in a rolling window.
const COMMANDS_PER_WINDOW: u32 = 120;
/// Width of the rolling window.
const WINDOW: Duration = Duration::from_secs(60);

/// Windowed-burst limiter enforcing ≤120 outgoing frames per 60s window.
#[derive(Debug)]
pub struct SendLimiter {
    bucket: LeakyBucket,
}

impl SendLimiter {
    /// Build a limiter starting with a full bucket of [`COMMANDS_PER_WINDOW`]
    /// tokens. The whole allotment refills once per [`WINDOW`], so a drained
    /// bucket only becomes available again a full window after it emptied,
    /// rather than trickling back in early.
    #[must_use]
    pub fn new() -> Self {
        let bucket = LeakyBucket::builder()
            .max(f64::from(COMMANDS_PER_WINDOW))
            .tokens(f64::from(COMMANDS_PER_WINDOW))
            .refill_interval(WINDOW)
            .refill_amount(f64::from(COMMANDS_PER_WINDOW))
            .build();

        Self { bucket }
    }

    /// Suspend until a send slot is available, then consume it.
    ///
    /// Callers are served first-come-first-served; there is no priority
    /// lane for any particular frame kind.
    pub async fn acquire(&self) {
        self.bucket.acquire_one().await;
    }
}

impl Default for SendLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Instant;

    assert_impl_all!(SendLimiter: Send, Sync);

    #[tokio::test]
    async fn burst_up_to_limit_does_not_suspend() {
        let limiter = SendLimiter::new();
        let start = Instant::now();
        for _ in 0..COMMANDS_PER_WINDOW {
            limiter.acquire().await;
        }
        // A full initial bucket should drain essentially instantly.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_does_not_admit_a_single_extra_acquire_before_the_window_elapses() {
        let limiter = SendLimiter::new();
        for _ in 0..COMMANDS_PER_WINDOW {
            limiter.acquire().await;
        }

        // Just short of a full window, the bucket must still be empty:
        // a partial-window trickle would let this land before the window
        // refills, admitting more than 120 in the rolling window.
        let acquired_early = tokio::time::timeout(WINDOW - Duration::from_millis(1), limiter.acquire()).await;
        assert!(acquired_early.is_err(), "acquired an extra slot before the window refilled");
    }
}

//! Edge-triggered close signal.
//!
//! A single call to [`CloseRequest::request`] wakes every task currently
//! suspended in [`CloseRequest::wait`] inside the same `Connection` —
//! backoff sleeps, heartbeat sleeps, rate-limiter acquires, socket reads —
//! so a close is prompt rather than waiting for the next poll.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Idempotent, broadcast close signal shared by every suspension point
/// inside one `Connection` attempt.
#[derive(Debug, Default)]
pub struct CloseRequest {
    requested: AtomicBool,
    notify: Notify,
}

impl CloseRequest {
    /// A signal that has not yet been requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a close. Idempotent: the second and later calls are a no-op.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Whether a close has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Suspend until a close is requested. Returns immediately if one
    /// already was.
    pub async fn wait(&self) {
        if self.is_requested() {
            return;
        }
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::time::Duration;

    assert_impl_all!(CloseRequest: Send, Sync);

    #[tokio::test]
    async fn wait_returns_immediately_once_requested() {
        let close = CloseRequest::new();
        close.request();
        tokio::time::timeout(Duration::from_millis(50), close.wait())
            .await
            .expect("wait should not block once requested");
    }

    #[tokio::test]
    async fn second_request_is_a_noop() {
        let close = CloseRequest::new();
        close.request();
        close.request();
        assert!(close.is_requested());
    }

    #[tokio::test]
    async fn request_wakes_all_current_waiters() {
        let close = Arc::new(CloseRequest::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let close = Arc::clone(&close);
            handles.push(tokio::spawn(async move {
                close.wait().await;
            }));
        }
        // Give the spawned tasks a chance to reach `wait`.
        tokio::time::sleep(Duration::from_millis(20)).await;
        close.request();
        for handle in handles {
            tokio::time::timeout(Duration::from_millis(200), handle)
                .await
                .expect("waiter should have woken")
                .unwrap();
        }
    }
}

//! Heartbeat timestamps and the pulse task.
//!
//! `last_message_received` is written only by the poll task and read only
//! by the heartbeat task; `last_heartbeat_sent` is written only by the
//! heartbeat task and read only by the ACK handler in the poll task. Both
//! are plain atomics rather than a mutex, making the single-writer
//! discipline structural instead of merely documented.

use crate::{close::CloseRequest, codec::{GatewayFrame, OpCode}, session::Session};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Sentinel stored in an atomic millis field meaning "never happened".
const NONE: u64 = u64::MAX;

/// Shared heartbeat health state between the poll task and the pulse task.
#[derive(Debug)]
pub struct Heartbeats {
    epoch: Instant,
    last_message_received: AtomicU64,
    last_heartbeat_sent: AtomicU64,
    latency_millis: AtomicU64,
}

impl Heartbeats {
    /// Start tracking from now; `last_message_received` begins at "now" so
    /// the very first zombie check has a meaningful baseline.
    #[must_use]
    pub fn new() -> Self {
        let epoch = Instant::now();
        Self {
            epoch,
            last_message_received: AtomicU64::new(0),
            last_heartbeat_sent: AtomicU64::new(NONE),
            latency_millis: AtomicU64::new(NONE),
        }
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record that a frame was just received. Written only by the poll
    /// task.
    pub fn record_message(&self) {
        self.last_message_received.store(self.now_millis(), Ordering::Relaxed);
    }

    /// Record that a heartbeat was just sent. Written only by the pulse
    /// task.
    pub fn record_heartbeat_sent(&self) {
        self.last_heartbeat_sent.store(self.now_millis(), Ordering::Relaxed);
    }

    /// Recompute latency from the matching HEARTBEAT_ACK. Read-only access
    /// to `last_heartbeat_sent`, performed by the poll task's ACK handler.
    pub fn record_ack(&self) {
        let sent = self.last_heartbeat_sent.load(Ordering::Relaxed);
        if sent == NONE {
            return;
        }
        let latency = self.now_millis().saturating_sub(sent);
        self.latency_millis.store(latency, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::gauge!("Heartbeat-Latency", latency as f64);
    }

    /// Time elapsed since the last received frame.
    #[must_use]
    pub fn since_last_message(&self) -> Duration {
        let last = self.last_message_received.load(Ordering::Relaxed);
        Duration::from_millis(self.now_millis().saturating_sub(last))
    }

    /// Most recently measured HEARTBEAT -> HEARTBEAT_ACK latency, if any.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        let millis = self.latency_millis.load(Ordering::Relaxed);
        (millis != NONE).then(|| Duration::from_millis(millis))
    }
}

impl Default for Heartbeats {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the pulse task stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PulseExit {
    /// The connection is a zombie: no message arrived within one interval.
    Zombied,
    /// A close was requested.
    Closed,
    /// The outbound channel closed, meaning the writer/connection already
    /// tore down.
    ChannelClosed,
}

/// Run the heartbeat loop until a close is requested, a zombie is detected,
/// or the outbound channel closes.
///
/// This is the whole contract: no initial jittered delay before the first
/// beat (it would blur the strict zombie criterion for that very first
/// check), just compute-check-send-sleep on a fixed cadence.
pub async fn pulse(
    interval: Duration,
    heartbeats: &Heartbeats,
    session: &Session,
    outbound: &UnboundedSender<GatewayFrame>,
    close: &CloseRequest,
) -> PulseExit {
    loop {
        let since_msg = heartbeats.since_last_message();
        if since_msg > interval {
            warn!(?since_msg, ?interval, "connection is a zombie, no message received within one heartbeat interval");
            return PulseExit::Zombied;
        }

        let frame = GatewayFrame::new(OpCode::Heartbeat, serde_json::json!(session.seq()));
        debug!(seq = ?session.seq(), "sending heartbeat");
        heartbeats.record_heartbeat_sent();
        if outbound.send(frame).is_err() {
            return PulseExit::ChannelClosed;
        }

        tokio::select! {
            biased;
            () = close.wait() => return PulseExit::Closed,
            () = tokio::time::sleep(interval) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Heartbeats: Send, Sync);

    #[test]
    fn fresh_heartbeats_have_no_latency() {
        assert_eq!(Heartbeats::new().latency(), None);
    }

    #[test]
    fn ack_without_a_prior_send_is_ignored() {
        let heartbeats = Heartbeats::new();
        heartbeats.record_ack();
        assert_eq!(heartbeats.latency(), None);
    }

    #[test]
    fn ack_after_send_produces_finite_nonnegative_latency() {
        let heartbeats = Heartbeats::new();
        heartbeats.record_heartbeat_sent();
        std::thread::sleep(Duration::from_millis(5));
        heartbeats.record_ack();
        let latency = heartbeats.latency().expect("latency should be set");
        assert!(latency.as_millis() < 5_000);
    }

    #[tokio::test]
    async fn pulse_detects_zombie_when_interval_elapses_without_a_message() {
        let heartbeats = Heartbeats::new();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let session = Session::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let close = CloseRequest::new();

        let exit = pulse(Duration::from_millis(10), &heartbeats, &session, &tx, &close).await;
        assert_eq!(exit, PulseExit::Zombied);
    }

    #[tokio::test]
    async fn pulse_exits_cleanly_on_close_request() {
        let heartbeats = Heartbeats::new();
        let session = Session::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let close = CloseRequest::new();
        close.request();

        let exit = pulse(Duration::from_secs(30), &heartbeats, &session, &tx, &close).await;
        assert_eq!(exit, PulseExit::Closed);
        assert!(rx.try_recv().is_ok(), "a heartbeat should still have been sent before observing the close");
    }

    #[tokio::test]
    async fn pulse_stops_when_outbound_channel_closes() {
        let heartbeats = Heartbeats::new();
        let session = Session::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let close = CloseRequest::new();

        let exit = pulse(Duration::from_secs(30), &heartbeats, &session, &tx, &close).await;
        assert_eq!(exit, PulseExit::ChannelClosed);
    }
}

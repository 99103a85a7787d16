//! Keeps one [`Connection`] alive across reconnects and exposes the
//! process-visible shard state.

use crate::{
    close::CloseRequest,
    config::Config,
    connection::{Connection, EventConsumer},
    error::{ConnectionError, ReceivingEventErrorType},
    intents::Intents,
    presence::PresenceUpdate,
    session::Session,
    stage::Stage,
};
use std::{
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{info, warn};

/// Structured reason the keep-alive loop gave up. Lighter than
/// [`ConnectionError`]: it carries the matchable kind without the original
/// error's boxed source, so it can be read more than once — once by
/// [`Supervisor::start`] as it returns, and again later through
/// [`Supervisor::final_error`] — rather than consumed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
pub enum TerminationError {
    /// The gateway closed the connection with a non-reconnectable code.
    ServerClose {
        /// Close code sent by the gateway.
        code: u16,
    },
    /// Some other fatal condition ended the connection.
    Gateway,
}

impl TerminationError {
    fn from_connection_error(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::ReceivingEvent(inner) => match inner.kind() {
                ReceivingEventErrorType::ServerClose { code } => Self::ServerClose { code: *code },
                _ => Self::Gateway,
            },
            ConnectionError::Connecting(_) => Self::Gateway,
        }
    }
}

impl Display for TerminationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerClose { code } => {
                f.write_str("the gateway closed the connection with code ")?;
                Display::fmt(code, f)
            },
            Self::Gateway => f.write_str("the connection ended on a fatal error"),
        }
    }
}

impl std::error::Error for TerminationError {}

/// Fixed pacing applied after a gateway-initiated RECONNECT or
/// INVALID_SESSION, per the gateway's own rate-limiting guidance.
const POST_DIRECTIVE_PAUSE: Duration = Duration::from_secs(5);

/// Side-band lifecycle notifications. All methods default to doing nothing,
/// so an observer only needs to override what it cares about.
pub trait Observer: Send + Sync {
    /// `start()` was called.
    fn starting(&self) {}
    /// The initial connect succeeded. Never fires again on later reconnects.
    fn started(&self) {}
    /// `close()` was called.
    fn stopping(&self) {}
    /// The connection has fully torn down.
    fn stopped(&self) {}
}

/// Idempotent, broadcast, one-shot signal: the first [`fire`](Self::fire)
/// wakes every waiter, later calls are no-ops. Distinct from
/// [`CloseRequest`] only in name — it marks "the first outcome is known"
/// rather than "a close was asked for".
struct OnceSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl OnceSignal {
    fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        self.notify.notified().await;
    }
}

/// Owns a single [`Connection`] and restarts it across reconnects,
/// applying the gateway's own recovery guidance (resume vs. re-identify,
/// fixed pacing after a directive, backoff after a fault) between
/// attempts.
pub struct Supervisor {
    config: Arc<Config>,
    session: Arc<Session>,
    connection: Arc<Connection>,
    close: Arc<CloseRequest>,
    stage: Arc<Mutex<Stage>>,
    disconnect_count: Arc<AtomicU64>,
    reconnect_count: Arc<AtomicU64>,
    observer: Option<Arc<dyn Observer>>,
    started_signal: Arc<OnceSignal>,
    final_error: Arc<Mutex<Option<TerminationError>>>,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Build a supervisor for the given configuration, forwarding every
    /// dispatch and synthetic event to `consumer`.
    #[must_use]
    pub fn new(config: Config, consumer: EventConsumer) -> Self {
        let config = Arc::new(config);
        let session = Arc::new(Session::new());
        let stage = Arc::new(Mutex::new(Stage::NotRunning));
        let disconnect_count = Arc::new(AtomicU64::new(0));
        let reconnect_count = Arc::new(AtomicU64::new(0));
        let started_signal = Arc::new(OnceSignal::new());

        let internal_consumer = Self::wrap_consumer(
            Arc::clone(&session),
            Arc::clone(&stage),
            Arc::clone(&disconnect_count),
            Arc::clone(&reconnect_count),
            Arc::clone(&started_signal),
            consumer,
        );
        let connection = Arc::new(Connection::new(Arc::clone(&config), Arc::clone(&session), internal_consumer));

        Self {
            config,
            session,
            connection,
            close: Arc::new(CloseRequest::new()),
            stage,
            disconnect_count,
            reconnect_count,
            observer: None,
            started_signal,
            final_error: Arc::new(Mutex::new(None)),
            keep_alive: Mutex::new(None),
        }
    }

    /// Attach a lifecycle observer. Only meaningful if set before
    /// [`start`](Self::start) is called.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Wrap the caller's consumer so CONNECTED/DISCONNECTED/READY/RESUMED
    /// drive the visible [`Stage`] and counters before the event is handed
    /// to the caller unmodified.
    fn wrap_consumer(
        session: Arc<Session>,
        stage: Arc<Mutex<Stage>>,
        disconnect_count: Arc<AtomicU64>,
        reconnect_count: Arc<AtomicU64>,
        started_signal: Arc<OnceSignal>,
        consumer: EventConsumer,
    ) -> EventConsumer {
        Arc::new(move |shard_id, name, payload| {
            match name.as_str() {
                "CONNECTED" => {
                    let next = if session.can_resume() { Stage::Resuming } else { Stage::WaitingForReady };
                    *stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = next;
                },
                "DISCONNECTED" => {
                    disconnect_count.fetch_add(1, Ordering::Relaxed);
                },
                "READY" => {
                    *stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Stage::Ready;
                    started_signal.fire();
                },
                "RESUMED" => {
                    *stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Stage::Ready;
                    reconnect_count.fetch_add(1, Ordering::Relaxed);
                    started_signal.fire();
                },
                _ => {},
            }
            (consumer)(shard_id, name, payload)
        })
    }

    /// Spawn the keep-alive task and wait until either the first handshake
    /// succeeds or the supervisor has already given up. Returns the error
    /// that ended the shard if one occurred before the initial handshake
    /// completed; a clean close requested before then is `Ok(())`, same as
    /// a successful handshake.
    pub async fn start(&self) -> Result<(), TerminationError> {
        if let Some(observer) = &self.observer {
            observer.starting();
        }

        let connection = Arc::clone(&self.connection);
        let session = Arc::clone(&self.session);
        let close = Arc::clone(&self.close);
        let stage = Arc::clone(&self.stage);
        let started_signal = Arc::clone(&self.started_signal);
        let final_error = Arc::clone(&self.final_error);

        let handle = tokio::spawn(async move {
            let result = keep_alive(&connection, &session, &close, &stage).await;
            let termination = result.as_ref().map(TerminationError::from_connection_error);
            *final_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = termination;
            started_signal.fire();
        });
        *self.keep_alive.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        self.started_signal.wait().await;

        let reached_ready = *self.stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) == Stage::Ready;
        if reached_ready {
            if let Some(observer) = &self.observer {
                observer.started();
            }
        }

        match self.final_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Await the keep-alive task's final termination. A second call after
    /// the task has already been joined is a no-op.
    pub async fn join(&self) {
        let handle = self.keep_alive.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Request a graceful close: stop reconnecting, tear down the current
    /// connection, and wait for full termination. Idempotent.
    pub async fn close(&self) {
        *self.stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Stage::Stopping;
        if let Some(observer) = &self.observer {
            observer.stopping();
        }

        self.close.request();
        self.join().await;

        *self.stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Stage::Stopped;
        if let Some(observer) = &self.observer {
            observer.stopped();
        }
    }

    /// The error that ended the keep-alive loop, if it ended on a fatal
    /// condition rather than a requested close.
    #[must_use]
    pub fn final_error(&self) -> Option<TerminationError> {
        *self.final_error.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// This shard's `(id, count)` pair.
    #[must_use]
    pub fn shard_id(&self) -> u64 {
        self.config.shard()[0]
    }

    /// Total number of shards this shard is one of.
    #[must_use]
    pub fn shard_count(&self) -> u64 {
        self.config.shard()[1]
    }

    /// Current lifecycle stage.
    #[must_use]
    pub fn state(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of times the connection has been torn down (for any reason).
    #[must_use]
    pub fn disconnect_count(&self) -> u64 {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    /// Number of times a RESUME completed successfully.
    #[must_use]
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// The current session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session.id()
    }

    /// The last observed sequence number, if any.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.session.seq()
    }

    /// Discord API version this shard negotiates.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.config.api_version()
    }

    /// Intents requested at IDENTIFY time.
    #[must_use]
    pub fn intents(&self) -> Intents {
        self.config.intents()
    }

    /// Heartbeat interval negotiated on the current/last attempt.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.connection.heartbeat_interval()
    }

    /// Most recently measured heartbeat round-trip latency.
    #[must_use]
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.connection.heartbeat_latency()
    }

    /// Queue a presence update, sent live if currently connected and stored
    /// for the next IDENTIFY either way.
    pub fn update_presence(&self, update: PresenceUpdate) {
        self.connection.update_presence(update);
    }

    /// Join, move between, or leave a voice channel.
    pub fn update_voice_state(
        &self,
        guild_id: impl Into<String>,
        channel_id: Option<String>,
        self_mute: bool,
        self_deaf: bool,
    ) {
        self.connection.update_voice_state(guild_id, channel_id, self_mute, self_deaf);
    }
}

/// Run `Connection::run_once` attempts until a fatal condition or a
/// requested close. Returns the fatal error, if any.
async fn keep_alive(
    connection: &Connection,
    session: &Session,
    close: &CloseRequest,
    stage: &Mutex<Stage>,
) -> Option<ConnectionError> {
    loop {
        if close.is_requested() {
            return None;
        }

        *stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Stage::Connecting;
        #[cfg(feature = "metrics")]
        metrics::counter!("Connection-Attempt", 1);
        let err = connection.run_once(close).await;

        if err.fatal() {
            warn!(error = %err, "fatal gateway error, giving up");
            return Some(err);
        }

        match &err {
            ConnectionError::ReceivingEvent(inner) if matches!(inner.kind(), ReceivingEventErrorType::UserClose) => {
                return None;
            },
            ConnectionError::ReceivingEvent(inner)
                if matches!(
                    inner.kind(),
                    ReceivingEventErrorType::InvalidSession { .. } | ReceivingEventErrorType::Reconnect
                ) =>
            {
                if matches!(inner.kind(), ReceivingEventErrorType::InvalidSession { can_resume: false }) {
                    session.clear();
                }
                info!(error = %err, "pausing before the next attempt as the gateway asked");
                connection.reset_backoff();
                connection.skip_next_throttle();
                sleep_cancelable(POST_DIRECTIVE_PAUSE, close).await;
            },
            _ => {
                warn!(error = %err, "connection attempt failed, retrying");
            },
        }

        if close.is_requested() {
            return None;
        }
    }
}

async fn sleep_cancelable(duration: Duration, close: &CloseRequest) {
    tokio::select! {
        biased;
        () = close.wait() => {},
        () = tokio::time::sleep(duration) => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::atomic::AtomicUsize;

    assert_impl_all!(Supervisor: Send, Sync);

    #[test]
    fn starts_in_not_running_stage() {
        let config = Config::builder("token", "wss://gateway.discord.gg").build();
        let supervisor = Supervisor::new(config, Arc::new(|_, _, _| Box::pin(async {})));
        assert_eq!(supervisor.state(), Stage::NotRunning);
        assert_eq!(supervisor.disconnect_count(), 0);
        assert_eq!(supervisor.reconnect_count(), 0);
        assert_eq!(supervisor.session_id(), None);
    }

    #[test]
    fn observer_defaults_are_inert() {
        struct Noop;
        impl Observer for Noop {}
        let noop = Noop;
        noop.starting();
        noop.started();
        noop.stopping();
        noop.stopped();
    }

    #[tokio::test]
    async fn close_before_start_transitions_straight_to_stopped() {
        let config = Config::builder("token", "wss://gateway.discord.gg").build();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let consumer: EventConsumer = Arc::new(move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            Box::pin(async {})
        });
        let supervisor = Supervisor::new(config, consumer);

        supervisor.close().await;
        assert_eq!(supervisor.state(), Stage::Stopped);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}

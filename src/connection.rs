//! One WebSocket session: handshake, heartbeat, poll loop, send path, close.

use crate::{
    backoff::Backoff,
    close::CloseRequest,
    codec::{self, GatewayFrame, Hello, OpCode, ReadyMinimal},
    compression::ZlibStream,
    config::Config,
    error::{ConnectingError, ConnectingErrorType, ConnectionError, ReceivingEventError, ReceivingEventErrorType},
    heartbeat::{self, Heartbeats, PulseExit},
    limiter::SendLimiter,
    presence::PresenceUpdate,
    session::Session,
};
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use serde_json::Value;
use std::{
    future::Future,
    pin::Pin,
    sync::{atomic::{AtomicBool, Ordering}, Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, sync::mpsc::{self, UnboundedSender}};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::{CloseFrame, frame::coding::CloseCode},
    tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A boxed, 'static future, returned by the injected event consumer.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The injected raw-event consumer: `(shard_id, event_name, payload)`.
///
/// Invoked with the synthetic names `"CONNECTED"` and `"DISCONNECTED"` as
/// well as every protocol DISPATCH event name. The connection never awaits
/// this future's completion; it is always spawned as a detached task.
pub type EventConsumer = Arc<dyn Fn(u64, String, Value) -> BoxFuture + Send + Sync>;

/// Below this gap between attempt starts, the pre-sleep throttle applies;
/// at or above it, enough time has naturally passed and the next attempt
/// proceeds immediately.
const THROTTLE_WINDOW: Duration = Duration::from_secs(30);

/// An item waiting to go out over the socket.
enum Outbound {
    /// A gateway frame, subject to [`SendLimiter`].
    Frame(GatewayFrame),
    /// A raw WebSocket close, sent outside the rate limiter.
    Close(u16, String),
}

/// One WebSocket session with the gateway: handshake, heartbeat, poll loop,
/// send path, and close. Reused across reconnect attempts by the
/// [`Supervisor`](crate::supervisor::Supervisor), which calls
/// [`run_once`](Self::run_once) once per attempt.
pub struct Connection {
    config: Arc<Config>,
    session: Arc<Session>,
    consumer: EventConsumer,
    limiter: Arc<SendLimiter>,
    connected_at: Mutex<Option<Instant>>,
    heartbeat_interval: Mutex<Option<Duration>>,
    heartbeats: Mutex<Arc<Heartbeats>>,
    current_outbound: Mutex<Option<UnboundedSender<Outbound>>>,
    backoff: Mutex<Backoff>,
    last_run_started_at: Mutex<Option<Instant>>,
    skip_throttle: AtomicBool,
}

impl Connection {
    /// Build a connection bound to the given configuration and session,
    /// forwarding dispatch/synthetic events to `consumer`.
    #[must_use]
    pub fn new(config: Arc<Config>, session: Arc<Session>, consumer: EventConsumer) -> Self {
        Self {
            config,
            session,
            consumer,
            limiter: Arc::new(SendLimiter::new()),
            connected_at: Mutex::new(None),
            heartbeat_interval: Mutex::new(None),
            heartbeats: Mutex::new(Arc::new(Heartbeats::new())),
            current_outbound: Mutex::new(None),
            backoff: Mutex::new(Backoff::new()),
            last_run_started_at: Mutex::new(None),
            skip_throttle: AtomicBool::new(false),
        }
    }

    /// Reset the reconnect backoff sequence, as the supervisor does after a
    /// successful handshake or a gateway-initiated reconnect/invalid-session.
    pub(crate) fn reset_backoff(&self) {
        self.backoff.lock().unwrap_or_else(std::sync::PoisonError::into_inner).reset();
    }

    /// Skip the pre-sleep throttle on the very next [`run_once`](Self::run_once)
    /// call, regardless of how recently the previous attempt started.
    pub(crate) fn skip_next_throttle(&self) {
        self.skip_throttle.store(true, Ordering::Release);
    }

    /// Whether the socket has finished its upgrade and is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some()
    }

    /// Heartbeat interval negotiated via HELLO on the current/last attempt.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        *self.heartbeat_interval.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Most recent measured HEARTBEAT -> HEARTBEAT_ACK latency.
    #[must_use]
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        self.heartbeats.lock().unwrap_or_else(std::sync::PoisonError::into_inner).latency()
    }

    /// Queue a presence update. Stored immediately; also sent live over the
    /// socket if currently connected.
    pub fn update_presence(&self, update: PresenceUpdate) {
        let frame = {
            let mut presence = self.config.presence.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            presence.apply(update);
            presence.to_frame()
        };
        self.send_frame(GatewayFrame::new(OpCode::PresenceUpdate, frame));
    }

    /// Join, move between, or leave a voice channel.
    pub fn update_voice_state(
        &self,
        guild_id: impl Into<String>,
        channel_id: Option<String>,
        self_mute: bool,
        self_deaf: bool,
    ) {
        let d = serde_json::json!({
            "guild_id": guild_id.into(),
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        });
        self.send_frame(GatewayFrame::new(OpCode::VoiceStateUpdate, d));
    }

    fn send_frame(&self, frame: GatewayFrame) {
        if let Some(tx) = self.current_outbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner).as_ref() {
            let _ = tx.send(Outbound::Frame(frame));
        }
    }

    /// Run a single connection attempt to completion. Always returns once
    /// the attempt ends, for any reason — a clean user-requested close is
    /// represented as [`ReceivingEventErrorType::UserClose`], not a
    /// separate success case, since the supervisor's keep-alive loop
    /// matches on the reason either way.
    pub async fn run_once(&self, close: &CloseRequest) -> ConnectionError {
        let should_throttle = {
            let mut last_guard = self.last_run_started_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let skip = self.skip_throttle.swap(false, Ordering::AcqRel);
            let throttle = !skip && last_guard.map_or(false, |prev| prev.elapsed() < THROTTLE_WINDOW);
            *last_guard = Some(Instant::now());
            throttle
        };
        if should_throttle {
            let delay = self.backoff.lock().unwrap_or_else(std::sync::PoisonError::into_inner).next();
            tokio::select! {
                biased;
                () = close.wait() => return ReceivingEventError::from_type(ReceivingEventErrorType::UserClose).into(),
                () = tokio::time::sleep(delay) => {},
            }
        }

        let url = match codec::build_url(&self.config.gateway_url, self.config.api_version, self.config.compression) {
            Ok(url) => url,
            Err(source) => {
                return ConnectingError {
                    kind: ConnectingErrorType::ParsingUrl { url: self.config.gateway_url.clone() },
                    source: Some(Box::new(source)),
                }
                .into();
            },
        };

        debug!(%url, "connecting");
        let (stream, _response) = match connect_async(url.as_str()).await {
            Ok(pair) => pair,
            Err(source) => {
                return ConnectingError {
                    kind: ConnectingErrorType::Establishing,
                    source: Some(Box::new(source)),
                }
                .into();
            },
        };

        *self.connected_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
        let mut zlib = ZlibStream::new();
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        *self.current_outbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(outbound_tx.clone());

        // `heartbeat::pulse` speaks plain `GatewayFrame`s, oblivious to the
        // `Outbound` wrapper the writer task expects; a tiny forwarder
        // bridges the two so the heartbeat module stays ignorant of the
        // close-frame side channel.
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::unbounded_channel::<GatewayFrame>();
        let forward_outbound = outbound_tx.clone();
        let forward_handle = tokio::spawn(async move {
            while let Some(frame) = heartbeat_rx.recv().await {
                if forward_outbound.send(Outbound::Frame(frame)).is_err() {
                    break;
                }
            }
        });

        let limiter = Arc::clone(&self.limiter);
        let writer_handle = tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Frame(frame) => {
                        limiter.acquire().await;
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if write.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    },
                    Outbound::Close(code, reason) => {
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    },
                }
            }
            let _ = write.close().await;
        });

        let teardown = |this: &Self,
                        writer_handle: tokio::task::JoinHandle<()>,
                        forward_handle: tokio::task::JoinHandle<()>,
                        dispatched_connected: bool| {
            writer_handle.abort();
            forward_handle.abort();
            *this.current_outbound.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
            *this.connected_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
            if dispatched_connected {
                this.dispatch("DISCONNECTED".to_owned(), Value::Object(Default::default()));
            }
        };

        let hello = match Self::receive_frame(&mut read, &mut zlib, self.config.compression).await {
            Ok(frame) if frame.opcode() == Some(OpCode::Hello) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => "Hello");
                match frame.d.and_then(|d| serde_json::from_value::<Hello>(d).ok()) {
                    Some(hello) => hello,
                    None => {
                        teardown(self, writer_handle, forward_handle, false);
                        return ReceivingEventError::from_type(ReceivingEventErrorType::Gateway).into();
                    },
                }
            },
            Ok(_) => {
                teardown(self, writer_handle, forward_handle, false);
                return ReceivingEventError::from_type(ReceivingEventErrorType::Gateway).into();
            },
            Err(err) => {
                teardown(self, writer_handle, forward_handle, false);
                return err.into();
            },
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        *self.heartbeat_interval.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(interval);

        let heartbeats = Arc::new(Heartbeats::new());
        heartbeats.record_message();
        *self.heartbeats.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Arc::clone(&heartbeats);

        self.dispatch("CONNECTED".to_owned(), Value::Object(Default::default()));

        let handshake_frame = if self.session.can_resume() {
            info!(session_id = ?self.session.id(), "resuming session");
            GatewayFrame::new(
                OpCode::Resume,
                serde_json::json!({
                    "token": self.config.token,
                    "session_id": self.session.id(),
                    "seq": self.session.seq(),
                }),
            )
        } else {
            info!("identifying");
            self.build_identify()
        };

        if outbound_tx.send(Outbound::Frame(handshake_frame)).is_err() {
            teardown(self, writer_handle, forward_handle, true);
            return ReceivingEventError::from_type(ReceivingEventErrorType::SocketClosed).into();
        }

        let result = tokio::select! {
            biased;
            exit = heartbeat::pulse(interval, &heartbeats, &self.session, &heartbeat_tx, close) => {
                match exit {
                    PulseExit::Zombied => ReceivingEventError::from_type(ReceivingEventErrorType::Zombied),
                    PulseExit::Closed => ReceivingEventError::from_type(ReceivingEventErrorType::UserClose),
                    PulseExit::ChannelClosed => ReceivingEventError::from_type(ReceivingEventErrorType::SocketClosed),
                }
            },
            err = self.poll_loop(&mut read, &mut zlib, &heartbeats, &outbound_tx, close) => err,
        };

        // Preserve resumability on the way out for the two cases the
        // protocol explicitly calls for it: a detected zombie and a
        // RECONNECT directive both close with 3000 so the gateway doesn't
        // invalidate the session.
        if matches!(
            result.kind,
            ReceivingEventErrorType::Zombied | ReceivingEventErrorType::Reconnect
        ) {
            let reason = if matches!(result.kind, ReceivingEventErrorType::Zombied) {
                "zombie connection"
            } else {
                "reconnecting"
            };
            let _ = outbound_tx.send(Outbound::Close(3000, reason.to_owned()));
        }

        teardown(self, writer_handle, forward_handle, true);
        result.into()
    }

    async fn poll_loop(
        &self,
        read: &mut SplitStream<WsStream>,
        zlib: &mut ZlibStream,
        heartbeats: &Heartbeats,
        outbound: &UnboundedSender<Outbound>,
        close: &CloseRequest,
    ) -> ReceivingEventError {
        loop {
            tokio::select! {
                biased;
                () = close.wait() => return ReceivingEventError::from_type(ReceivingEventErrorType::UserClose),
                frame = Self::receive_frame(read, zlib, self.config.compression) => {
                    match frame {
                        Ok(frame) => {
                            heartbeats.record_message();
                            if let Some(err) = self.handle_frame(frame, outbound, heartbeats) {
                                return err;
                            }
                        },
                        Err(err) => return err,
                    }
                },
            }
        }
    }

    fn handle_frame(
        &self,
        frame: GatewayFrame,
        outbound: &UnboundedSender<Outbound>,
        heartbeats: &Heartbeats,
    ) -> Option<ReceivingEventError> {
        match frame.opcode() {
            Some(OpCode::Dispatch) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => "Dispatch");
                if let Some(seq) = frame.s {
                    self.session.set_seq(seq);
                }
                if let Some(name) = frame.t.clone() {
                    match name.as_str() {
                        "READY" => {
                            if let Some(ready) = frame.d.clone().and_then(|d| serde_json::from_value::<ReadyMinimal>(d).ok()) {
                                self.session.set_id(ready.session_id);
                            }
                            self.reset_backoff();
                            info!("session ready");
                        },
                        "RESUMED" => {
                            self.reset_backoff();
                            info!("session resumed");
                        },
                        _ => {},
                    }
                    self.dispatch(name, frame.d.unwrap_or(Value::Null));
                }
                None
            },
            Some(OpCode::Heartbeat) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => "Heartbeat");
                trace!("gateway requested an immediate heartbeat ack");
                let _ = outbound.send(Outbound::Frame(GatewayFrame::new(OpCode::HeartbeatAck, Value::Null)));
                None
            },
            Some(OpCode::HeartbeatAck) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => "HeartbeatAck");
                heartbeats.record_ack();
                None
            },
            Some(OpCode::Reconnect) => {
                #[cfg(feature = "metrics")]
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => "Reconnect");
                Some(ReceivingEventError::from_type(ReceivingEventErrorType::Reconnect))
            },
            Some(OpCode::InvalidSession) => {
                let can_resume = frame.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                warn!(can_resume, "invalid session");
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "GatewayEvent", 1,
                    "GatewayEvent" => if can_resume { "InvalidateSessionTrue" } else { "InvalidateSessionFalse" }
                );
                Some(ReceivingEventError::from_type(ReceivingEventErrorType::InvalidSession { can_resume }))
            },
            _ => {
                trace!(op = frame.op, "ignoring frame with an unhandled opcode");
                None
            },
        }
    }

    fn build_identify(&self) -> GatewayFrame {
        let presence_frame = {
            let presence = self.config.presence.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            (!presence.is_default()).then(|| presence.to_frame())
        };

        let mut d = serde_json::json!({
            "token": self.config.token,
            "compress": false,
            "large_threshold": self.config.large_threshold,
            "properties": {
                "os": self.config.identify_properties.os,
                "browser": self.config.identify_properties.browser,
                "device": self.config.identify_properties.device,
            },
            "shard": self.config.shard,
            "intents": self.config.intents.bits(),
        });
        if let Some(presence_frame) = presence_frame {
            d["presence"] = presence_frame;
        }

        GatewayFrame::new(OpCode::Identify, d)
    }

    async fn receive_frame(
        read: &mut SplitStream<WsStream>,
        zlib: &mut ZlibStream,
        compression: bool,
    ) -> Result<GatewayFrame, ReceivingEventError> {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|source| ReceivingEventError::with_source(ReceivingEventErrorType::Gateway, Box::new(source)));
                },
                Some(Ok(Message::Binary(bytes))) => {
                    if !compression {
                        return Err(ReceivingEventError::from_type(ReceivingEventErrorType::Gateway));
                    }
                    zlib.extend(&bytes);
                    match zlib.message() {
                        Ok(Some(text)) => {
                            return serde_json::from_str(&text)
                                .map_err(|source| ReceivingEventError::with_source(ReceivingEventErrorType::Gateway, Box::new(source)));
                        },
                        Ok(None) => continue,
                        Err(source) => {
                            return Err(ReceivingEventError::with_source(ReceivingEventErrorType::Gateway, Box::new(source) as _));
                        },
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map_or(1000, |f| u16::from(f.code));
                    return Err(ReceivingEventError::from_type(ReceivingEventErrorType::ServerClose { code }));
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(_)) => continue,
                Some(Err(source)) => {
                    return Err(ReceivingEventError::with_source(ReceivingEventErrorType::SocketClosed, Box::new(source)));
                },
                None => return Err(ReceivingEventError::from_type(ReceivingEventErrorType::SocketClosed)),
            }
        }
    }

    fn dispatch(&self, event_name: String, payload: Value) {
        let consumer = Arc::clone(&self.consumer);
        let shard_id = self.config.shard()[0];
        tokio::spawn(async move {
            (consumer)(shard_id, event_name, payload).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Connection: Send, Sync);

    #[test]
    fn connection_starts_disconnected() {
        let config = Arc::new(Config::builder("token", "wss://gateway.discord.gg").build());
        let session = Arc::new(Session::new());
        let consumer: EventConsumer = Arc::new(|_, _, _| Box::pin(async {}));
        let connection = Connection::new(config, session, consumer);

        assert!(!connection.is_connected());
        assert_eq!(connection.heartbeat_interval(), None);
        assert_eq!(connection.heartbeat_latency(), None);
    }
}

//! Crate-level error taxonomy.
//!
//! Every fallible subsystem exposes a public, non-exhaustive `Error` struct
//! wrapping a private `ErrorType` enum, in the same shape: a `kind()`
//! accessor, an `into_parts()` escape hatch for the underlying source, and a
//! `Display`/`std::error::Error` impl that defers to the wrapped source when
//! one is present. This keeps every error type growable (new variants are
//! not a breaking change) without giving up structured matching.

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Boxed source error, erased to a trait object so each `ErrorType` doesn't
/// need a generic parameter.
pub(crate) type Source = Box<dyn StdError + Send + Sync>;

/// Why a gateway connection could not be established.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectingErrorType {
    /// Establishing the TCP/TLS/WebSocket upgrade failed.
    Establishing,
    /// The gateway URL could not be parsed.
    ParsingUrl {
        /// URL that could not be parsed.
        url: String,
    },
}

/// Failed to connect to the gateway.
#[derive(Debug)]
pub struct ConnectingError {
    pub(crate) kind: ConnectingErrorType,
    pub(crate) source: Option<Source>,
}

impl ConnectingError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ConnectingErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_parts(self) -> (ConnectingErrorType, Option<Source>) {
        (self.kind, self.source)
    }
}

impl Display for ConnectingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConnectingErrorType::Establishing => f.write_str("establishing the connection failed"),
            ConnectingErrorType::ParsingUrl { url } => {
                f.write_str("gateway url `")?;
                f.write_str(url)?;
                f.write_str("` could not be parsed")
            },
        }
    }
}

impl StdError for ConnectingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Reasons an established connection stopped producing events.
///
/// Each variant's `fatal`/`reconnectable`/`resumable` predicate is the
/// classification the supervisor consults instead of re-deriving it at each
/// call site.
#[derive(Debug)]
#[non_exhaustive]
pub enum ReceivingEventErrorType {
    /// The WebSocket closed without a protocol close frame, or the
    /// connection task observed the socket end unexpectedly.
    SocketClosed,
    /// The gateway sent a close frame.
    ServerClose {
        /// Close code sent by the gateway.
        code: u16,
    },
    /// The gateway sent an opcode 7 RECONNECT.
    Reconnect,
    /// The gateway sent an opcode 9 INVALID_SESSION.
    InvalidSession {
        /// Whether the session can be resumed.
        can_resume: bool,
    },
    /// The heartbeat task detected prolonged silence from the gateway.
    Zombied,
    /// A frame could not be decoded, the zlib stream failed to inflate, or
    /// HELLO didn't arrive where expected.
    Gateway,
    /// The user requested the shard close via [`Supervisor::close`].
    ///
    /// [`Supervisor::close`]: crate::supervisor::Supervisor::close
    UserClose,
}

impl ReceivingEventErrorType {
    /// Whether this error should terminate the supervisor outright, without
    /// another connection attempt.
    #[must_use]
    pub const fn fatal(&self) -> bool {
        matches!(
            self,
            Self::ServerClose { code } if is_fatal_close_code(*code)
        )
    }

    /// Whether another connection attempt should be made at all.
    #[must_use]
    pub const fn reconnectable(&self) -> bool {
        !self.fatal() && !matches!(self, Self::UserClose)
    }

    /// Whether the *same* session (not just another connection) can be
    /// resumed, i.e. the next attempt should send RESUME rather than
    /// IDENTIFY.
    #[must_use]
    pub const fn resumable(&self) -> bool {
        match self {
            Self::InvalidSession { can_resume } => *can_resume,
            Self::Reconnect | Self::Zombied | Self::SocketClosed => true,
            Self::ServerClose { code } => is_reconnectable_close_code(*code),
            Self::Gateway | Self::UserClose => false,
        }
    }
}

/// A connection stopped producing events.
#[derive(Debug)]
pub struct ReceivingEventError {
    pub(crate) kind: ReceivingEventErrorType,
    pub(crate) source: Option<Source>,
}

impl ReceivingEventError {
    pub(crate) fn from_type(kind: ReceivingEventErrorType) -> Self {
        Self { kind, source: None }
    }

    pub(crate) fn with_source(kind: ReceivingEventErrorType, source: Source) -> Self {
        Self {
            kind,
            source: Some(source),
        }
    }

    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ReceivingEventErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_parts(self) -> (ReceivingEventErrorType, Option<Source>) {
        (self.kind, self.source)
    }
}

impl Display for ReceivingEventError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ReceivingEventErrorType::SocketClosed => f.write_str("the socket closed unexpectedly"),
            ReceivingEventErrorType::ServerClose { code } => {
                f.write_str("the gateway closed the connection with code ")?;
                Display::fmt(code, f)
            },
            ReceivingEventErrorType::Reconnect => f.write_str("the gateway asked us to reconnect"),
            ReceivingEventErrorType::InvalidSession { can_resume } => {
                f.write_str("the session is invalid, resumable: ")?;
                Display::fmt(can_resume, f)
            },
            ReceivingEventErrorType::Zombied => {
                f.write_str("the connection is a zombie: no messages received within one heartbeat interval")
            },
            ReceivingEventErrorType::Gateway => f.write_str("received an invalid or malformed gateway frame"),
            ReceivingEventErrorType::UserClose => f.write_str("the user requested the shard close"),
        }
    }
}

impl StdError for ReceivingEventError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Close codes the gateway is known to send, and how the client should react
/// to each.
const FATAL_CLOSE_CODES: &[u16] = &[4003, 4004, 4005, 4010, 4011, 4012, 4013, 4014];
const RECONNECTABLE_CLOSE_CODES: &[u16] = &[1000, 1001, 4000, 4002, 4007, 4008, 4009];

/// Close code used when *we* close the socket to preserve the session
/// (zombie detection, RECONNECT directive handling).
pub const DO_NOT_INVALIDATE_SESSION: u16 = 3000;

/// Whether a gateway-sent close code is one of the documented "do not
/// retry" codes.
#[must_use]
pub const fn is_fatal_close_code(code: u16) -> bool {
    let mut i = 0;
    while i < FATAL_CLOSE_CODES.len() {
        if FATAL_CLOSE_CODES[i] == code {
            return true;
        }
        i += 1;
    }
    false
}

/// Whether a gateway-sent close code is in the documented reconnectable
/// allow-list. Unknown codes fall back to reconnectable, matching the
/// "reconnectable unless locally known to be fatal" design note.
#[must_use]
pub const fn is_reconnectable_close_code(code: u16) -> bool {
    if is_fatal_close_code(code) {
        return false;
    }
    let mut i = 0;
    while i < RECONNECTABLE_CLOSE_CODES.len() {
        if RECONNECTABLE_CLOSE_CODES[i] == code {
            return true;
        }
        i += 1;
    }
    true
}

/// Failure sending a command over a connection.
#[derive(Debug)]
#[non_exhaustive]
pub enum SendErrorType {
    /// Serializing the payload as JSON failed.
    Serializing,
    /// Writing the payload to the WebSocket failed.
    Sending,
}

/// A command could not be sent.
#[derive(Debug)]
pub struct SendError {
    pub(crate) kind: SendErrorType,
    pub(crate) source: Option<Source>,
}

impl SendError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &SendErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_parts(self) -> (SendErrorType, Option<Source>) {
        (self.kind, self.source)
    }
}

impl Display for SendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            SendErrorType::Serializing => f.write_str("payload could not be serialized as json"),
            SendErrorType::Sending => f.write_str("payload could not be written to the websocket"),
        }
    }
}

impl StdError for SendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Failure inflating a zlib-compressed gateway frame.
#[derive(Debug)]
#[non_exhaustive]
pub enum CompressionErrorType {
    /// The deflate stream could not be decompressed.
    Decompressing,
    /// The decompressed bytes were not valid UTF-8.
    NotUtf8,
}

/// A binary frame could not be decompressed into a gateway payload.
#[derive(Debug)]
pub struct CompressionError {
    pub(crate) kind: CompressionErrorType,
    pub(crate) source: Option<Source>,
}

impl CompressionError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &CompressionErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_parts(self) -> (CompressionErrorType, Option<Source>) {
        (self.kind, self.source)
    }
}

impl Display for CompressionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            CompressionErrorType::Decompressing => f.write_str("message could not be decompressed"),
            CompressionErrorType::NotUtf8 => f.write_str("decompressed message was not valid utf-8"),
        }
    }
}

impl StdError for CompressionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Invalid configuration passed to [`ConfigBuilder`].
///
/// [`ConfigBuilder`]: crate::config::ConfigBuilder
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigErrorType {
    /// `large_threshold` was outside the accepted `50..=250` range.
    LargeThreshold {
        /// Provided value.
        value: u64,
    },
    /// `shard_id` was not less than `shard_count`.
    ShardId {
        /// Provided shard id.
        id: u64,
        /// Provided shard count.
        total: u64,
    },
}

/// A [`Config`] could not be built from the given values.
///
/// [`Config`]: crate::config::Config
#[derive(Debug)]
pub struct ConfigError {
    pub(crate) kind: ConfigErrorType,
}

impl ConfigError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ConfigErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[allow(clippy::missing_const_for_fn, clippy::unused_self)]
    pub fn into_parts(self) -> (ConfigErrorType, Option<Source>) {
        (self.kind, None)
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConfigErrorType::LargeThreshold { value } => {
                f.write_str("large threshold ")?;
                Display::fmt(value, f)?;
                f.write_str(" is not in the accepted range 50..=250")
            },
            ConfigErrorType::ShardId { id, total } => {
                f.write_str("shard id ")?;
                Display::fmt(id, f)?;
                f.write_str(" is not less than the shard total ")?;
                Display::fmt(total, f)
            },
        }
    }
}

impl StdError for ConfigError {}

/// Everything that can end a single [`Connection::run_once`] attempt,
/// unifying the pre-handshake and post-handshake error families so the
/// supervisor has one type to match on.
///
/// [`Connection::run_once`]: crate::connection::Connection::run_once
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Failed before or during the WebSocket upgrade.
    Connecting(ConnectingError),
    /// Failed after the connection was established.
    ReceivingEvent(ReceivingEventError),
}

impl ConnectionError {
    /// Whether this error should terminate the supervisor outright.
    #[must_use]
    pub const fn fatal(&self) -> bool {
        match self {
            Self::Connecting(_) => false,
            Self::ReceivingEvent(err) => err.kind.fatal(),
        }
    }

    /// Whether the *same* session can be resumed on the next attempt.
    #[must_use]
    pub const fn resumable(&self) -> bool {
        match self {
            Self::Connecting(_) => false,
            Self::ReceivingEvent(err) => err.kind.resumable(),
        }
    }
}

impl From<ConnectingError> for ConnectionError {
    fn from(err: ConnectingError) -> Self {
        Self::Connecting(err)
    }
}

impl From<ReceivingEventError> for ConnectionError {
    fn from(err: ReceivingEventError) -> Self {
        Self::ReceivingEvent(err)
    }
}

impl Display for ConnectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Connecting(err) => Display::fmt(err, f),
            Self::ReceivingEvent(err) => Display::fmt(err, f),
        }
    }
}

impl StdError for ConnectionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connecting(err) => err.source(),
            Self::ReceivingEvent(err) => err.source(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ConnectingError: Debug, StdError, Send, Sync);
    assert_impl_all!(ReceivingEventError: Debug, StdError, Send, Sync);
    assert_impl_all!(SendError: Debug, StdError, Send, Sync);
    assert_impl_all!(CompressionError: Debug, StdError, Send, Sync);
    assert_impl_all!(ConfigError: Debug, StdError, Send, Sync);
    assert_impl_all!(ConnectionError: Debug, StdError, Send, Sync);

    #[test]
    fn fatal_close_codes_do_not_reconnect() {
        for &code in FATAL_CLOSE_CODES {
            assert!(is_fatal_close_code(code));
            assert!(!is_reconnectable_close_code(code));
        }
    }

    #[test]
    fn documented_reconnectable_codes_are_reconnectable() {
        for &code in RECONNECTABLE_CLOSE_CODES {
            assert!(is_reconnectable_close_code(code));
            assert!(!is_fatal_close_code(code));
        }
    }

    #[test]
    fn unknown_close_codes_default_to_reconnectable() {
        assert!(is_reconnectable_close_code(4999));
        assert!(!is_fatal_close_code(4999));
    }

    #[test]
    fn invalid_session_resumability_follows_payload() {
        let resumable = ReceivingEventErrorType::InvalidSession { can_resume: true };
        assert!(resumable.resumable());
        assert!(resumable.reconnectable());
        assert!(!resumable.fatal());

        let not_resumable = ReceivingEventErrorType::InvalidSession { can_resume: false };
        assert!(!not_resumable.resumable());
        assert!(not_resumable.reconnectable());
    }

    #[test]
    fn server_close_fatal_wins_over_reconnect_attempt() {
        let err = ReceivingEventErrorType::ServerClose { code: 4004 };
        assert!(err.fatal());
        assert!(!err.reconnectable());
        assert!(!err.resumable());
    }

    #[test]
    fn user_close_is_terminal_but_not_fatal() {
        let err = ReceivingEventErrorType::UserClose;
        assert!(!err.fatal());
        assert!(!err.reconnectable());
        assert!(!err.resumable());
    }
}

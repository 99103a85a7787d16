//! Gateway wire frame shape and opcode classification.
//!
//! Every frame exchanged with the gateway, inbound or outbound, is a JSON
//! object `{"op": int, "d": any, "s": int?, "t": string?}`; `s` and `t` are
//! only ever present on DISPATCH frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opcodes recognized by the gateway, both inbound and outbound.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch,
    /// Used for ping checking.
    Heartbeat,
    /// Used for client handshake.
    Identify,
    /// Used to update the client status.
    PresenceUpdate,
    /// Used to join/move/leave voice channels.
    VoiceStateUpdate,
    /// Used to resume a closed connection.
    Resume,
    /// Used to tell clients to reconnect to the gateway.
    Reconnect,
    /// Used to request guild members.
    RequestGuildMembers,
    /// Used to notify the client that the session is invalid.
    InvalidSession,
    /// Sent immediately after connecting, contains heartbeat/server info.
    Hello,
    /// Sent in response to receiving a heartbeat to acknowledge it.
    HeartbeatAck,
}

impl OpCode {
    /// The raw numeric opcode, as sent over the wire.
    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
        }
    }

    /// Map a raw numeric opcode to its variant, if recognized.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

/// A decoded or to-be-encoded gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Opcode denoting the frame's purpose, as a raw number.
    pub op: u8,
    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    /// Sequence number, present only on DISPATCH frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, present only on DISPATCH frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Construct a frame with no sequence/event-name pair, for any opcode
    /// but DISPATCH.
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op.raw(),
            d: Some(d),
            s: None,
            t: None,
        }
    }

    /// This frame's opcode, if it's one this crate recognizes.
    #[must_use]
    pub const fn opcode(&self) -> Option<OpCode> {
        OpCode::from_raw(self.op)
    }
}

/// Payload of a HELLO frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Interval, in milliseconds, at which the client must heartbeat.
    pub heartbeat_interval: u64,
}

/// Contents of a READY dispatch, to the extent this crate cares about them.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyMinimal {
    /// Session identifier used to RESUME after a disconnect.
    pub session_id: String,
}

/// Append the `v`, `encoding`, and (if enabled) `compress` query parameters
/// to a bare gateway URL, preserving its existing path and discarding any
/// fragment.
///
/// # Errors
///
/// Returns an error if `url` is not a valid URL.
pub fn build_url(url: &str, api_version: u8, compression: bool) -> Result<url::Url, url::ParseError> {
    let mut url = url::Url::parse(url)?;
    url.set_fragment(None);
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.append_pair("v", &api_version.to_string());
        pairs.append_pair("encoding", "json");
        if compression {
            pairs.append_pair("compress", "zlib-stream");
        }
    }
    Ok(url)
}

//! The supervisor's lifecycle state machine.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Current lifecycle stage of a [`Supervisor`].
///
/// Transitions: `NotRunning -> Connecting -> WaitingForReady -> Ready`
/// (fresh identify), `Connecting -> Resuming -> Ready` (resume),
/// `Ready -> Stopping -> Stopped` (graceful shutdown), or `Ready ->
/// Connecting -> ...` on any recoverable fault.
///
/// [`Supervisor`]: crate::supervisor::Supervisor
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Stage {
    /// `start()` has not yet been called.
    NotRunning = 0,
    /// A connection attempt is in flight (TCP/TLS/WebSocket upgrade, or
    /// waiting on HELLO).
    Connecting = 1,
    /// HELLO was received and IDENTIFY was sent; waiting for READY.
    WaitingForReady = 2,
    /// HELLO was received and RESUME was sent; waiting for RESUMED.
    Resuming = 3,
    /// The session is established and usable.
    Ready = 4,
    /// `close()` was called; the connection is being torn down.
    Stopping = 5,
    /// The supervisor has fully terminated.
    Stopped = 6,
}

impl Stage {
    /// Whether the supervisor currently has a usable session.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// The stage value did not correspond to a known [`Stage`] variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StageConversionError {
    value: u8,
}

impl Display for StageConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("stage value `")?;
        Display::fmt(&self.value, f)?;
        f.write_str("` is invalid")
    }
}

impl std::error::Error for StageConversionError {}

impl TryFrom<u8> for Stage {
    type Error = StageConversionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::NotRunning,
            1 => Self::Connecting,
            2 => Self::WaitingForReady,
            3 => Self::Resuming,
            4 => Self::Ready,
            5 => Self::Stopping,
            6 => Self::Stopped,
            _ => return Err(StageConversionError { value }),
        })
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::NotRunning => "not running",
            Self::Connecting => "connecting",
            Self::WaitingForReady => "waiting for ready",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Stage: Send, Sync, Clone, Copy);

    #[test]
    fn roundtrips_through_u8() {
        for raw in 0..=6u8 {
            let stage = Stage::try_from(raw).unwrap();
            assert_eq!(stage as u8, raw);
        }
    }

    #[test]
    fn invalid_raw_value_errors() {
        assert!(Stage::try_from(7).is_err());
        assert!(Stage::try_from(255).is_err());
    }

    #[test]
    fn only_ready_reports_is_ready() {
        assert!(Stage::Ready.is_ready());
        assert!(!Stage::WaitingForReady.is_ready());
        assert!(!Stage::Resuming.is_ready());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Stage::NotRunning.to_string(), "not running");
        assert_eq!(Stage::WaitingForReady.to_string(), "waiting for ready");
    }
}

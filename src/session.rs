//! Session identity: `session_id` and `seq`, cleared atomically together.

use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    id: Option<String>,
    seq: Option<u64>,
}

/// Tracks the gateway session identity across reconnect attempts.
///
/// `session_id` and `seq` are guarded by the same lock because the
/// invariant that matters — "cleared together, never independently" — is
/// only as strong as the atomicity of the structure holding them.
#[derive(Debug, Default)]
pub struct Session {
    inner: Mutex<Inner>,
}

impl Session {
    /// A fresh, empty session (no `session_id`, no `seq`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored session id, if any.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).id.clone()
    }

    /// The last observed sequence number, if any.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).seq
    }

    /// Whether a RESUME can be attempted: a `session_id` is on file.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.id().is_some()
    }

    /// Record the session id learned from READY or confirmed by RESUMED.
    pub fn set_id(&self, id: impl Into<String>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).id = Some(id.into());
    }

    /// Update the sequence number observed on a DISPATCH frame.
    ///
    /// `seq` is monotonically non-decreasing within a session; an
    /// out-of-order update is simply ignored rather than regressing the
    /// stored value.
    pub fn set_seq(&self, seq: u64) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.seq.map_or(true, |current| seq >= current) {
            guard.seq = Some(seq);
        }
    }

    /// Clear `session_id` and `seq` atomically, as required before the next
    /// attempt must IDENTIFY rather than RESUME.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.id = None;
        guard.seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Session: Send, Sync);

    #[test]
    fn fresh_session_cannot_resume() {
        let session = Session::new();
        assert!(!session.can_resume());
        assert_eq!(session.id(), None);
        assert_eq!(session.seq(), None);
    }

    #[test]
    fn setting_id_enables_resume() {
        let session = Session::new();
        session.set_id("abc");
        assert!(session.can_resume());
        assert_eq!(session.id().as_deref(), Some("abc"));
    }

    #[test]
    fn seq_is_monotonically_non_decreasing() {
        let session = Session::new();
        session.set_seq(5);
        session.set_seq(3);
        assert_eq!(session.seq(), Some(5));
        session.set_seq(10);
        assert_eq!(session.seq(), Some(10));
    }

    #[test]
    fn clear_removes_both_fields_together() {
        let session = Session::new();
        session.set_id("abc");
        session.set_seq(7);
        session.clear();
        assert_eq!(session.id(), None);
        assert_eq!(session.seq(), None);
        assert!(!session.can_resume());
    }
}

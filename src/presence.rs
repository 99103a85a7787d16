//! Presence state and the sparse-update payload builder.

use serde::Serialize;
use serde_json::Value;

/// A field that can be explicitly left unchanged by a partial update,
/// distinct from a field explicitly set to an empty/null value.
///
/// Collapsing `Absent` and `Set(None)` into a single `Option` would make it
/// impossible to tell "leave the activity alone" apart from "clear the
/// activity"; this type keeps the two apart.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Sparse<T> {
    /// The field was not mentioned by this update; the previously stored
    /// value is kept.
    Absent,
    /// The field was explicitly given this value, which may itself be
    /// "no value" (e.g. clearing an activity).
    Set(T),
}

impl<T> Sparse<T> {
    /// Apply this sparse field onto a stored value: keep `current` if
    /// `self` is [`Absent`](Sparse::Absent), otherwise replace it.
    fn apply(self, current: T) -> T {
        match self {
            Self::Absent => current,
            Self::Set(value) => value,
        }
    }
}

impl<T> Default for Sparse<T> {
    fn default() -> Self {
        Self::Absent
    }
}

/// Online status shown alongside a presence.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Shown as online/green.
    Online,
    /// Shown as idle/yellow.
    Idle,
    /// Shown as do-not-disturb/red.
    Dnd,
    /// Shown offline despite being connected.
    Invisible,
}

impl Default for Status {
    fn default() -> Self {
        Self::Online
    }
}

/// A minimal activity description, enough to populate the `game` field of a
/// presence update.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Activity {
    /// Name of the activity.
    pub name: String,
    /// Activity type, using the gateway's numeric encoding (0 = Playing, 1 =
    /// Streaming, 2 = Listening, 3 = Watching, 5 = Competing).
    #[serde(rename = "type")]
    pub kind: u8,
    /// Stream URL, meaningful only for the Streaming activity type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The full, persisted presence state for this shard.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    status: Status,
    activity: Option<Activity>,
    idle_since: Option<u64>,
    is_afk: bool,
}

/// A partial presence update; any field left [`Sparse::Absent`] preserves
/// the currently stored value.
#[derive(Debug, Clone, Default)]
pub struct PresenceUpdate {
    /// New online status, or unchanged.
    pub status: Sparse<Status>,
    /// New activity (`Some` to set, `None` to clear), or unchanged.
    pub activity: Sparse<Option<Activity>>,
    /// New idle-since timestamp, or unchanged.
    pub idle_since: Sparse<Option<u64>>,
    /// New AFK flag, or unchanged.
    pub is_afk: Sparse<bool>,
}

impl Presence {
    /// Apply a partial update, mutating the stored presence in place.
    ///
    /// Applying the same update twice is idempotent, and applying a wholly
    /// [`Absent`](Sparse::Absent) update leaves the stored presence
    /// unchanged.
    pub fn apply(&mut self, update: PresenceUpdate) {
        self.status = update.status.apply(self.status);
        self.activity = update.activity.apply(self.activity.clone());
        self.idle_since = update.idle_since.apply(self.idle_since);
        self.is_afk = update.is_afk.apply(self.is_afk);
    }

    /// Build the `{since, afk, status, game}` frame this presence
    /// corresponds to, suitable for an IDENTIFY or PRESENCE_UPDATE payload.
    #[must_use]
    pub fn to_frame(&self) -> Value {
        serde_json::json!({
            "since": self.idle_since,
            "afk": self.is_afk,
            "status": self.status,
            "game": self.activity,
        })
    }

    /// Whether any field of this presence has been set away from its
    /// all-default initial state, used to decide whether IDENTIFY should
    /// include a `presence` field at all.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.status == Status::default()
            && self.activity.is_none()
            && self.idle_since.is_none()
            && !self.is_afk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_update_leaves_presence_unchanged() {
        let mut presence = Presence {
            status: Status::Dnd,
            activity: Some(Activity {
                name: "testing".into(),
                kind: 0,
                url: None,
            }),
            idle_since: Some(123),
            is_afk: true,
        };
        let before = presence.clone();

        presence.apply(PresenceUpdate::default());

        assert_eq!(presence.status, before.status);
        assert_eq!(presence.activity, before.activity);
        assert_eq!(presence.idle_since, before.idle_since);
        assert_eq!(presence.is_afk, before.is_afk);
    }

    #[test]
    fn applying_the_same_update_twice_is_idempotent() {
        let update = PresenceUpdate {
            status: Sparse::Set(Status::Idle),
            activity: Sparse::Absent,
            idle_since: Sparse::Set(Some(42)),
            is_afk: Sparse::Set(true),
        };

        let mut first = Presence::default();
        first.apply(update.clone());

        let mut twice = Presence::default();
        twice.apply(update.clone());
        twice.apply(update);

        assert_eq!(first.status, twice.status);
        assert_eq!(first.activity, twice.activity);
        assert_eq!(first.idle_since, twice.idle_since);
        assert_eq!(first.is_afk, twice.is_afk);
    }

    #[test]
    fn set_none_clears_activity_distinct_from_absent() {
        let mut presence = Presence {
            activity: Some(Activity {
                name: "testing".into(),
                kind: 0,
                url: None,
            }),
            ..Presence::default()
        };

        presence.apply(PresenceUpdate {
            activity: Sparse::Set(None),
            ..PresenceUpdate::default()
        });

        assert_eq!(presence.activity, None);
    }

    #[test]
    fn frame_has_expected_shape() {
        let presence = Presence::default();
        let frame = presence.to_frame();
        assert_eq!(frame["status"], "online");
        assert_eq!(frame["afk"], false);
        assert!(frame["game"].is_null());
        assert!(frame["since"].is_null());
    }

    #[test]
    fn default_presence_is_default() {
        assert!(Presence::default().is_default());
    }
}
